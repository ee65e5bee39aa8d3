//! One agent's seat at the table: asking for a wager and for play
//! decisions, absorbing every kind of bad reply.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::telemetry::{RoundEvent, Telemetry};
use crate::game::{Card, Hand};
use crate::llm::{AgentGateway, AgentMessage, AgentReply};
use crate::protocol::{self, ParsedDecision, ParsedWager, Prompt, WagerLimits};
use crate::types::{AgentId, DecisionStep, PlayDecision};

/// A parsed wager plus the reasoning fragments streamed while the agent
/// decided on it.
pub(crate) struct WagerReply {
    pub parsed: ParsedWager,
    pub reasoning: Vec<RoundEvent>,
}

pub(crate) struct Seat {
    pub agent: AgentId,
    pub gateway: Arc<dyn AgentGateway>,
    pub hand: Hand,
    /// Debited amount; zero until the wager is placed.
    pub wager: u64,
    pub wager_rationale: Option<String>,
    pub decisions: Vec<DecisionStep>,
}

impl Seat {
    pub fn new(agent: AgentId, gateway: Arc<dyn AgentGateway>) -> Self {
        Self {
            agent,
            gateway,
            hand: Hand::new(),
            wager: 0,
            wager_rationale: None,
            decisions: Vec::new(),
        }
    }

    /// Clear the previous round's hand and trace.
    pub fn reset(&mut self) {
        self.hand = Hand::new();
        self.wager = 0;
        self.wager_rationale = None;
        self.decisions.clear();
    }

    /// Ask for a wager. Always returns an in-range amount.
    ///
    /// Streamed reasoning is held back so the caller can emit it after
    /// the wager is placed.
    pub async fn ask_wager(
        &self,
        round: u32,
        balance: u64,
        limits: WagerLimits,
        dealer_up: Card,
        timeout: Duration,
    ) -> WagerReply {
        let prompt = protocol::wager_prompt(balance, limits, &self.hand, dealer_up);
        let (mut held, mut rx) = Telemetry::channel();
        let reply = self.ask(round, &prompt, timeout, &mut held).await;
        drop(held);

        let mut reasoning = Vec::new();
        while let Ok(event) = rx.try_recv() {
            reasoning.push(event);
        }

        let parsed = match reply {
            Some(reply) => {
                let mut parsed = protocol::parse_wager(&reply.decision, limits);
                if parsed.fallback {
                    warn!(agent = %self.agent, round, "Unreadable wager, using table minimum");
                }
                if parsed.rationale.is_none() {
                    parsed.rationale = reply.rationale;
                }
                parsed
            }
            None => ParsedWager {
                amount: limits.min,
                fallback: true,
                rationale: None,
            },
        };
        WagerReply { parsed, reasoning }
    }

    /// Ask for hit or stand on the current hand.
    pub async fn ask_decision(
        &self,
        round: u32,
        dealer_up: Card,
        timeout: Duration,
        telemetry: &mut Telemetry,
    ) -> ParsedDecision {
        let prompt = protocol::play_prompt(&self.hand, dealer_up);
        match self.ask(round, &prompt, timeout, telemetry).await {
            Some(reply) => {
                let mut parsed = protocol::parse_decision(&reply.decision);
                if parsed.fallback {
                    warn!(agent = %self.agent, round, "Unreadable decision, standing");
                }
                if parsed.rationale.is_none() {
                    parsed.rationale = reply.rationale;
                }
                parsed
            }
            None => ParsedDecision {
                decision: PlayDecision::Stand,
                fallback: true,
                rationale: None,
            },
        }
    }

    /// One bounded gateway call. Failures and timeouts come back as
    /// `None` so the caller applies its fallback.
    async fn ask(
        &self,
        round: u32,
        prompt: &Prompt,
        timeout: Duration,
        telemetry: &mut Telemetry,
    ) -> Option<AgentReply> {
        let call = async {
            if self.gateway.supports_streaming() {
                self.ask_streaming(round, prompt, telemetry).await
            } else {
                self.gateway.ask(prompt).await
            }
        };

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(reply)) => Some(reply),
            Ok(Err(e)) => {
                warn!(
                    agent = %self.agent,
                    backend = self.gateway.name(),
                    kind = ?prompt.kind,
                    error = %e,
                    "Agent call failed, using fallback"
                );
                None
            }
            Err(_) => {
                warn!(
                    agent = %self.agent,
                    backend = self.gateway.name(),
                    kind = ?prompt.kind,
                    timeout_secs = timeout.as_secs(),
                    "Agent call timed out, using fallback"
                );
                None
            }
        }
    }

    /// Run the streaming call and the chunk consumer side by side,
    /// forwarding chunks as reasoning fragments until the final reply.
    async fn ask_streaming(
        &self,
        round: u32,
        prompt: &Prompt,
        telemetry: &mut Telemetry,
    ) -> anyhow::Result<AgentReply> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let agent = &self.agent;

        let consume = async {
            let mut chunks = 0usize;
            while let Some(message) = rx.recv().await {
                match message {
                    AgentMessage::Chunk(text) => {
                        chunks += 1;
                        telemetry.emit(RoundEvent::ReasoningFragment {
                            round,
                            agent: agent.clone(),
                            text,
                        });
                    }
                    AgentMessage::Final(reply) => {
                        debug!(agent = %agent, chunks, "Streamed reply complete");
                        return Some(reply);
                    }
                }
            }
            None
        };

        let (sent, reply) = tokio::join!(self.gateway.ask_stream(prompt, tx), consume);
        sent?;
        reply.ok_or_else(|| anyhow::anyhow!("Stream ended without a final reply"))
    }

    /// Record a decision in the trace.
    pub fn record(&mut self, parsed: &ParsedDecision, hand_value: u32) {
        self.decisions.push(DecisionStep {
            decision: parsed.decision,
            hand_value,
            rationale: parsed.rationale.clone(),
            fallback: parsed.fallback,
        });
    }
}
