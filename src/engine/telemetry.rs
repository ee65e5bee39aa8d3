//! Round telemetry — the ordered event stream describing a run.
//!
//! Events are observational only. A consumer that disconnects detaches
//! the sink; the orchestrator keeps playing and settling regardless.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::game::{Card, Outcome};
use crate::types::{AgentId, PlayDecision};

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    InsufficientFunds { agent: AgentId, balance: u64, minimum: u64 },
    TimedOut,
}

/// One telemetry event. Every event carries the round index so a
/// consumer can rebuild state from the sequence alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundEvent {
    RoundStarted {
        round: u32,
        agents: Vec<AgentId>,
    },
    CardsDealt {
        round: u32,
        hands: Vec<(AgentId, Vec<Card>)>,
        dealer_up: Card,
    },
    WagerPlaced {
        round: u32,
        agent: AgentId,
        amount: u64,
        balance: u64,
        fallback: bool,
    },
    ReasoningFragment {
        round: u32,
        agent: AgentId,
        text: String,
    },
    DecisionMade {
        round: u32,
        agent: AgentId,
        decision: PlayDecision,
        hand_value: u32,
        fallback: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
    CardDrawn {
        round: u32,
        agent: AgentId,
        card: Card,
        hand_value: u32,
        bust: bool,
    },
    DealerRevealed {
        round: u32,
        hole: Card,
        dealer_value: u32,
    },
    DealerDrew {
        round: u32,
        card: Card,
        dealer_value: u32,
    },
    Outcome {
        round: u32,
        agent: AgentId,
        outcome: Outcome,
        pnl: i64,
        balance: u64,
    },
    RoundEnded {
        round: u32,
    },
    Done {
        rounds_played: u32,
        stop: StopReason,
    },
    Error {
        message: String,
    },
}

/// Sending half of the telemetry channel.
pub struct Telemetry {
    tx: Option<mpsc::UnboundedSender<RoundEvent>>,
}

impl Telemetry {
    pub fn new(tx: mpsc::UnboundedSender<RoundEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Convenience: a sink plus its receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RoundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&mut self, event: RoundEvent) {
        let Some(tx) = &self.tx else { return };
        if tx.send(event).is_err() {
            debug!("Telemetry consumer disconnected; continuing without it");
            self.tx = None;
        }
    }

    pub fn is_attached(&self) -> bool {
        self.tx.is_some()
    }
}
