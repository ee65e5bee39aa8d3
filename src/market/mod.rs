//! Market settlement layer.
//!
//! Third parties wager on agent results. Two kinds of wager exist:
//!
//! - **Performance**: will the agent finish a calendar day with positive
//!   P/L? Parimutuel per (agent, period).
//! - **Head-to-head**: which of two agents gains more over its next
//!   rounds? Parimutuel per (pair, placement date).
//!
//! Outcomes are derived from the ledger's round history only. The market
//! is the only writer of wager records and the only component that
//! credits a participant's account.

pub mod book;
pub mod head_to_head;
pub mod odds;
pub mod performance;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{publish_detached, AuditFact, AuditPublisher};
use crate::storage::{Debit, Ledger};
use crate::types::{
    AgentId, ArenaError, HeadToHeadWager, PerformanceWager, WagerOutcome, WagerSide,
};

pub use book::{WagerBook, WagerBookSnapshot, WagerView};
pub use odds::{OddsPoint, PairOddsPoint};

/// Proportional share of the pool: `stake × pool ÷ winning_stake`,
/// floored. An empty winning side divides by one.
pub fn parimutuel_payout(stake: u64, total_pool: u64, winning_stake: u64) -> u64 {
    let divisor = u128::from(winning_stake.max(1));
    let share = u128::from(stake) * u128::from(total_pool) / divisor;
    u64::try_from(share).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Requests and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceWagerRequest {
    pub participant: String,
    pub agent: AgentId,
    pub period: NaiveDate,
    pub side: WagerSide,
    /// Cents.
    pub stake: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeadToHeadWagerRequest {
    pub participant: String,
    pub agent_a: AgentId,
    pub agent_b: AgentId,
    pub backed: AgentId,
    /// Cents.
    pub stake: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WagerKind {
    Performance,
    HeadToHead,
}

/// One wager resolved by a settlement pass.
#[derive(Debug, Clone, Serialize)]
pub struct SettledWager {
    pub id: Uuid,
    pub kind: WagerKind,
    pub participant: String,
    pub outcome: WagerOutcome,
    pub payout: u64,
    pub settled_at: DateTime<Utc>,
}

/// Result of one settlement pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SettlementReport {
    pub settled: Vec<SettledWager>,
    pub still_pending: usize,
}

impl SettlementReport {
    pub fn total_paid(&self) -> u64 {
        self.settled.iter().map(|s| s.payout).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.settled.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

pub struct Market {
    ledger: Arc<Ledger>,
    book: WagerBook,
    agents: HashSet<AgentId>,
    head_to_head_rounds: u64,
    audit: Option<Arc<dyn AuditPublisher>>,
}

impl Market {
    pub fn new(
        ledger: Arc<Ledger>,
        agents: impl IntoIterator<Item = AgentId>,
        head_to_head_rounds: u64,
    ) -> Self {
        Self {
            ledger,
            book: WagerBook::new(),
            agents: agents.into_iter().collect(),
            head_to_head_rounds,
            audit: None,
        }
    }

    /// Resume from a persisted book.
    pub fn with_book(mut self, book: WagerBook) -> Self {
        self.book = book;
        self
    }

    pub fn with_audit(mut self, publisher: Arc<dyn AuditPublisher>) -> Self {
        self.audit = Some(publisher);
        self
    }

    pub fn book(&self) -> &WagerBook {
        &self.book
    }

    fn publish(&self, fact: AuditFact) {
        if let Some(publisher) = &self.audit {
            publish_detached(Arc::clone(publisher), fact);
        }
    }

    fn require_agent(&self, agent: &str) -> Result<(), ArenaError> {
        if self.agents.contains(agent) {
            Ok(())
        } else {
            Err(ArenaError::UnknownAgent(agent.to_string()))
        }
    }

    fn validate_common(&self, participant: &str, stake: u64) -> Result<(), ArenaError> {
        if participant.trim().is_empty() {
            return Err(ArenaError::InvalidWager("participant is required".into()));
        }
        // Agents and participants share the ledger's account namespace.
        if self.agents.contains(participant) {
            return Err(ArenaError::InvalidWager(format!(
                "{participant} is an agent and cannot place market wagers"
            )));
        }
        if stake == 0 {
            return Err(ArenaError::InvalidWager("stake must be positive".into()));
        }
        Ok(())
    }

    fn take_stake(&self, participant: &str, today: NaiveDate, stake: u64) -> Result<(), ArenaError> {
        match self.ledger.debit(participant, today, stake) {
            Debit::Accepted { .. } => Ok(()),
            Debit::Declined { balance } => Err(ArenaError::InsufficientFunds {
                account: participant.to_string(),
                needed: stake,
                available: balance,
            }),
        }
    }

    /// Place a performance wager, debiting the participant for `today`.
    pub fn place_performance(
        &self,
        req: PerformanceWagerRequest,
        today: NaiveDate,
    ) -> Result<PerformanceWager, ArenaError> {
        self.validate_common(&req.participant, req.stake)?;
        self.require_agent(&req.agent)?;
        if req.period < today {
            return Err(ArenaError::InvalidWager(format!(
                "period {} has already closed",
                req.period
            )));
        }

        let wager = {
            let mut book = self.book.lock();
            self.take_stake(&req.participant, today, req.stake)?;
            let wager = PerformanceWager {
                id: Uuid::new_v4(),
                participant: req.participant,
                agent: req.agent,
                period: req.period,
                side: req.side,
                stake: req.stake,
                placed_at: Utc::now(),
                outcome: WagerOutcome::Pending,
                payout: None,
            };
            book.performance.push(wager.clone());
            wager
        };

        info!(
            id = %wager.id,
            agent = %wager.agent,
            period = %wager.period,
            side = %wager.side,
            stake = wager.stake,
            "Performance wager placed"
        );
        self.publish(AuditFact::PerformanceWagerPlaced {
            id: wager.id,
            agent: wager.agent.clone(),
            period: wager.period,
            side: wager.side,
            stake: wager.stake,
        });
        Ok(wager)
    }

    /// Place a head-to-head wager, snapshotting both agents' stats.
    pub fn place_head_to_head(
        &self,
        req: HeadToHeadWagerRequest,
        today: NaiveDate,
    ) -> Result<HeadToHeadWager, ArenaError> {
        self.validate_common(&req.participant, req.stake)?;
        if req.agent_a == req.agent_b {
            return Err(ArenaError::InvalidWager("agents must be distinct".into()));
        }
        if req.backed != req.agent_a && req.backed != req.agent_b {
            return Err(ArenaError::InvalidWager(format!(
                "backed agent {} is not in the pair",
                req.backed
            )));
        }
        self.require_agent(&req.agent_a)?;
        self.require_agent(&req.agent_b)?;

        let wager = {
            let mut book = self.book.lock();
            self.take_stake(&req.participant, today, req.stake)?;
            let wager = HeadToHeadWager {
                id: Uuid::new_v4(),
                snapshot_a: self.ledger.agent_stats(&req.agent_a),
                snapshot_b: self.ledger.agent_stats(&req.agent_b),
                participant: req.participant,
                agent_a: req.agent_a,
                agent_b: req.agent_b,
                backed: req.backed,
                stake: req.stake,
                placed_on: today,
                placed_at: Utc::now(),
                outcome: WagerOutcome::Pending,
                payout: None,
            };
            book.head_to_head.push(wager.clone());
            wager
        };

        info!(
            id = %wager.id,
            agent_a = %wager.agent_a,
            agent_b = %wager.agent_b,
            backed = %wager.backed,
            stake = wager.stake,
            "Head-to-head wager placed"
        );
        self.publish(AuditFact::HeadToHeadWagerPlaced {
            id: wager.id,
            agent_a: wager.agent_a.clone(),
            agent_b: wager.agent_b.clone(),
            backed: wager.backed.clone(),
            stake: wager.stake,
        });
        Ok(wager)
    }

    /// Settle everything that can be settled as of `today`. Safe to call
    /// repeatedly and from any task; settled wagers are skipped.
    pub fn settle(&self, today: NaiveDate) -> SettlementReport {
        let now = Utc::now();
        let report = {
            let mut book = self.book.lock();
            let mut settled =
                performance::settle_performance(&mut book.performance, &self.ledger, today, now);
            settled.extend(head_to_head::settle_head_to_head(
                &mut book.head_to_head,
                &self.ledger,
                self.head_to_head_rounds,
                today,
                now,
            ));
            let still_pending = book.performance.iter().filter(|w| w.outcome.is_pending()).count()
                + book.head_to_head.iter().filter(|w| w.outcome.is_pending()).count();
            SettlementReport {
                settled,
                still_pending,
            }
        };

        if !report.is_empty() {
            info!(
                settled = report.settled.len(),
                paid = report.total_paid(),
                pending = report.still_pending,
                "Settlement pass complete"
            );
        }
        for s in &report.settled {
            self.publish(AuditFact::WagerSettled {
                id: s.id,
                outcome: s.outcome,
                payout: s.payout,
                settled_at: s.settled_at,
            });
        }
        report
    }

    /// Odds history for a performance market, in placement order.
    pub fn odds_history(&self, agent: &str, period: NaiveDate) -> Result<Vec<OddsPoint>, ArenaError> {
        self.require_agent(agent)?;
        Ok(odds::odds_history(&self.book.performance_for(agent, period)))
    }

    /// Odds history for a head-to-head pair, in placement order.
    pub fn head_to_head_odds(&self, a: &str, b: &str) -> Result<Vec<PairOddsPoint>, ArenaError> {
        self.require_agent(a)?;
        self.require_agent(b)?;
        if a == b {
            warn!(agent = a, "Head-to-head odds requested for a single agent");
            return Err(ArenaError::InvalidWager("agents must be distinct".into()));
        }
        Ok(odds::head_to_head_odds(&self.book.head_to_head_for(a, b), a, b))
    }

    pub fn snapshot(&self) -> WagerBookSnapshot {
        self.book.snapshot()
    }
}
