//! Shared types for the ARENA.
//!
//! These types form the data model used across all modules: round
//! records written by the orchestrator, wager records owned by the
//! market layer, and the domain error taxonomy.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::game::{Hand, Outcome};

/// Registered agent identifier (also used as its ledger account id).
pub type AgentId = String;

/// Render integer cents as dollars, e.g. `-100000` → `-$1000.00`.
pub fn format_cents(cents: i64) -> String {
    let dollars = Decimal::new(cents.abs(), 2);
    if cents < 0 {
        format!("-${dollars}")
    } else {
        format!("${dollars}")
    }
}

fn dollars(cents: &u64) -> String {
    format_cents(*cents as i64)
}

// ---------------------------------------------------------------------------
// Round records
// ---------------------------------------------------------------------------

/// A play decision an agent can make.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayDecision {
    Hit,
    Stand,
}

impl fmt::Display for PlayDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayDecision::Hit => write!(f, "HIT"),
            PlayDecision::Stand => write!(f, "STAND"),
        }
    }
}

/// One entry in an agent's decision trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionStep {
    pub decision: PlayDecision,
    /// Hand value at the time the decision was asked for.
    pub hand_value: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// True when the reply could not be parsed and the default was used.
    #[serde(default)]
    pub fallback: bool,
}

/// Immutable record of one agent's settled round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: u32,
    pub agent: AgentId,
    /// Set for VS rounds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opponent: Option<AgentId>,
    pub date: NaiveDate,
    pub wager: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wager_rationale: Option<String>,
    pub hand: Hand,
    pub dealer: Hand,
    pub decisions: Vec<DecisionStep>,
    pub outcome: Outcome,
    pub pnl: i64,
    pub balance_after: u64,
    pub settled_at: DateTime<Utc>,
}

impl fmt::Display for RoundRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} #{}] {} vs dealer {} | wager {} | {} {} | balance {}",
            self.agent,
            self.round,
            self.hand,
            self.dealer,
            format_cents(self.wager as i64),
            self.outcome,
            format_cents(self.pnl),
            format_cents(self.balance_after as i64),
        )
    }
}

/// Aggregate of an agent's settled rounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    pub rounds_played: u64,
    pub cumulative_pnl: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub agent: AgentId,
    pub rounds: u64,
    pub wins: u64,
    pub losses: u64,
    pub pushes: u64,
    pub net_pnl: i64,
}

impl LeaderboardEntry {
    pub fn win_rate(&self) -> f64 {
        if self.rounds == 0 {
            0.0
        } else {
            self.wins as f64 / self.rounds as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Wagers
// ---------------------------------------------------------------------------

/// Side of a performance wager: "will the agent finish the period up?"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WagerSide {
    Yes,
    No,
}

impl fmt::Display for WagerSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WagerSide::Yes => write!(f, "YES"),
            WagerSide::No => write!(f, "NO"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WagerOutcome {
    Pending,
    Win,
    Loss,
    Push,
}

impl WagerOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, WagerOutcome::Pending)
    }
}

/// Parimutuel wager on whether an agent ends a period with positive P/L.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceWager {
    pub id: Uuid,
    pub participant: String,
    pub agent: AgentId,
    pub period: NaiveDate,
    pub side: WagerSide,
    pub stake: u64,
    pub placed_at: DateTime<Utc>,
    pub outcome: WagerOutcome,
    pub payout: Option<u64>,
}

/// Wager on which of two agents gains more over their next rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadToHeadWager {
    pub id: Uuid,
    pub participant: String,
    pub agent_a: AgentId,
    pub agent_b: AgentId,
    /// The agent the participant expects to outperform.
    pub backed: AgentId,
    pub stake: u64,
    pub placed_on: NaiveDate,
    pub placed_at: DateTime<Utc>,
    pub snapshot_a: AgentStats,
    pub snapshot_b: AgentStats,
    pub outcome: WagerOutcome,
    pub payout: Option<u64>,
}

impl HeadToHeadWager {
    /// Whether this wager covers the given pair, in either order.
    pub fn covers_pair(&self, x: &str, y: &str) -> bool {
        (self.agent_a == x && self.agent_b == y) || (self.agent_a == y && self.agent_b == x)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain errors surfaced to callers of the arena core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    #[error("Insufficient funds for {account}: need {}, have {}", dollars(.needed), dollars(.available))]
    InsufficientFunds {
        account: String,
        needed: u64,
        available: u64,
    },

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Invalid wager: {0}")]
    InvalidWager(String),

    #[error("Invalid matchup: {0}")]
    InvalidMatchup(String),

    #[error("Deck exhausted mid-round")]
    DeckExhausted,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
