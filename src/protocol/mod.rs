//! Decision protocol — prompts sent to agents and defensive reply parsing.
//!
//! Prompts carry only the state an agent can see at the table: no
//! strategy hints and no odds tables, since the arena measures each
//! agent's own judgment.

pub mod parse;

use serde::{Deserialize, Serialize};

use crate::game::{Card, Hand};
use crate::types::format_cents;

pub use parse::{parse_decision, parse_wager, ParsedDecision, ParsedWager};

/// Label the agent is asked to put its wager behind.
pub const WAGER_LABEL: &str = "WAGER:";
/// Label the agent is asked to put its play decision behind.
pub const DECISION_LABEL: &str = "DECISION:";
/// Optional free-text justification.
pub const REASON_LABEL: &str = "REASON:";

// ---------------------------------------------------------------------------
// Wager limits
// ---------------------------------------------------------------------------

/// Inclusive bounds for a wager, in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagerLimits {
    pub min: u64,
    pub max: u64,
}

impl WagerLimits {
    /// Bounds of `[min, min(balance, table_max)]`.
    ///
    /// Callers check `balance >= min` before asking for a wager; if they
    /// do not, the range collapses to `[min, min]`.
    pub fn for_balance(min: u64, table_max: u64, balance: u64) -> Self {
        let max = table_max.min(balance).max(min);
        Self { min, max }
    }

    pub fn clamp(&self, amount: i64) -> u64 {
        if amount <= self.min as i64 {
            self.min
        } else {
            (amount as u64).min(self.max)
        }
    }
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptKind {
    Wager,
    Play,
}

/// A rendered request for one agent decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub kind: PromptKind,
    pub system: String,
    pub user: String,
}

const SYSTEM_PROMPT: &str = "You are a player at a single-deck blackjack table. \
     The dealer stands on all 17s and every win pays even money. \
     Answer on the final line using exactly the format requested.";

/// Ask for a wager once the agent has seen its own two cards and the
/// dealer's up card.
pub fn wager_prompt(balance: u64, limits: WagerLimits, hand: &Hand, dealer_up: Card) -> Prompt {
    let mut user = String::with_capacity(400);
    user.push_str(&format!("BANKROLL: {}\n", format_cents(balance as i64)));
    user.push_str(&format!("MINIMUM WAGER: {}\n", format_cents(limits.min as i64)));
    user.push_str(&format!("MAXIMUM WAGER: {}\n", format_cents(limits.max as i64)));
    user.push_str(&format!("YOUR HAND: {hand}\n"));
    user.push_str(&format!("DEALER SHOWS: {dealer_up}\n"));
    user.push_str(&format!(
        "\nHow much do you wager on this hand? Reply with a line:\n{WAGER_LABEL} <dollars>\n\
         You may add a line {REASON_LABEL} <one sentence>.\n"
    ));
    Prompt {
        kind: PromptKind::Wager,
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Ask for a hit/stand decision on the current hand.
pub fn play_prompt(hand: &Hand, dealer_up: Card) -> Prompt {
    let mut user = String::with_capacity(300);
    user.push_str(&format!("YOUR HAND: {hand}\n"));
    user.push_str(&format!("DEALER SHOWS: {dealer_up}\n"));
    user.push_str(&format!(
        "\nDo you HIT or STAND? Reply with a line:\n{DECISION_LABEL} HIT or {DECISION_LABEL} STAND\n\
         You may add a line {REASON_LABEL} <one sentence>.\n"
    ));
    Prompt {
        kind: PromptKind::Play,
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}
