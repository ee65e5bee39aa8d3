//! Card/hand engine — house rules for a single-deck blackjack table.
//!
//! Everything here is pure and deterministic given a deck order, so the
//! orchestrator can be tested with stacked decks.

pub mod card;
pub mod hand;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use card::{Card, Deck, RandomShoe, Rank, Shoe, Suit};
pub use hand::Hand;

/// The dealer draws while below this total and stands on every 17.
pub const DEALER_STANDS_ON: u32 = 17;

/// Result of one agent's hand against the dealer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
    Push,
}

impl Outcome {
    /// Signed profit/loss for a stake at even money.
    pub fn pnl(&self, wager: u64) -> i64 {
        let wager = wager as i64;
        match self {
            Outcome::Win => wager,
            Outcome::Loss => -wager,
            Outcome::Push => 0,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Win => write!(f, "WIN"),
            Outcome::Loss => write!(f, "LOSS"),
            Outcome::Push => write!(f, "PUSH"),
        }
    }
}

/// Play out the dealer's hand: draw while the total is under 17.
///
/// Returns the cards drawn, in order. Stops early if the deck runs out.
pub fn play_dealer(deck: &mut Deck, hand: &mut Hand) -> Vec<Card> {
    let mut drawn = Vec::new();
    while hand.value() < DEALER_STANDS_ON {
        let Some(card) = deck.draw() else { break };
        hand.push(card);
        drawn.push(card);
    }
    drawn
}

/// Resolve a finished player hand against the finished dealer hand.
pub fn resolve(player: &Hand, dealer: &Hand) -> Outcome {
    if player.is_bust() {
        return Outcome::Loss;
    }
    if dealer.is_bust() {
        return Outcome::Win;
    }
    match player.value().cmp(&dealer.value()) {
        std::cmp::Ordering::Greater => Outcome::Win,
        std::cmp::Ordering::Less => Outcome::Loss,
        std::cmp::Ordering::Equal => Outcome::Push,
    }
}
