//! Hands and hand scoring.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::card::Card;

/// Ordered cards held by one player or the dealer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hand {
    cards: Vec<Card>,
}

impl Hand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cards(cards: Vec<Card>) -> Self {
        Self { cards }
    }

    pub fn push(&mut self, card: Card) {
        self.cards.push(card);
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// First card dealt; for the dealer this is the face-up card.
    pub fn up_card(&self) -> Option<Card> {
        self.cards.first().copied()
    }

    /// Best total: Aces count 11, dropping to 1 one at a time while the
    /// total is over 21.
    pub fn value(&self) -> u32 {
        self.score().0
    }

    /// Whether an Ace is still being counted as 11.
    pub fn is_soft(&self) -> bool {
        self.score().1 > 0
    }

    pub fn is_bust(&self) -> bool {
        self.value() > 21
    }

    /// Two-card 21.
    pub fn is_natural(&self) -> bool {
        self.cards.len() == 2 && self.value() == 21
    }

    /// (total, aces still counted high)
    fn score(&self) -> (u32, u32) {
        let mut total: u32 = self.cards.iter().map(|c| c.rank.points()).sum();
        let mut high_aces = self.cards.iter().filter(|c| c.is_ace()).count() as u32;
        while total > 21 && high_aces > 0 {
            total -= 10;
            high_aces -= 1;
        }
        (total, high_aces)
    }
}

impl fmt::Display for Hand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cards: Vec<String> = self.cards.iter().map(|c| c.to_string()).collect();
        write!(f, "{} ({})", cards.join(" "), self.value())
    }
}
