//! Defensive parsing of agent replies.
//!
//! Replies are free text and may be malformed or adversarial. Parsing
//! never fails: an unreadable wager becomes the table minimum, an
//! unreadable decision becomes STAND, and any readable wager is clamped
//! into range.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

use super::{WagerLimits, DECISION_LABEL, REASON_LABEL, WAGER_LABEL};
use crate::types::PlayDecision;

const WAGER_ALIASES: &[&str] = &[WAGER_LABEL, "BET:"];
const DECISION_ALIASES: &[&str] = &[DECISION_LABEL, "ACTION:"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedWager {
    /// Clamped amount in cents.
    pub amount: u64,
    pub fallback: bool,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDecision {
    pub decision: PlayDecision,
    pub fallback: bool,
    pub rationale: Option<String>,
}

/// Parse a wager reply into an in-range amount.
pub fn parse_wager(text: &str, limits: WagerLimits) -> ParsedWager {
    let candidate = extract_labelled(text, WAGER_ALIASES).or_else(|| first_token(text));
    let cents = candidate.as_deref().and_then(parse_dollars);
    ParsedWager {
        amount: cents.map_or(limits.min, |c| limits.clamp(c)),
        fallback: cents.is_none(),
        rationale: extract_labelled(text, &[REASON_LABEL]),
    }
}

/// Parse a hit/stand reply.
pub fn parse_decision(text: &str) -> ParsedDecision {
    let candidate = extract_labelled(text, DECISION_ALIASES).or_else(|| first_token(text));
    let decision = candidate.as_deref().and_then(decision_word);
    ParsedDecision {
        decision: decision.unwrap_or(PlayDecision::Stand),
        fallback: decision.is_none(),
        rationale: extract_labelled(text, &[REASON_LABEL]),
    }
}

/// Value after the last line carrying one of `labels` (ASCII case-insensitive).
fn extract_labelled(text: &str, labels: &[&str]) -> Option<String> {
    for line in text.lines().rev() {
        // ASCII uppercasing keeps byte offsets aligned with `line`.
        let upper = line.to_ascii_uppercase();
        for label in labels {
            if let Some(pos) = upper.rfind(label) {
                let value = line[pos + label.len()..].trim().trim_matches('*').trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

fn first_token(text: &str) -> Option<String> {
    text.split_whitespace().next().map(str::to_string)
}

fn decision_word(value: &str) -> Option<PlayDecision> {
    let word: String = value
        .split_whitespace()
        .next()?
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase();
    match word.as_str() {
        "hit" => Some(PlayDecision::Hit),
        "stand" | "stay" => Some(PlayDecision::Stand),
        _ => None,
    }
}

/// Parse a dollar amount such as `$1,250.50` into cents (truncating
/// sub-cent digits). Returns `None` if no number can be read.
fn parse_dollars(value: &str) -> Option<i64> {
    let token = value.split_whitespace().next()?;
    let cleaned: String = token
        .chars()
        .filter(|c| !matches!(c, '$' | ','))
        .collect();
    let cleaned = cleaned.trim_end_matches(|c: char| !c.is_ascii_digit());
    let dollars = Decimal::from_str(cleaned).ok()?;
    let saturated = if dollars.is_sign_negative() {
        i64::MIN
    } else {
        i64::MAX
    };
    // Out-of-range amounts saturate and are clamped by the caller.
    let cents = match dollars.checked_mul(dec!(100)) {
        Some(cents) => cents.trunc(),
        None => return Some(saturated),
    };
    Some(cents.to_i64().unwrap_or(saturated))
}
