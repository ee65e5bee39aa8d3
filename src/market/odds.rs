//! Implied odds, derived by replaying wager placements.
//!
//! Nothing here is stored; every point is recomputed from the wager book
//! in placement order.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::types::{HeadToHeadWager, PerformanceWager, WagerSide};

/// Probability quoted for a side of an empty pool.
const EVEN: Decimal = dec!(0.5);

fn implied(side: u64, total: u64) -> Decimal {
    if total == 0 {
        EVEN
    } else {
        (Decimal::from(side) / Decimal::from(total)).round_dp(4)
    }
}

/// Odds on a performance market after one placement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OddsPoint {
    pub placed_at: DateTime<Utc>,
    pub yes_probability: Decimal,
    pub no_probability: Decimal,
    pub yes_pool: u64,
    pub no_pool: u64,
    pub total_pool: u64,
}

impl OddsPoint {
    /// Quote for a market nobody has bet on yet.
    pub fn opening(at: DateTime<Utc>) -> Self {
        Self {
            placed_at: at,
            yes_probability: EVEN,
            no_probability: EVEN,
            yes_pool: 0,
            no_pool: 0,
            total_pool: 0,
        }
    }
}

/// Replay performance wagers for one (agent, period) market.
pub fn odds_history(wagers: &[PerformanceWager]) -> Vec<OddsPoint> {
    let mut ordered: Vec<&PerformanceWager> = wagers.iter().collect();
    ordered.sort_by_key(|w| w.placed_at);

    let (mut yes, mut no) = (0u64, 0u64);
    ordered
        .into_iter()
        .map(|w| {
            match w.side {
                WagerSide::Yes => yes = yes.saturating_add(w.stake),
                WagerSide::No => no = no.saturating_add(w.stake),
            }
            let total = yes.saturating_add(no);
            OddsPoint {
                placed_at: w.placed_at,
                yes_probability: implied(yes, total),
                no_probability: implied(no, total),
                yes_pool: yes,
                no_pool: no,
                total_pool: total,
            }
        })
        .collect()
}

/// Odds on a head-to-head pair after one placement, keyed on the backed
/// agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairOddsPoint {
    pub placed_at: DateTime<Utc>,
    pub agent_a: String,
    pub agent_b: String,
    pub a_probability: Decimal,
    pub b_probability: Decimal,
    pub total_pool: u64,
}

/// Replay head-to-head wagers on the unordered pair (`a`, `b`).
pub fn head_to_head_odds(wagers: &[HeadToHeadWager], a: &str, b: &str) -> Vec<PairOddsPoint> {
    let mut ordered: Vec<&HeadToHeadWager> = wagers.iter().filter(|w| w.covers_pair(a, b)).collect();
    ordered.sort_by_key(|w| w.placed_at);

    let (mut on_a, mut on_b) = (0u64, 0u64);
    ordered
        .into_iter()
        .map(|w| {
            if w.backed == a {
                on_a = on_a.saturating_add(w.stake);
            } else {
                on_b = on_b.saturating_add(w.stake);
            }
            let total = on_a.saturating_add(on_b);
            PairOddsPoint {
                placed_at: w.placed_at,
                agent_a: a.to_string(),
                agent_b: b.to_string(),
                a_probability: implied(on_a, total),
                b_probability: implied(on_b, total),
                total_pool: total,
            }
        })
        .collect()
}
