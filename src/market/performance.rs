//! Performance wager settlement.
//!
//! Parimutuel: once a period is over, every wager on the side matching
//! the agent's period result splits the whole pool pro rata. A period
//! that ends flat counts as "no"; performance wagers never push.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

use super::{parimutuel_payout, SettledWager, WagerKind};
use crate::storage::Ledger;
use crate::types::{AgentId, PerformanceWager, WagerOutcome, WagerSide};

/// Side that wins for a period with net P/L `pnl`.
pub fn winning_side(pnl: i64) -> WagerSide {
    if pnl > 0 {
        WagerSide::Yes
    } else {
        WagerSide::No
    }
}

/// Settle every pending wager whose period ended before `today`.
/// Payouts are credited to participants on `today`.
pub fn settle_performance(
    wagers: &mut [PerformanceWager],
    ledger: &Ledger,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Vec<SettledWager> {
    // Pools keyed by (agent, period): (yes stake, no stake).
    let mut pools: HashMap<(AgentId, NaiveDate), (u64, u64)> = HashMap::new();
    for w in wagers.iter().filter(|w| w.period < today) {
        let pool = pools.entry((w.agent.clone(), w.period)).or_default();
        match w.side {
            WagerSide::Yes => pool.0 = pool.0.saturating_add(w.stake),
            WagerSide::No => pool.1 = pool.1.saturating_add(w.stake),
        }
    }

    let mut results: HashMap<(AgentId, NaiveDate), WagerSide> = HashMap::new();
    let mut settled = Vec::new();

    for w in wagers
        .iter_mut()
        .filter(|w| w.period < today && w.outcome.is_pending())
    {
        let key = (w.agent.clone(), w.period);
        let (yes, no) = pools.get(&key).copied().unwrap_or_default();
        let winner = *results.entry(key).or_insert_with(|| {
            let pnl = ledger.period_pnl(&w.agent, w.period);
            let side = winning_side(pnl);
            debug!(agent = %w.agent, period = %w.period, pnl, winner = %side, "Period result");
            side
        });

        let total_pool = yes.saturating_add(no);
        let winning_stake = match winner {
            WagerSide::Yes => yes,
            WagerSide::No => no,
        };

        let (outcome, payout) = if w.side == winner {
            (
                WagerOutcome::Win,
                parimutuel_payout(w.stake, total_pool, winning_stake),
            )
        } else {
            (WagerOutcome::Loss, 0)
        };

        if payout > 0 {
            ledger.credit(&w.participant, today, payout);
        }
        w.outcome = outcome;
        w.payout = Some(payout);

        info!(
            id = %w.id,
            agent = %w.agent,
            period = %w.period,
            side = %w.side,
            outcome = ?outcome,
            payout,
            "Performance wager settled"
        );

        settled.push(SettledWager {
            id: w.id,
            kind: WagerKind::Performance,
            participant: w.participant.clone(),
            outcome,
            payout,
            settled_at: now,
        });
    }

    settled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Hand, Outcome};
    use crate::types::RoundRecord;
    use uuid::Uuid;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn wager(participant: &str, side: WagerSide, stake: u64, period: NaiveDate) -> PerformanceWager {
        PerformanceWager {
            id: Uuid::new_v4(),
            participant: participant.into(),
            agent: "alpha".into(),
            period,
            side,
            stake,
            placed_at: Utc::now(),
            outcome: WagerOutcome::Pending,
            payout: None,
        }
    }

    fn round(pnl_outcome: Outcome, wager: u64, date: NaiveDate) -> RoundRecord {
        RoundRecord {
            round: 1,
            agent: "alpha".into(),
            opponent: None,
            date,
            wager,
            wager_rationale: None,
            hand: Hand::new(),
            dealer: Hand::new(),
            decisions: vec![],
            outcome: pnl_outcome,
            pnl: pnl_outcome.pnl(wager),
            balance_after: 0,
            settled_at: Utc::now(),
        }
    }

    #[test]
    fn test_winning_side_flat_is_no() {
        assert_eq!(winning_side(1), WagerSide::Yes);
        assert_eq!(winning_side(0), WagerSide::No);
        assert_eq!(winning_side(-5), WagerSide::No);
    }

    #[test]
    fn test_yes_pool_takes_everything() {
        let ledger = Ledger::new(0);
        ledger.append_round(round(Outcome::Win, 500, day(1)));
        let mut wagers = vec![
            wager("p30", WagerSide::Yes, 3_000, day(1)),
            wager("p10", WagerSide::No, 1_000, day(1)),
        ];

        let settled = settle_performance(&mut wagers, &ledger, day(2), Utc::now());
        assert_eq!(settled.len(), 2);
        assert_eq!(wagers[0].outcome, WagerOutcome::Win);
        assert_eq!(wagers[0].payout, Some(4_000));
        assert_eq!(wagers[1].outcome, WagerOutcome::Loss);
        assert_eq!(wagers[1].payout, Some(0));
        assert_eq!(ledger.get_or_init_balance("p30", day(2)), 4_000);
        assert_eq!(ledger.get_or_init_balance("p10", day(2)), 0);
    }

    #[test]
    fn test_open_period_is_not_settled() {
        let ledger = Ledger::new(0);
        let mut wagers = vec![wager("p", WagerSide::Yes, 100, day(2))];
        assert!(settle_performance(&mut wagers, &ledger, day(2), Utc::now()).is_empty());
        assert!(wagers[0].outcome.is_pending());
    }

    #[test]
    fn test_settlement_is_idempotent() {
        let ledger = Ledger::new(0);
        let mut wagers = vec![wager("p", WagerSide::No, 100, day(1))];
        assert_eq!(settle_performance(&mut wagers, &ledger, day(2), Utc::now()).len(), 1);
        assert!(settle_performance(&mut wagers, &ledger, day(2), Utc::now()).is_empty());
        assert_eq!(ledger.get_or_init_balance("p", day(2)), 100);
    }

    #[test]
    fn test_no_winning_stake_pays_nothing() {
        let ledger = Ledger::new(0);
        ledger.append_round(round(Outcome::Loss, 500, day(1)));
        let mut wagers = vec![
            wager("a", WagerSide::Yes, 700, day(1)),
            wager("b", WagerSide::Yes, 300, day(1)),
        ];
        settle_performance(&mut wagers, &ledger, day(2), Utc::now());
        assert!(wagers.iter().all(|w| w.outcome == WagerOutcome::Loss));
        assert!(wagers.iter().all(|w| w.payout == Some(0)));
    }

    #[test]
    fn test_payouts_sum_to_pool_within_rounding() {
        let ledger = Ledger::new(0);
        ledger.append_round(round(Outcome::Win, 500, day(1)));
        let mut wagers = vec![
            wager("a", WagerSide::Yes, 333, day(1)),
            wager("b", WagerSide::Yes, 333, day(1)),
            wager("c", WagerSide::Yes, 334, day(1)),
            wager("d", WagerSide::No, 1_001, day(1)),
        ];
        settle_performance(&mut wagers, &ledger, day(2), Utc::now());
        let paid: u64 = wagers.iter().filter_map(|w| w.payout).sum();
        assert!(paid <= 2_001);
        assert!(2_001 - paid < 3);
    }
}
