//! Head-to-head wager settlement.
//!
//! A wager resolves once both agents have each played `window` rounds
//! beyond the snapshot taken at placement. The agent whose P/L grew more
//! over that span wins; an exact tie is a push and refunds the stake.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

use super::{parimutuel_payout, SettledWager, WagerKind};
use crate::storage::Ledger;
use crate::types::{AgentStats, HeadToHeadWager, WagerOutcome};

/// Which agent (if any) came out ahead since placement. `None` is a push,
/// and so is an unready wager, so check [`window_complete`] first.
fn leader(wager: &HeadToHeadWager, now_a: AgentStats, now_b: AgentStats) -> Option<&str> {
    let delta_a = now_a.cumulative_pnl - wager.snapshot_a.cumulative_pnl;
    let delta_b = now_b.cumulative_pnl - wager.snapshot_b.cumulative_pnl;
    match delta_a.cmp(&delta_b) {
        std::cmp::Ordering::Greater => Some(wager.agent_a.as_str()),
        std::cmp::Ordering::Less => Some(wager.agent_b.as_str()),
        std::cmp::Ordering::Equal => None,
    }
}

pub fn window_complete(
    wager: &HeadToHeadWager,
    now_a: AgentStats,
    now_b: AgentStats,
    window: u64,
) -> bool {
    now_a.rounds_played >= wager.snapshot_a.rounds_played.saturating_add(window)
        && now_b.rounds_played >= wager.snapshot_b.rounds_played.saturating_add(window)
}

/// Stakes in the pool a wager belongs to: same unordered pair, same
/// placement date. Returns (total pool, stake backing `agent`).
fn pool_for(wagers: &[HeadToHeadWager], of: &HeadToHeadWager, agent: &str) -> (u64, u64) {
    wagers
        .iter()
        .filter(|w| w.placed_on == of.placed_on && w.covers_pair(&of.agent_a, &of.agent_b))
        .fold((0u64, 0u64), |(total, backing), w| {
            let backing = if w.backed == agent {
                backing.saturating_add(w.stake)
            } else {
                backing
            };
            (total.saturating_add(w.stake), backing)
        })
}

/// Settle every pending wager whose round window has completed.
/// Payouts are credited to participants on `today`.
pub fn settle_head_to_head(
    wagers: &mut [HeadToHeadWager],
    ledger: &Ledger,
    window: u64,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Vec<SettledWager> {
    let mut stats: HashMap<String, AgentStats> = HashMap::new();
    let mut stats_for = |agent: &str| -> AgentStats {
        *stats
            .entry(agent.to_string())
            .or_insert_with(|| ledger.agent_stats(agent))
    };

    // Decide first against an immutable view, then apply.
    let mut decisions: Vec<(usize, WagerOutcome, u64)> = Vec::new();
    for (idx, w) in wagers.iter().enumerate() {
        if !w.outcome.is_pending() {
            continue;
        }
        let now_a = stats_for(&w.agent_a);
        let now_b = stats_for(&w.agent_b);
        if !window_complete(w, now_a, now_b, window) {
            debug!(
                id = %w.id,
                a_rounds = now_a.rounds_played.saturating_sub(w.snapshot_a.rounds_played),
                b_rounds = now_b.rounds_played.saturating_sub(w.snapshot_b.rounds_played),
                window,
                "Head-to-head window still open"
            );
            continue;
        }

        let decision = match leader(w, now_a, now_b) {
            None => (idx, WagerOutcome::Push, w.stake),
            Some(winner) if winner == w.backed => {
                let (total, winning) = pool_for(wagers, w, winner);
                (idx, WagerOutcome::Win, parimutuel_payout(w.stake, total, winning))
            }
            Some(_) => (idx, WagerOutcome::Loss, 0),
        };
        decisions.push(decision);
    }

    let mut settled = Vec::with_capacity(decisions.len());
    for (idx, outcome, payout) in decisions {
        let w = &mut wagers[idx];
        if payout > 0 {
            ledger.credit(&w.participant, today, payout);
        }
        w.outcome = outcome;
        w.payout = Some(payout);

        info!(
            id = %w.id,
            agent_a = %w.agent_a,
            agent_b = %w.agent_b,
            backed = %w.backed,
            outcome = ?outcome,
            payout,
            "Head-to-head wager settled"
        );

        settled.push(SettledWager {
            id: w.id,
            kind: WagerKind::HeadToHead,
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

    fn play(ledger: &Ledger, agent: &str, outcome: Outcome, wager: u64) {
        ledger.append_round(RoundRecord {
            round: 1,
            agent: agent.into(),
            opponent: None,
            date: day(1),
            wager,
            wager_rationale: None,
            hand: Hand::new(),
            dealer: Hand::new(),
            decisions: vec![],
            outcome,
            pnl: outcome.pnl(wager),
            balance_after: 0,
            settled_at: Utc::now(),
        });
    }

    fn wager(ledger: &Ledger, participant: &str, backed: &str, stake: u64) -> HeadToHeadWager {
        HeadToHeadWager {
            id: Uuid::new_v4(),
            participant: participant.into(),
            agent_a: "alpha".into(),
            agent_b: "beta".into(),
            backed: backed.into(),
            stake,
            placed_on: day(1),
            placed_at: Utc::now(),
            snapshot_a: ledger.agent_stats("alpha"),
            snapshot_b: ledger.agent_stats("beta"),
            outcome: WagerOutcome::Pending,
            payout: None,
        }
    }

    #[test]
    fn test_waits_for_both_agents_window() {
        let ledger = Ledger::new(0);
        let mut wagers = vec![wager(&ledger, "p", "alpha", 100)];
        for _ in 0..3 {
            play(&ledger, "alpha", Outcome::Win, 100);
        }
        play(&ledger, "beta", Outcome::Loss, 100);
        play(&ledger, "beta", Outcome::Loss, 100);

        assert!(settle_head_to_head(&mut wagers, &ledger, 3, day(1), Utc::now()).is_empty());
        assert!(wagers[0].outcome.is_pending());

        play(&ledger, "beta", Outcome::Loss, 100);
        let settled = settle_head_to_head(&mut wagers, &ledger, 3, day(1), Utc::now());
        assert_eq!(settled.len(), 1);
        assert_eq!(wagers[0].outcome, WagerOutcome::Win);
    }

    #[test]
    fn test_pool_split_between_backers() {
        let ledger = Ledger::new(0);
        let mut wagers = vec![
            wager(&ledger, "a1", "alpha", 600),
            wager(&ledger, "a2", "alpha", 200),
            wager(&ledger, "b1", "beta", 400),
        ];
        for _ in 0..3 {
            play(&ledger, "alpha", Outcome::Win, 100);
            play(&ledger, "beta", Outcome::Push, 100);
        }
        settle_head_to_head(&mut wagers, &ledger, 3, day(4), Utc::now());

        assert_eq!(wagers[0].payout, Some(900));
        assert_eq!(wagers[1].payout, Some(300));
        assert_eq!(wagers[2].outcome, WagerOutcome::Loss);
        assert_eq!(wagers[2].payout, Some(0));
        assert_eq!(ledger.get_or_init_balance("a1", day(4)), 900);
    }

    #[test]
    fn test_equal_gain_is_push_refund() {
        let ledger = Ledger::new(0);
        play(&ledger, "alpha", Outcome::Loss, 1_000);
        let mut wagers = vec![wager(&ledger, "p", "beta", 250)];
        for _ in 0..3 {
            play(&ledger, "alpha", Outcome::Win, 100);
            play(&ledger, "beta", Outcome::Win, 100);
        }
        settle_head_to_head(&mut wagers, &ledger, 3, day(2), Utc::now());
        assert_eq!(wagers[0].outcome, WagerOutcome::Push);
        assert_eq!(wagers[0].payout, Some(250));
        assert_eq!(ledger.get_or_init_balance("p", day(2)), 250);
    }

    #[test]
    fn test_pools_scoped_to_placement_date() {
        let ledger = Ledger::new(0);
        let mut other_day = wager(&ledger, "x", "beta", 10_000);
        other_day.placed_on = day(2);
        let mut wagers = vec![wager(&ledger, "p", "alpha", 100), other_day];
        for _ in 0..3 {
            play(&ledger, "alpha", Outcome::Win, 100);
            play(&ledger, "beta", Outcome::Loss, 100);
        }
        settle_head_to_head(&mut wagers, &ledger, 3, day(3), Utc::now());
        // Alone in its pool: gets its own stake back as the winner.
        assert_eq!(wagers[0].payout, Some(100));
        assert_eq!(wagers[1].payout, Some(0));
    }

    #[test]
    fn test_settled_wagers_are_skipped() {
        let ledger = Ledger::new(0);
        let mut wagers = vec![wager(&ledger, "p", "alpha", 100)];
        for _ in 0..3 {
            play(&ledger, "alpha", Outcome::Win, 100);
            play(&ledger, "beta", Outcome::Loss, 100);
        }
        assert_eq!(settle_head_to_head(&mut wagers, &ledger, 3, day(2), Utc::now()).len(), 1);
        assert!(settle_head_to_head(&mut wagers, &ledger, 3, day(2), Utc::now()).is_empty());
        assert_eq!(ledger.get_or_init_balance("p", day(2)), 100);
    }
}
