//! Wager book — the record of every market wager, open or settled.
//!
//! Owns the wager lifecycle. Placement debits the participant's ledger
//! account; nothing else in the crate writes wager records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::types::{HeadToHeadWager, PerformanceWager};

/// Serializable copy of the book.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WagerBookSnapshot {
    pub performance: Vec<PerformanceWager>,
    pub head_to_head: Vec<HeadToHeadWager>,
}

/// Mutable book contents, only reachable through [`WagerBook::lock`].
#[derive(Debug, Default)]
pub struct BookState {
    pub performance: Vec<PerformanceWager>,
    pub head_to_head: Vec<HeadToHeadWager>,
}

#[derive(Default)]
pub struct WagerBook {
    state: Mutex<BookState>,
}

impl WagerBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(snapshot: WagerBookSnapshot) -> Self {
        Self {
            state: Mutex::new(BookState {
                performance: snapshot.performance,
                head_to_head: snapshot.head_to_head,
            }),
        }
    }

    /// Lock the book. Callers that also touch the ledger must take this
    /// lock first.
    pub fn lock(&self) -> MutexGuard<'_, BookState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_performance(&self, wager: PerformanceWager) {
        self.lock().performance.push(wager);
    }

    pub fn insert_head_to_head(&self, wager: HeadToHeadWager) {
        self.lock().head_to_head.push(wager);
    }

    /// Performance wagers on `agent` for `period`, oldest placement first.
    pub fn performance_for(&self, agent: &str, period: NaiveDate) -> Vec<PerformanceWager> {
        let mut wagers: Vec<PerformanceWager> = self
            .lock()
            .performance
            .iter()
            .filter(|w| w.agent == agent && w.period == period)
            .cloned()
            .collect();
        wagers.sort_by_key(|w| w.placed_at);
        wagers
    }

    /// Head-to-head wagers on the unordered pair, oldest placement first.
    pub fn head_to_head_for(&self, x: &str, y: &str) -> Vec<HeadToHeadWager> {
        let mut wagers: Vec<HeadToHeadWager> = self
            .lock()
            .head_to_head
            .iter()
            .filter(|w| w.covers_pair(x, y))
            .cloned()
            .collect();
        wagers.sort_by_key(|w| w.placed_at);
        wagers
    }

    /// Look a wager of either kind up by id.
    pub fn find(&self, id: Uuid) -> Option<WagerView> {
        let state = self.lock();
        if let Some(w) = state.performance.iter().find(|w| w.id == id) {
            return Some(WagerView::Performance(w.clone()));
        }
        state
            .head_to_head
            .iter()
            .find(|w| w.id == id)
            .map(|w| WagerView::HeadToHead(w.clone()))
    }

    pub fn pending_count(&self) -> usize {
        let state = self.lock();
        state.performance.iter().filter(|w| w.outcome.is_pending()).count()
            + state.head_to_head.iter().filter(|w| w.outcome.is_pending()).count()
    }

    pub fn snapshot(&self) -> WagerBookSnapshot {
        let state = self.lock();
        WagerBookSnapshot {
            performance: state.performance.clone(),
            head_to_head: state.head_to_head.clone(),
        }
    }
}

/// Either kind of wager, as returned to API callers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WagerView {
    Performance(PerformanceWager),
    HeadToHead(HeadToHeadWager),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentStats, WagerOutcome, WagerSide};
    use chrono::{Duration, Utc};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn perf(agent: &str, period: NaiveDate, offset_secs: i64) -> PerformanceWager {
        PerformanceWager {
            id: Uuid::new_v4(),
            participant: "crowd".into(),
            agent: agent.into(),
            period,
            side: WagerSide::Yes,
            stake: 100,
            placed_at: Utc::now() + Duration::seconds(offset_secs),
            outcome: WagerOutcome::Pending,
            payout: None,
        }
    }

    fn h2h(a: &str, b: &str) -> HeadToHeadWager {
        HeadToHeadWager {
            id: Uuid::new_v4(),
            participant: "crowd".into(),
            agent_a: a.into(),
            agent_b: b.into(),
            backed: a.into(),
            stake: 100,
            placed_on: day(1),
            placed_at: Utc::now(),
            snapshot_a: AgentStats::default(),
            snapshot_b: AgentStats::default(),
            outcome: WagerOutcome::Pending,
            payout: None,
        }
    }

    #[test]
    fn test_performance_for_filters_and_orders() {
        let book = WagerBook::new();
        let later = perf("alpha", day(1), 10);
        let earlier = perf("alpha", day(1), -10);
        book.insert_performance(later.clone());
        book.insert_performance(earlier.clone());
        book.insert_performance(perf("alpha", day(2), 0));
        book.insert_performance(perf("beta", day(1), 0));

        let found = book.performance_for("alpha", day(1));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, earlier.id);
        assert_eq!(found[1].id, later.id);
    }

    #[test]
    fn test_head_to_head_for_either_order() {
        let book = WagerBook::new();
        book.insert_head_to_head(h2h("alpha", "beta"));
        book.insert_head_to_head(h2h("beta", "alpha"));
        book.insert_head_to_head(h2h("alpha", "gamma"));
        assert_eq!(book.head_to_head_for("alpha", "beta").len(), 2);
        assert_eq!(book.pending_count(), 3);
    }

    #[test]
    fn test_find_and_snapshot_restore() {
        let book = WagerBook::new();
        let p = perf("alpha", day(1), 0);
        let h = h2h("alpha", "beta");
        book.insert_performance(p.clone());
        book.insert_head_to_head(h.clone());

        assert!(matches!(book.find(p.id), Some(WagerView::Performance(_))));
        assert!(matches!(book.find(h.id), Some(WagerView::HeadToHead(_))));
        assert!(book.find(Uuid::new_v4()).is_none());

        let restored = WagerBook::restore(book.snapshot());
        assert_eq!(restored.pending_count(), 2);
    }
}
