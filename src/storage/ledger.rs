//! Bankroll ledger.
//!
//! Daily balances per (account, date) plus the append-only history of
//! settled rounds. Each operation takes the ledger lock for its whole
//! check-then-mutate step, so balances can never go negative even with
//! concurrent runs for the same agent and day.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::game::Outcome;
use crate::types::{AgentStats, LeaderboardEntry, RoundRecord};

/// Result of a debit attempt. A decline is a normal outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debit {
    Accepted { balance: u64 },
    Declined { balance: u64 },
}

impl Debit {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Debit::Accepted { .. })
    }

    pub fn balance(&self) -> u64 {
        match self {
            Debit::Accepted { balance } | Debit::Declined { balance } => *balance,
        }
    }
}

/// One persisted daily balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub account: String,
    pub date: NaiveDate,
    pub balance: u64,
}

/// Serializable copy of the ledger contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub balances: Vec<BalanceEntry>,
    pub rounds: Vec<RoundRecord>,
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<(String, NaiveDate), u64>,
    rounds: Vec<RoundRecord>,
}

impl LedgerState {
    fn balance_mut(&mut self, allowance: u64, account: &str, date: NaiveDate) -> &mut u64 {
        self.balances
            .entry((account.to_string(), date))
            .or_insert_with(|| {
                debug!(account, %date, allowance, "Seeding daily bankroll");
                allowance
            })
    }
}

pub struct Ledger {
    allowance: u64,
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Empty ledger seeding every new (account, date) with `allowance` cents.
    pub fn new(allowance: u64) -> Self {
        Self {
            allowance,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Rebuild a ledger from a snapshot.
    pub fn restore(allowance: u64, snapshot: LedgerSnapshot) -> Self {
        let balances = snapshot
            .balances
            .into_iter()
            .map(|e| ((e.account, e.date), e.balance))
            .collect();
        Self {
            allowance,
            state: Mutex::new(LedgerState {
                balances,
                rounds: snapshot.rounds,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // Every critical section leaves the state consistent, so a
        // poisoned lock still holds valid data.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn allowance(&self) -> u64 {
        self.allowance
    }

    /// Balance for the day, seeding the daily allowance on first access.
    pub fn get_or_init_balance(&self, account: &str, date: NaiveDate) -> u64 {
        *self.lock().balance_mut(self.allowance, account, date)
    }

    /// Take `amount` from the balance if it covers it.
    pub fn debit(&self, account: &str, date: NaiveDate, amount: u64) -> Debit {
        let mut state = self.lock();
        let balance = state.balance_mut(self.allowance, account, date);
        if amount > *balance {
            return Debit::Declined { balance: *balance };
        }
        *balance -= amount;
        Debit::Accepted { balance: *balance }
    }

    /// Add `amount` to the balance; returns the new balance.
    pub fn credit(&self, account: &str, date: NaiveDate, amount: u64) -> u64 {
        let mut state = self.lock();
        let balance = state.balance_mut(self.allowance, account, date);
        *balance = balance.saturating_add(amount);
        *balance
    }

    /// Append a settled round to the history.
    pub fn append_round(&self, record: RoundRecord) {
        self.lock().rounds.push(record);
    }

    pub fn rounds_for(&self, agent: &str) -> Vec<RoundRecord> {
        self.lock()
            .rounds
            .iter()
            .filter(|r| r.agent == agent)
            .cloned()
            .collect()
    }

    pub fn round_count(&self) -> usize {
        self.lock().rounds.len()
    }

    /// Rounds played and cumulative P/L over the agent's whole history.
    pub fn agent_stats(&self, agent: &str) -> AgentStats {
        self.lock()
            .rounds
            .iter()
            .filter(|r| r.agent == agent)
            .fold(AgentStats::default(), |acc, r| AgentStats {
                rounds_played: acc.rounds_played + 1,
                cumulative_pnl: acc.cumulative_pnl + r.pnl,
            })
    }

    /// Net P/L of the agent's rounds on `date`.
    pub fn period_pnl(&self, agent: &str, date: NaiveDate) -> i64 {
        self.lock()
            .rounds
            .iter()
            .filter(|r| r.agent == agent && r.date == date)
            .map(|r| r.pnl)
            .sum()
    }

    /// Per-agent results, best net P/L first. `None` covers all dates.
    pub fn leaderboard(&self, date: Option<NaiveDate>) -> Vec<LeaderboardEntry> {
        let state = self.lock();
        let mut by_agent: BTreeMap<&str, LeaderboardEntry> = BTreeMap::new();
        for r in state.rounds.iter().filter(|r| date.map_or(true, |d| r.date == d)) {
            let entry = by_agent.entry(&r.agent).or_insert_with(|| LeaderboardEntry {
                agent: r.agent.clone(),
                rounds: 0,
                wins: 0,
                losses: 0,
                pushes: 0,
                net_pnl: 0,
            });
            entry.rounds += 1;
            entry.net_pnl += r.pnl;
            match r.outcome {
                Outcome::Win => entry.wins += 1,
                Outcome::Loss => entry.losses += 1,
                Outcome::Push => entry.pushes += 1,
            }
        }
        let mut entries: Vec<LeaderboardEntry> = by_agent.into_values().collect();
        entries.sort_by(|a, b| b.net_pnl.cmp(&a.net_pnl).then_with(|| a.agent.cmp(&b.agent)));
        entries
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.lock();
        let mut balances: Vec<BalanceEntry> = state
            .balances
            .iter()
            .map(|((account, date), balance)| BalanceEntry {
                account: account.clone(),
                date: *date,
                balance: *balance,
            })
            .collect();
        balances.sort_by(|a, b| a.account.cmp(&b.account).then(a.date.cmp(&b.date)));
        LedgerSnapshot {
            balances,
            rounds: state.rounds.clone(),
        }
    }
}
