//! Core engine — the deal → wager → play → settle round loop.
//!
//! The [`Orchestrator`] runs a sequence of rounds for one agent, or for two
//! agents sharing a dealer ("VS"). It is the only writer of round records.
//! Rounds are never interrupted: the run-level deadline and bankroll
//! checks happen between rounds.

pub mod accountant;
pub(crate) mod round;
pub(crate) mod seat;
pub mod telemetry;

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::audit::AuditPublisher;
use crate::config::TableConfig;
use crate::game::Shoe;
use crate::llm::AgentRegistry;
use crate::storage::Ledger;
use crate::types::{format_cents, AgentId, ArenaError, RoundRecord};
use round::RoundContext;
use seat::Seat;

pub use telemetry::{RoundEvent, StopReason, Telemetry};

// ---------------------------------------------------------------------------
// Table limits
// ---------------------------------------------------------------------------

/// Table rules in cents and wall-clock bounds.
#[derive(Debug, Clone)]
pub struct TableLimits {
    pub min_wager: u64,
    pub max_wager: u64,
    pub rounds_per_run: u32,
    pub agent_timeout: Duration,
    pub run_timeout: Duration,
}

impl TableLimits {
    pub fn from_config(cfg: &TableConfig) -> Result<Self> {
        Ok(Self {
            min_wager: cfg.min_wager_cents()?,
            max_wager: cfg.max_wager_cents()?,
            rounds_per_run: cfg.rounds_per_run,
            agent_timeout: cfg.agent_timeout(),
            run_timeout: cfg.run_timeout(),
        })
    }
}

// ---------------------------------------------------------------------------
// Requests and summaries
// ---------------------------------------------------------------------------

/// Who sits at the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matchup {
    Solo(AgentId),
    Versus(AgentId, AgentId),
}

impl Matchup {
    /// One id plays solo, two distinct ids play VS.
    pub fn from_agents(mut agents: Vec<AgentId>) -> Result<Self, ArenaError> {
        match agents.len() {
            1 => Ok(Matchup::Solo(agents.remove(0))),
            2 => {
                let b = agents.remove(1);
                let a = agents.remove(0);
                if a == b {
                    return Err(ArenaError::InvalidMatchup(format!("{a} cannot play itself")));
                }
                Ok(Matchup::Versus(a, b))
            }
            n => Err(ArenaError::InvalidMatchup(format!(
                "expected one or two agents, got {n}"
            ))),
        }
    }

    pub fn agents(&self) -> Vec<&str> {
        match self {
            Matchup::Solo(a) => vec![a.as_str()],
            Matchup::Versus(a, b) => vec![a.as_str(), b.as_str()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub matchup: Matchup,
    /// Overrides the table's rounds per run.
    pub rounds: Option<u32>,
    /// Ledger date the run plays on.
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub rounds_played: u32,
    pub records: Vec<RoundRecord>,
    pub stop: StopReason,
}

impl RunSummary {
    pub fn net_pnl(&self, agent: &str) -> i64 {
        self.records
            .iter()
            .filter(|r| r.agent == agent)
            .map(|r| r.pnl)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    limits: TableLimits,
    ledger: Arc<Ledger>,
    registry: Arc<AgentRegistry>,
    audit: Option<Arc<dyn AuditPublisher>>,
}

impl Orchestrator {
    pub fn new(limits: TableLimits, ledger: Arc<Ledger>, registry: Arc<AgentRegistry>) -> Self {
        Self {
            limits,
            ledger,
            registry,
            audit: None,
        }
    }

    pub fn with_audit(mut self, publisher: Arc<dyn AuditPublisher>) -> Self {
        self.audit = Some(publisher);
        self
    }

    pub fn limits(&self) -> &TableLimits {
        &self.limits
    }

    /// Resolve every agent before anything is touched.
    fn seat_up(&self, matchup: &Matchup) -> Result<Vec<Seat>, ArenaError> {
        matchup
            .agents()
            .into_iter()
            .map(|id| Ok(Seat::new(id.to_string(), self.registry.get(id)?)))
            .collect()
    }

    /// First seat that cannot cover the table minimum, if any.
    fn short_seat(&self, seats: &[Seat], date: NaiveDate) -> Option<StopReason> {
        seats.iter().find_map(|seat| {
            let balance = self.ledger.get_or_init_balance(&seat.agent, date);
            (balance < self.limits.min_wager).then(|| StopReason::InsufficientFunds {
                agent: seat.agent.clone(),
                balance,
                minimum: self.limits.min_wager,
            })
        })
    }

    /// Play a run to completion, streaming events into `telemetry`.
    ///
    /// Ends with `Done` and a summary, or with `Error` and the error when
    /// a round has to be abandoned. Rounds settled before the error stay
    /// committed.
    pub async fn run(
        &self,
        request: RunRequest,
        shoe: &mut dyn Shoe,
        mut telemetry: Telemetry,
    ) -> Result<RunSummary, ArenaError> {
        let mut seats = match self.seat_up(&request.matchup) {
            Ok(seats) => seats,
            Err(e) => {
                warn!(error = %e, "Run rejected");
                telemetry.emit(RoundEvent::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let rounds = request.rounds.unwrap_or(self.limits.rounds_per_run);
        let deadline = Instant::now() + self.limits.run_timeout;
        let ctx = RoundContext {
            limits: &self.limits,
            ledger: &self.ledger,
            audit: self.audit.as_ref(),
            date: request.date,
        };

        info!(
            agents = ?request.matchup.agents(),
            rounds,
            date = %request.date,
            "Run started"
        );

        let mut records = Vec::new();
        let mut played = 0u32;
        let stop = loop {
            if played >= rounds {
                break StopReason::Completed;
            }
            if played > 0 && Instant::now() >= deadline {
                warn!(played, rounds, "Run deadline passed, stopping between rounds");
                break StopReason::TimedOut;
            }
            if let Some(stop) = self.short_seat(&seats, request.date) {
                info!(?stop, "Bankroll below table minimum, stopping");
                break stop;
            }

            for seat in seats.iter_mut() {
                seat.reset();
            }
            let mut deck = shoe.fresh_deck();
            match round::play_round(&ctx, played + 1, &mut seats, &mut deck, &mut telemetry).await {
                Ok(mut settled) => {
                    records.append(&mut settled);
                    played += 1;
                }
                Err(e) => {
                    error!(round = played + 1, error = %e, "Round abandoned");
                    telemetry.emit(RoundEvent::Error {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            }
        };

        let summary = RunSummary {
            rounds_played: played,
            records,
            stop,
        };
        for agent in request.matchup.agents() {
            info!(
                agent,
                rounds = summary.rounds_played,
                pnl = %format_cents(summary.net_pnl(agent)),
                stop = ?summary.stop,
                "Run complete"
            );
        }
        telemetry.emit(RoundEvent::Done {
            rounds_played: summary.rounds_played,
            stop: summary.stop.clone(),
        });
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Card, Deck, Outcome, Rank, Suit};
    use crate::llm::scripted::ScriptedGateway;

    /// Deals the same stacked deck every round.
    struct StackedShoe(Vec<Card>);

    impl Shoe for StackedShoe {
        fn fresh_deck(&mut self) -> Deck {
            Deck::from_top(self.0.clone())
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn limits(rounds: u32) -> TableLimits {
        TableLimits {
            min_wager: 1_000,
            max_wager: 500_000,
            rounds_per_run: rounds,
            agent_timeout: Duration::from_secs(5),
            run_timeout: Duration::from_secs(60),
        }
    }

    fn registry(agents: &[(&str, &[&str])]) -> Arc<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        for (id, replies) in agents {
            let gateway = ScriptedGateway::new(replies.iter().map(|r| r.to_string()).collect()).cycling();
            registry.register(*id, Arc::new(gateway));
        }
        Arc::new(registry)
    }

    fn losing_sixteen() -> StackedShoe {
        StackedShoe(vec![
            Card::new(Rank::Ten, Suit::Spades),
            Card::new(Rank::Six, Suit::Hearts),
            Card::new(Rank::King, Suit::Diamonds),
            Card::new(Rank::Nine, Suit::Clubs),
        ])
    }

    #[test]
    fn test_matchup_from_agents() {
        assert_eq!(
            Matchup::from_agents(vec!["a".into()]).unwrap(),
            Matchup::Solo("a".into())
        );
        assert_eq!(
            Matchup::from_agents(vec!["a".into(), "b".into()]).unwrap(),
            Matchup::Versus("a".into(), "b".into())
        );
        assert!(Matchup::from_agents(vec!["a".into(), "a".into()]).is_err());
        assert!(Matchup::from_agents(vec![]).is_err());
        assert!(Matchup::from_agents(vec!["a".into(), "b".into(), "c".into()]).is_err());
    }

    #[tokio::test]
    async fn test_worked_example_single_round() {
        let ledger = Arc::new(Ledger::new(10_000_000));
        let orch = Orchestrator::new(
            limits(1),
            Arc::clone(&ledger),
            registry(&[("alpha", &["WAGER: $1,000.00", "DECISION: STAND"])]),
        );
        let (telemetry, mut rx) = Telemetry::channel();

        let summary = orch
            .run(
                RunRequest {
                    matchup: Matchup::Solo("alpha".into()),
                    rounds: None,
                    date: day(),
                },
                &mut losing_sixteen(),
                telemetry,
            )
            .await
            .unwrap();

        assert_eq!(summary.rounds_played, 1);
        assert_eq!(summary.stop, StopReason::Completed);
        let record = &summary.records[0];
        assert_eq!(record.wager, 100_000);
        assert_eq!(record.outcome, Outcome::Loss);
        assert_eq!(record.pnl, -100_000);
        assert_eq!(record.balance_after, 9_900_000);
        assert_eq!(ledger.get_or_init_balance("alpha", day()), 9_900_000);

        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                RoundEvent::RoundStarted { .. } => "round_started",
                RoundEvent::CardsDealt { .. } => "cards_dealt",
                RoundEvent::WagerPlaced { .. } => "wager_placed",
                RoundEvent::ReasoningFragment { .. } => "reasoning_fragment",
                RoundEvent::DecisionMade { .. } => "decision_made",
                RoundEvent::CardDrawn { .. } => "card_drawn",
                RoundEvent::DealerRevealed { .. } => "dealer_revealed",
                RoundEvent::DealerDrew { .. } => "dealer_drew",
                RoundEvent::Outcome { .. } => "outcome",
                RoundEvent::RoundEnded { .. } => "round_ended",
                RoundEvent::Done { .. } => "done",
                RoundEvent::Error { .. } => "error",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "round_started",
                "cards_dealt",
                "wager_placed",
                "decision_made",
                "dealer_revealed",
                "outcome",
                "round_ended",
                "done"
            ]
        );
    }

    #[tokio::test]
    async fn test_run_stops_when_bankroll_below_minimum() {
        // Allowance covers exactly two minimum losses.
        let ledger = Arc::new(Ledger::new(2_000));
        let orch = Orchestrator::new(
            limits(5),
            Arc::clone(&ledger),
            registry(&[("alpha", &["WAGER: 10", "DECISION: STAND"])]),
        );
        let summary = orch
            .run(
                RunRequest {
                    matchup: Matchup::Solo("alpha".into()),
                    rounds: None,
                    date: day(),
                },
                &mut losing_sixteen(),
                Telemetry::disabled(),
            )
            .await
            .unwrap();

        assert_eq!(summary.rounds_played, 2);
        assert_eq!(
            summary.stop,
            StopReason::InsufficientFunds {
                agent: "alpha".into(),
                balance: 0,
                minimum: 1_000
            }
        );
        assert_eq!(summary.net_pnl("alpha"), -2_000);
    }

    #[tokio::test]
    async fn test_unknown_agent_rejected_before_mutation() {
        let ledger = Arc::new(Ledger::new(10_000));
        let orch = Orchestrator::new(
            limits(1),
            Arc::clone(&ledger),
            registry(&[("alpha", &["WAGER: 10"])]),
        );
        let (telemetry, mut rx) = Telemetry::channel();
        let err = orch
            .run(
                RunRequest {
                    matchup: Matchup::Versus("alpha".into(), "ghost".into()),
                    rounds: None,
                    date: day(),
                },
                &mut losing_sixteen(),
                telemetry,
            )
            .await
            .unwrap_err();
        assert_eq!(err, ArenaError::UnknownAgent("ghost".into()));
        assert!(matches!(rx.try_recv(), Ok(RoundEvent::Error { .. })));
        assert!(ledger.snapshot().balances.is_empty());
    }

    #[tokio::test]
    async fn test_rounds_override_and_disconnected_consumer() {
        let ledger = Arc::new(Ledger::new(100_000));
        let orch = Orchestrator::new(
            limits(5),
            Arc::clone(&ledger),
            registry(&[("alpha", &["WAGER: 10", "DECISION: STAND"])]),
        );
        let (telemetry, rx) = Telemetry::channel();
        drop(rx);

        let summary = orch
            .run(
                RunRequest {
                    matchup: Matchup::Solo("alpha".into()),
                    rounds: Some(3),
                    date: day(),
                },
                &mut losing_sixteen(),
                telemetry,
            )
            .await
            .unwrap();
        assert_eq!(summary.rounds_played, 3);
        assert_eq!(ledger.round_count(), 3);
        assert_eq!(ledger.get_or_init_balance("alpha", day()), 97_000);
    }

    #[tokio::test]
    async fn test_versus_records_opponents() {
        let ledger = Arc::new(Ledger::new(100_000));
        let orch = Orchestrator::new(
            limits(1),
            Arc::clone(&ledger),
            registry(&[
                ("alpha", &["WAGER: 10", "DECISION: STAND"]),
                ("beta", &["WAGER: 30", "DECISION: STAND"]),
            ]),
        );
        // alpha 10 6, beta 9 9, dealer K 7.
        let mut shoe = StackedShoe(vec![
            Card::new(Rank::Ten, Suit::Spades),
            Card::new(Rank::Six, Suit::Hearts),
            Card::new(Rank::Nine, Suit::Spades),
            Card::new(Rank::Nine, Suit::Hearts),
            Card::new(Rank::King, Suit::Diamonds),
            Card::new(Rank::Seven, Suit::Clubs),
        ]);
        let summary = orch
            .run(
                RunRequest {
                    matchup: Matchup::Versus("alpha".into(), "beta".into()),
                    rounds: None,
                    date: day(),
                },
                &mut shoe,
                Telemetry::disabled(),
            )
            .await
            .unwrap();

        assert_eq!(summary.records.len(), 2);
        assert_eq!(summary.net_pnl("alpha"), -1_000);
        assert_eq!(summary.net_pnl("beta"), 3_000);
        assert_eq!(summary.records[1].opponent.as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn test_run_deadline_checked_between_rounds() {
        let ledger = Arc::new(Ledger::new(100_000));
        let mut table = limits(5);
        table.run_timeout = Duration::ZERO;
        let orch = Orchestrator::new(
            table,
            Arc::clone(&ledger),
            registry(&[("alpha", &["WAGER: 10", "DECISION: STAND"])]),
        );
        let summary = orch
            .run(
                RunRequest {
                    matchup: Matchup::Solo("alpha".into()),
                    rounds: None,
                    date: day(),
                },
                &mut losing_sixteen(),
                Telemetry::disabled(),
            )
            .await
            .unwrap();
        // The first round always plays; the deadline stops the rest.
        assert_eq!(summary.rounds_played, 1);
        assert_eq!(summary.stop, StopReason::TimedOut);
    }
}
