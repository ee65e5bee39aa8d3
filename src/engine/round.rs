//! A single round, start to settlement, for one or two seats.
//!
//! Deal order is every seat's two cards (A, A, B, B), then the dealer's
//! up card and hole card. Wagers are asked after the deal, seat by seat.
//! Every seat plays against the same dealer hand.

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::debug;

use super::accountant::Accountant;
use super::seat::Seat;
use super::telemetry::{RoundEvent, Telemetry};
use super::TableLimits;
use crate::audit::AuditPublisher;
use crate::game::{self, Card, Deck, Hand, DEALER_STANDS_ON};
use crate::protocol::WagerLimits;
use crate::storage::{Debit, Ledger};
use crate::types::{ArenaError, PlayDecision, RoundRecord};

/// Highest hand value an agent is still asked about.
const BLACKJACK: u32 = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Dealt,
    Wagered,
    Played,
    DealerResolved,
    Settled,
}

pub(crate) struct RoundContext<'a> {
    pub limits: &'a TableLimits,
    pub ledger: &'a Ledger,
    pub audit: Option<&'a Arc<dyn AuditPublisher>>,
    pub date: NaiveDate,
}

impl RoundContext<'_> {
    fn accountant(&self) -> Accountant<'_> {
        Accountant {
            ledger: self.ledger,
            audit: self.audit,
            date: self.date,
        }
    }
}

fn advance(round: u32, phase: &mut Phase, next: Phase) {
    debug!(round, from = ?*phase, to = ?next, "Round phase");
    *phase = next;
}

fn draw(deck: &mut Deck) -> Result<Card, ArenaError> {
    deck.draw().ok_or(ArenaError::DeckExhausted)
}

/// Give back every placed wager in a round that cannot finish.
fn abort(ctx: &RoundContext<'_>, seats: &[Seat]) {
    let accountant = ctx.accountant();
    for seat in seats.iter().filter(|s| s.wager > 0) {
        accountant.refund(seat);
    }
}

/// Play one round. Seats must be freshly reset.
pub(crate) async fn play_round(
    ctx: &RoundContext<'_>,
    round: u32,
    seats: &mut [Seat],
    deck: &mut Deck,
    telemetry: &mut Telemetry,
) -> Result<Vec<RoundRecord>, ArenaError> {
    let mut phase = Phase::Start;
    telemetry.emit(RoundEvent::RoundStarted {
        round,
        agents: seats.iter().map(|s| s.agent.clone()).collect(),
    });

    // -- Deal ------------------------------------------------------------

    for seat in seats.iter_mut() {
        seat.hand.push(draw(deck)?);
        seat.hand.push(draw(deck)?);
    }
    let dealer_up = draw(deck)?;
    let hole = draw(deck)?;
    let mut dealer = Hand::from_cards(vec![dealer_up, hole]);

    telemetry.emit(RoundEvent::CardsDealt {
        round,
        hands: seats
            .iter()
            .map(|s| (s.agent.clone(), s.hand.cards().to_vec()))
            .collect(),
        dealer_up,
    });
    advance(round, &mut phase, Phase::Dealt);

    // -- Wagers ----------------------------------------------------------

    for i in 0..seats.len() {
        let balance = ctx.ledger.get_or_init_balance(&seats[i].agent, ctx.date);
        let limits = WagerLimits::for_balance(ctx.limits.min_wager, ctx.limits.max_wager, balance);
        let reply = seats[i]
            .ask_wager(round, balance, limits, dealer_up, ctx.limits.agent_timeout)
            .await;
        let parsed = reply.parsed;

        match ctx.ledger.debit(&seats[i].agent, ctx.date, parsed.amount) {
            Debit::Accepted { balance } => {
                let seat = &mut seats[i];
                seat.wager = parsed.amount;
                seat.wager_rationale = parsed.rationale;
                telemetry.emit(RoundEvent::WagerPlaced {
                    round,
                    agent: seat.agent.clone(),
                    amount: parsed.amount,
                    balance,
                    fallback: parsed.fallback,
                });
                for event in reply.reasoning {
                    telemetry.emit(event);
                }
            }
            Debit::Declined { balance } => {
                abort(ctx, &seats[..i]);
                return Err(ArenaError::InsufficientFunds {
                    account: seats[i].agent.clone(),
                    needed: parsed.amount,
                    available: balance,
                });
            }
        }
    }
    advance(round, &mut phase, Phase::Wagered);

    // -- Play --------------------------------------------------------------

    for i in 0..seats.len() {
        loop {
            let seat = &mut seats[i];
            let value = seat.hand.value();
            if seat.hand.is_bust() || value >= BLACKJACK {
                break;
            }

            let parsed = seat
                .ask_decision(round, dealer_up, ctx.limits.agent_timeout, telemetry)
                .await;
            seat.record(&parsed, value);
            telemetry.emit(RoundEvent::DecisionMade {
                round,
                agent: seat.agent.clone(),
                decision: parsed.decision,
                hand_value: value,
                fallback: parsed.fallback,
                rationale: parsed.rationale.clone(),
            });

            if parsed.decision == PlayDecision::Stand {
                break;
            }

            let Some(card) = deck.draw() else {
                abort(ctx, seats);
                return Err(ArenaError::DeckExhausted);
            };
            let seat = &mut seats[i];
            seat.hand.push(card);
            telemetry.emit(RoundEvent::CardDrawn {
                round,
                agent: seat.agent.clone(),
                card,
                hand_value: seat.hand.value(),
                bust: seat.hand.is_bust(),
            });
        }
    }
    advance(round, &mut phase, Phase::Played);

    // -- Dealer ----------------------------------------------------------

    telemetry.emit(RoundEvent::DealerRevealed {
        round,
        hole,
        dealer_value: dealer.value(),
    });

    if seats.iter().any(|s| !s.hand.is_bust()) {
        let mut running = dealer.clone();
        for card in game::play_dealer(deck, &mut dealer) {
            running.push(card);
            telemetry.emit(RoundEvent::DealerDrew {
                round,
                card,
                dealer_value: running.value(),
            });
        }
        if dealer.value() < DEALER_STANDS_ON {
            abort(ctx, seats);
            return Err(ArenaError::DeckExhausted);
        }
    }
    advance(round, &mut phase, Phase::DealerResolved);

    // -- Settle ------------------------------------------------------------

    let accountant = ctx.accountant();
    let versus = seats.len() > 1;
    let mut records = Vec::with_capacity(seats.len());
    for seat in seats.iter() {
        let opponent = if versus {
            seats
                .iter()
                .find(|o| o.agent != seat.agent)
                .map(|o| o.agent.clone())
        } else {
            None
        };
        let record = accountant.settle(round, seat, opponent, &dealer);
        telemetry.emit(RoundEvent::Outcome {
            round,
            agent: record.agent.clone(),
            outcome: record.outcome,
            pnl: record.pnl,
            balance: record.balance_after,
        });
        records.push(record);
    }
    advance(round, &mut phase, Phase::Settled);

    telemetry.emit(RoundEvent::RoundEnded { round });
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Outcome, Rank, Suit};
    use crate::llm::scripted::ScriptedGateway;
    use crate::llm::AgentGateway;
    use std::time::Duration;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn limits() -> TableLimits {
        TableLimits {
            min_wager: 1_000,
            max_wager: 500_000,
            rounds_per_run: 1,
            agent_timeout: Duration::from_secs(5),
            run_timeout: Duration::from_secs(60),
        }
    }

    fn seat(agent: &str, replies: &[&str]) -> Seat {
        let gateway: Arc<dyn AgentGateway> =
            Arc::new(ScriptedGateway::new(replies.iter().map(|r| r.to_string()).collect()));
        Seat::new(agent.into(), gateway)
    }

    fn c(rank: Rank, suit: Suit) -> Card {
        Card::new(rank, suit)
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<RoundEvent>) -> Vec<RoundEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn test_dealer_plays_out_against_two_seats() {
        let ledger = Ledger::new(100_000);
        let table = limits();
        let ctx = RoundContext {
            limits: &table,
            ledger: &ledger,
            audit: None,
            date: day(),
        };
        let mut seats = vec![
            seat("alpha", &["WAGER: 10", "DECISION: STAND"]),
            seat("beta", &["WAGER: 20", "DECISION: HIT", "DECISION: STAND"]),
        ];
        // A: 10 9 (19). B: 5 6 (11) hits 9 -> 20. Dealer 10 6 draws 2 -> 18.
        let mut deck = Deck::from_top(vec![
            c(Rank::Ten, Suit::Spades),
            c(Rank::Nine, Suit::Spades),
            c(Rank::Five, Suit::Hearts),
            c(Rank::Six, Suit::Hearts),
            c(Rank::Ten, Suit::Clubs),
            c(Rank::Six, Suit::Clubs),
            c(Rank::Nine, Suit::Hearts),
            c(Rank::Two, Suit::Diamonds),
        ]);
        let (mut telemetry, mut rx) = Telemetry::channel();

        let records = play_round(&ctx, 1, &mut seats, &mut deck, &mut telemetry)
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, Outcome::Win);
        assert_eq!(records[0].opponent.as_deref(), Some("beta"));
        assert_eq!(records[1].outcome, Outcome::Win);
        assert_eq!(records[1].hand.value(), 20);
        assert_eq!(records[1].decisions.len(), 2);
        assert_eq!(records[0].dealer.value(), 18);
        assert_eq!(ledger.get_or_init_balance("alpha", day()), 101_000);
        assert_eq!(ledger.get_or_init_balance("beta", day()), 102_000);

        let events = drain(&mut rx);
        assert!(matches!(events.first(), Some(RoundEvent::RoundStarted { .. })));
        assert!(matches!(events[1], RoundEvent::CardsDealt { .. }));
        assert!(matches!(events.last(), Some(RoundEvent::RoundEnded { round: 1 })));
        let drew = events
            .iter()
            .filter(|e| matches!(e, RoundEvent::DealerDrew { .. }))
            .count();
        assert_eq!(drew, 1);
    }

    #[tokio::test]
    async fn test_dealer_plays_out_for_surviving_seat() {
        let ledger = Ledger::new(100_000);
        let table = limits();
        let ctx = RoundContext {
            limits: &table,
            ledger: &ledger,
            audit: None,
            date: day(),
        };
        let mut seats = vec![
            seat("alpha", &["WAGER: 10", "DECISION: HIT"]),
            seat("beta", &["WAGER: 20", "DECISION: STAND"]),
        ];
        // A: 10 6 hits K -> bust. B: 10 8 (18). Dealer 10 5 draws 2 -> 17.
        let mut deck = Deck::from_top(vec![
            c(Rank::Ten, Suit::Spades),
            c(Rank::Six, Suit::Spades),
            c(Rank::Ten, Suit::Hearts),
            c(Rank::Eight, Suit::Hearts),
            c(Rank::Ten, Suit::Clubs),
            c(Rank::Five, Suit::Clubs),
            c(Rank::King, Suit::Diamonds),
            c(Rank::Two, Suit::Diamonds),
        ]);
        let (mut telemetry, mut rx) = Telemetry::channel();

        let records = play_round(&ctx, 1, &mut seats, &mut deck, &mut telemetry)
            .await
            .unwrap();

        assert_eq!(records[0].outcome, Outcome::Loss);
        assert!(records[0].hand.is_bust());
        assert_eq!(records[1].outcome, Outcome::Win);
        assert_eq!(records[1].dealer.value(), 17);
        assert_eq!(records[1].dealer.len(), 3);
        assert_eq!(ledger.get_or_init_balance("alpha", day()), 99_000);
        assert_eq!(ledger.get_or_init_balance("beta", day()), 102_000);

        let drew = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, RoundEvent::DealerDrew { .. }))
            .count();
        assert_eq!(drew, 1);
    }

    #[tokio::test]
    async fn test_streamed_wager_reasoning_follows_wager_placed() {
        let ledger = Ledger::new(100_000);
        let table = limits();
        let ctx = RoundContext {
            limits: &table,
            ledger: &ledger,
            audit: None,
            date: day(),
        };
        let gateway: Arc<dyn AgentGateway> = Arc::new(
            ScriptedGateway::new(vec!["Modest start. WAGER: 10".into(), "DECISION: STAND".into()])
                .streaming(true),
        );
        let mut seats = vec![Seat::new("alpha".into(), gateway)];
        let mut deck = Deck::from_top(vec![
            c(Rank::Ten, Suit::Spades),
            c(Rank::Seven, Suit::Spades),
            c(Rank::Ten, Suit::Hearts),
            c(Rank::Eight, Suit::Hearts),
        ]);
        let (mut telemetry, mut rx) = Telemetry::channel();

        play_round(&ctx, 1, &mut seats, &mut deck, &mut telemetry)
            .await
            .unwrap();

        let events = drain(&mut rx);
        let placed = events
            .iter()
            .position(|e| matches!(e, RoundEvent::WagerPlaced { .. }))
            .unwrap();
        let first_fragment = events
            .iter()
            .position(|e| matches!(e, RoundEvent::ReasoningFragment { .. }))
            .unwrap();
        assert_eq!(placed, 2);
        assert_eq!(first_fragment, placed + 1);
        match &events[first_fragment] {
            RoundEvent::ReasoningFragment { text, .. } => assert_eq!(text, "Modest "),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dealer_skips_drawing_when_everyone_busts() {
        let ledger = Ledger::new(100_000);
        let table = limits();
        let ctx = RoundContext {
            limits: &table,
            ledger: &ledger,
            audit: None,
            date: day(),
        };
        let mut seats = vec![seat("alpha", &["WAGER: 10", "DECISION: HIT"])];
        let mut deck = Deck::from_top(vec![
            c(Rank::Ten, Suit::Spades),
            c(Rank::Six, Suit::Spades),
            c(Rank::Two, Suit::Hearts),
            c(Rank::Three, Suit::Hearts),
            c(Rank::King, Suit::Clubs),
        ]);
        let mut telemetry = Telemetry::disabled();
        let records = play_round(&ctx, 1, &mut seats, &mut deck, &mut telemetry)
            .await
            .unwrap();
        assert_eq!(records[0].outcome, Outcome::Loss);
        assert_eq!(records[0].dealer.len(), 2);
        assert_eq!(ledger.get_or_init_balance("alpha", day()), 99_000);
    }

    #[tokio::test]
    async fn test_twenty_one_is_not_asked() {
        let ledger = Ledger::new(100_000);
        let table = limits();
        let ctx = RoundContext {
            limits: &table,
            ledger: &ledger,
            audit: None,
            date: day(),
        };
        let mut seats = vec![seat("alpha", &["WAGER: 10"])];
        let mut deck = Deck::from_top(vec![
            c(Rank::Ace, Suit::Spades),
            c(Rank::King, Suit::Spades),
            c(Rank::Ten, Suit::Hearts),
            c(Rank::Seven, Suit::Hearts),
        ]);
        let records = play_round(&ctx, 1, &mut seats, &mut deck, &mut Telemetry::disabled())
            .await
            .unwrap();
        assert!(records[0].decisions.is_empty());
        assert_eq!(records[0].outcome, Outcome::Win);
    }

    #[tokio::test]
    async fn test_deck_exhaustion_refunds_wagers() {
        let ledger = Ledger::new(100_000);
        let table = limits();
        let ctx = RoundContext {
            limits: &table,
            ledger: &ledger,
            audit: None,
            date: day(),
        };
        let mut seats = vec![seat("alpha", &["WAGER: 50", "DECISION: HIT"])];
        let mut deck = Deck::from_top(vec![
            c(Rank::Two, Suit::Spades),
            c(Rank::Three, Suit::Spades),
            c(Rank::Ten, Suit::Hearts),
            c(Rank::Seven, Suit::Hearts),
        ]);
        let result = play_round(&ctx, 1, &mut seats, &mut deck, &mut Telemetry::disabled()).await;
        assert_eq!(result.unwrap_err(), ArenaError::DeckExhausted);
        assert_eq!(ledger.get_or_init_balance("alpha", day()), 100_000);
        assert_eq!(ledger.round_count(), 0);
    }

    #[tokio::test]
    async fn test_second_seat_decline_refunds_first() {
        let ledger = Ledger::new(100_000);
        // beta is already broke for the day.
        ledger.debit("beta", day(), 100_000);
        let table = limits();
        let ctx = RoundContext {
            limits: &table,
            ledger: &ledger,
            audit: None,
            date: day(),
        };
        let mut seats = vec![
            seat("alpha", &["WAGER: 40"]),
            seat("beta", &["WAGER: 40"]),
        ];
        let mut deck = Deck::shuffled(&mut rand::thread_rng());
        let result = play_round(&ctx, 1, &mut seats, &mut deck, &mut Telemetry::disabled()).await;
        assert!(matches!(
            result,
            Err(ArenaError::InsufficientFunds { ref account, .. }) if account == "beta"
        ));
        assert_eq!(ledger.get_or_init_balance("alpha", day()), 100_000);
        assert_eq!(ledger.round_count(), 0);
    }
}
