//! Accountant — settles a finished hand against the dealer.
//!
//! Resolves the outcome, credits the ledger, writes the immutable round
//! record, and hands an audit fact to the publisher. The wager was
//! already debited when it was placed, so settlement only ever credits.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::info;

use super::seat::Seat;
use crate::audit::{publish_detached, AuditFact, AuditPublisher};
use crate::game::{self, Hand, Outcome};
use crate::storage::Ledger;
use crate::types::{format_cents, AgentId, RoundRecord};

/// Amount to credit back at settlement: the stake plus signed P/L.
/// A loss credits nothing, a push returns the stake, a win doubles it.
pub fn settlement_credit(wager: u64, outcome: Outcome) -> u64 {
    match outcome {
        Outcome::Win => wager.saturating_mul(2),
        Outcome::Push => wager,
        Outcome::Loss => 0,
    }
}

pub(crate) struct Accountant<'a> {
    pub ledger: &'a Ledger,
    pub audit: Option<&'a Arc<dyn AuditPublisher>>,
    pub date: NaiveDate,
}

impl Accountant<'_> {
    /// Settle one seat and commit its record.
    pub fn settle(
        &self,
        round: u32,
        seat: &Seat,
        opponent: Option<AgentId>,
        dealer: &Hand,
    ) -> RoundRecord {
        let outcome = game::resolve(&seat.hand, dealer);
        let pnl = outcome.pnl(seat.wager);

        let credit = settlement_credit(seat.wager, outcome);
        let balance_after = if credit > 0 {
            self.ledger.credit(&seat.agent, self.date, credit)
        } else {
            self.ledger.get_or_init_balance(&seat.agent, self.date)
        };

        let record = RoundRecord {
            round,
            agent: seat.agent.clone(),
            opponent,
            date: self.date,
            wager: seat.wager,
            wager_rationale: seat.wager_rationale.clone(),
            hand: seat.hand.clone(),
            dealer: dealer.clone(),
            decisions: seat.decisions.clone(),
            outcome,
            pnl,
            balance_after,
            settled_at: Utc::now(),
        };
        self.ledger.append_round(record.clone());

        info!(
            agent = %record.agent,
            round,
            hand = %record.hand,
            dealer = %record.dealer,
            outcome = %outcome,
            pnl = %format_cents(pnl),
            balance = %format_cents(balance_after as i64),
            "Round settled"
        );

        if let Some(publisher) = self.audit {
            publish_detached(
                Arc::clone(publisher),
                AuditFact::RoundSettled {
                    record: record.clone(),
                },
            );
        }
        record
    }

    /// Return a placed wager untouched, for rounds that cannot finish.
    pub fn refund(&self, seat: &Seat) -> u64 {
        let balance = self.ledger.credit(&seat.agent, self.date, seat.wager);
        info!(
            agent = %seat.agent,
            wager = %format_cents(seat.wager as i64),
            balance = %format_cents(balance as i64),
            "Wager refunded"
        );
        balance
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
