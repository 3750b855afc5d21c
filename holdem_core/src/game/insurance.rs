//! The mid-hand insurance mini-market.
//!
//! When every live player is all-in before the board is complete, the
//! current leader of each contested pot may insure a chosen subset of
//! the outs that would dethrone them. This module holds the fixed rate
//! table, the outs computation, and the settlement arithmetic; the
//! controller drives the suspend window and applies the results.

use std::collections::BTreeMap;

use super::entities::{Card, Chips, HoleCards, InsuranceSlot, SeatIndex};
use super::eval::{EvalError, Evaluator};

/// Payout multiplier per count of insured cards, indexed 1..=20.
/// Used both to size the maximum buy and to settle a hit.
const RATES: [f64; 21] = [
    0.0, // unused
    32.0, 16.0, 10.0, 7.5, 6.0, 5.0, 4.0, 3.5, 3.0, 2.5, 2.2, 2.0, 1.8, 1.6, 1.4, 1.3, 1.2, 1.1,
    1.0, 0.8,
];

#[must_use]
pub fn rate(cards: usize) -> f64 {
    RATES[cards.clamp(1, 20)]
}

/// Largest premium a leader may commit against `max_payment` when
/// insuring `cards` outs.
#[must_use]
pub fn max_buy(max_payment: Chips, cards: usize) -> Chips {
    let r = rate(cards);
    if r > 1.0 {
        (f64::from(max_payment) / r).ceil() as Chips
    } else {
        max_payment
    }
}

/// Refund for the uninsured remainder of the outs. At the boundary
/// where every out was bought there is nothing to refund; the rate
/// table has no entry for zero cards and naive indexing double-refunds
/// there, so the case is pinned here and logged when touched.
#[must_use]
pub fn take_back(buy_amount: Chips, uninsured: usize) -> Chips {
    if uninsured == 0 {
        log::warn!("insurance take-back evaluated with zero uninsured outs; refund suppressed");
        return 0;
    }
    (f64::from(buy_amount) / rate(uninsured)).ceil() as Chips
}

/// Offered payout cap contribution for one pot on the flop round: the
/// buy is sized at a third of the leader's pot share and the payout can
/// never exceed the share itself.
#[must_use]
pub fn flop_pot_cap(pot_share: Chips, outs: usize) -> Chips {
    let buy_cap = pot_share / 3;
    let payment = (f64::from(buy_cap) * rate(outs)) as Chips;
    payment.min(pot_share)
}

/// The outs picture for one pot leader.
#[derive(Clone, Debug, Default)]
pub struct OutsReport {
    /// Every card that costs the leader the pot, in full or in part,
    /// descending.
    pub outs: Vec<Card>,
    /// The subset of outs that chop the pot instead of losing it.
    pub outs_divided: Vec<Card>,
    /// Cards that promote each specific opponent to at least a share.
    pub per_opponent: BTreeMap<SeatIndex, Vec<Card>>,
}

/// Compute the outs for `leader` against the other contenders of one
/// pot, given the current board and the cards still in the deck.
pub fn compute_outs<E: Evaluator + ?Sized>(
    evaluator: &E,
    leader: SeatIndex,
    hands: &[(SeatIndex, &HoleCards)],
    board: &[Card],
    remaining: &[Card],
) -> Result<OutsReport, EvalError> {
    let Some(leader_hole) = hands
        .iter()
        .find(|(seat, _)| *seat == leader)
        .map(|(_, hole)| *hole)
    else {
        return Ok(OutsReport::default());
    };

    let mut report = OutsReport::default();
    let mut next_board = Vec::with_capacity(board.len() + 1);

    for &card in remaining {
        next_board.clear();
        next_board.extend_from_slice(board);
        next_board.push(card);

        let leader_value = evaluator.evaluate(leader_hole, &next_board)?;
        let mut beaten = false;
        let mut chopped = false;

        for (seat, hole) in hands.iter().filter(|(seat, _)| *seat != leader) {
            let value = evaluator.evaluate(hole, &next_board)?;
            if value >= leader_value {
                report.per_opponent.entry(*seat).or_default().push(card);
            }
            if value > leader_value {
                beaten = true;
            } else if value == leader_value {
                chopped = true;
            }
        }

        if beaten {
            report.outs.push(card);
        } else if chopped {
            report.outs_divided.push(card);
        }
    }

    // Chop cards count as outs too; the full list is what the player
    // buys against.
    for card in &report.outs_divided {
        if !report.outs.contains(card) {
            report.outs.push(*card);
        }
    }
    report.outs.sort_unstable_by(|a, b| b.cmp(a));

    Ok(report)
}

/// Net effect of one insurance round once the next community card is
/// known. Credits are applied when the card lands; owed premiums are
/// deducted at showdown.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Settlement {
    pub credit: Chips,
    pub owed: Chips,
}

#[must_use]
pub fn settle(slot: &InsuranceSlot, landed: Card) -> Settlement {
    let full_buy = slot.buy_cards.len() == slot.outs.len();
    let uninsured = slot.outs.len() - slot.buy_cards.len();

    if !slot.outs.contains(&landed) {
        // Leader stays ahead; the premium is lost, less the refund for
        // the outs they never insured.
        let owed = if full_buy {
            slot.buy_amount
        } else {
            slot.buy_amount
                .saturating_sub(take_back(slot.buy_amount, uninsured))
        };
        return Settlement { credit: 0, owed };
    }

    if slot.buy_cards.contains(&landed) {
        // Insured out hit: pay out, capped, less the refund when only
        // a subset was covered.
        let mut payment =
            (f64::from(slot.buy_amount) * rate(slot.buy_cards.len())) as Chips;
        payment = payment.min(slot.max_payment);
        if !full_buy {
            payment = payment.saturating_sub(take_back(slot.buy_amount, uninsured));
        }
        return Settlement {
            credit: payment,
            owed: 0,
        };
    }

    // An uninsured out hit: the pot is gone and so is the premium,
    // less the refund for the uninsured remainder.
    Settlement {
        credit: 0,
        owed: slot
            .buy_amount
            .saturating_sub(take_back(slot.buy_amount, uninsured)),
    }
}

/// Premium for the forced turn-round re-buy of the full outs list,
/// derived from the flop-round premium.
#[must_use]
pub fn auto_buy_amount(flop_buy: Chips, outs: usize) -> Chips {
    (f64::from(flop_buy) / rate(outs)).ceil() as Chips
}
