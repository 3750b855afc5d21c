//! Side-pot construction.
//!
//! At the close of each betting street the per-seat bets are folded
//! into a layered pot structure: one layer per distinct bet amount, so
//! a short all-in caps the pot it can win and the surplus moves into
//! side pots contested by the deeper stacks.

use std::collections::BTreeSet;

use super::entities::{Chips, SeatIndex};

/// One layer of the pot structure.
#[derive(Clone, Debug, Default)]
pub struct Pot {
    pub amount: Chips,
    /// Seats eligible to win this pot, ascending. Dead money from
    /// folded seats stays in the amount but the seat is not listed.
    pub involved: Vec<SeatIndex>,
    /// A closed pot receives no further chips; only the deepest layer
    /// may stay open between streets.
    pub closed: bool,
}

impl Pot {
    #[must_use]
    pub fn involves(&self, seat: SeatIndex) -> bool {
        self.involved.contains(&seat)
    }

    /// How many of the given seats are eligible for this pot.
    #[must_use]
    pub fn involved_count_of(&self, seats: &[SeatIndex]) -> usize {
        seats.iter().filter(|s| self.involves(**s)).count()
    }
}

/// A seat's stake in the street being collected.
#[derive(Clone, Copy, Debug)]
pub struct SeatBet {
    pub seat: SeatIndex,
    pub bet: Chips,
    pub in_round: bool,
    /// Seat has no chips behind; it cannot match any future bet.
    pub all_in: bool,
}

/// Fold one street's bets into the pot layers.
///
/// Thresholds are the distinct non-zero bet amounts of seats still in
/// the hand, ascending; every seat contributes `min(bet, threshold) -
/// min(bet, previous)` to each layer, so a folded seat's partial bet
/// is dead money in the layers it reached and never opens a layer of
/// its own. The lowest layer merges into the open pot, higher layers
/// become new pots. Everything but the deepest layer closes, and the
/// deepest closes too once one of its eligible seats is all-in, so
/// the next street opens a side pot that excludes them. Seats that
/// folded are pruned from eligibility as a side effect.
pub fn fold_bets(pots: &mut Vec<Pot>, bets: &[SeatBet]) {
    let mut thresholds: Vec<Chips> = bets
        .iter()
        .filter(|b| b.in_round && b.bet > 0)
        .map(|b| b.bet)
        .collect();
    thresholds.sort_unstable();
    thresholds.dedup();

    if thresholds.is_empty() {
        // A checked-through street adds no chips but a fold still
        // revokes eligibility. Any stray dead money joins the open
        // pot rather than evaporating.
        let dead: Chips = bets.iter().map(|b| b.bet).sum();
        match pots.iter_mut().find(|p| !p.closed) {
            Some(open) => {
                open.amount += dead;
                open.involved
                    .retain(|s| bets.iter().any(|b| b.seat == *s && b.in_round));
            }
            None if dead > 0 => pots.push(Pot {
                amount: dead,
                involved: bets.iter().filter(|b| b.in_round).map(|b| b.seat).collect(),
                closed: false,
            }),
            None => {}
        }
        return;
    }

    let mut prev: Chips = 0;
    for (layer_idx, &threshold) in thresholds.iter().enumerate() {
        let layer_amount: Chips = bets
            .iter()
            .map(|b| b.bet.min(threshold) - b.bet.min(prev))
            .sum();
        let contributors: Vec<SeatIndex> = bets
            .iter()
            .filter(|b| b.in_round && b.bet >= threshold)
            .map(|b| b.seat)
            .collect();

        let open = pots.iter_mut().position(|p| !p.closed);
        match (layer_idx, open) {
            (0, Some(i)) => {
                let pot = &mut pots[i];
                pot.amount += layer_amount;
                let mut involved: BTreeSet<SeatIndex> =
                    pot.involved.iter().copied().chain(contributors).collect();
                involved.retain(|s| bets.iter().any(|b| b.seat == *s && b.in_round));
                pot.involved = involved.into_iter().collect();
            }
            _ => pots.push(Pot {
                amount: layer_amount,
                involved: contributors,
                closed: false,
            }),
        }
        prev = threshold;
    }

    // Dead money above the deepest live threshold cannot happen in a
    // legal betting sequence, but chips must never evaporate.
    let wagered: Chips = bets.iter().map(|b| b.bet).sum();
    let layered: Chips = bets.iter().map(|b| b.bet.min(prev)).sum();
    if wagered > layered {
        if let Some(pot) = pots.last_mut() {
            pot.amount += wagered - layered;
        }
    }

    let deepest = pots.len() - 1;
    for (i, pot) in pots.iter_mut().enumerate() {
        pot.closed = i != deepest;
    }
    if let Some(pot) = pots.last_mut() {
        let capped = pot
            .involved
            .iter()
            .any(|s| bets.iter().any(|b| b.seat == *s && b.all_in));
        if capped {
            pot.closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bet(seat: SeatIndex, bet: Chips, in_round: bool) -> SeatBet {
        SeatBet {
            seat,
            bet,
            in_round,
            all_in: false,
        }
    }

    fn allin(seat: SeatIndex, bet: Chips) -> SeatBet {
        SeatBet {
            seat,
            bet,
            in_round: true,
            all_in: true,
        }
    }

    fn amounts(pots: &[Pot]) -> Vec<Chips> {
        pots.iter().map(|p| p.amount).collect()
    }

    #[test]
    fn equal_bets_build_one_open_pot() {
        let mut pots = Vec::new();
        fold_bets(
            &mut pots,
            &[bet(0, 100, true), bet(3, 100, true), bet(7, 100, true)],
        );
        assert_eq!(amounts(&pots), vec![300]);
        assert_eq!(pots[0].involved, vec![0, 3, 7]);
        assert!(!pots[0].closed);
    }

    #[test]
    fn short_all_in_splits_side_pot() {
        let mut pots = Vec::new();
        fold_bets(
            &mut pots,
            &[allin(0, 50), bet(1, 200, true), bet(2, 200, true)],
        );
        assert_eq!(amounts(&pots), vec![150, 300]);
        assert_eq!(pots[0].involved, vec![0, 1, 2]);
        assert_eq!(pots[1].involved, vec![1, 2]);
        assert!(pots[0].closed);
        assert!(!pots[1].closed);
    }

    #[test]
    fn three_way_all_in_layers() {
        let mut pots = Vec::new();
        fold_bets(
            &mut pots,
            &[allin(0, 200), allin(1, 500), allin(2, 1000)],
        );
        assert_eq!(amounts(&pots), vec![600, 600, 500]);
        assert_eq!(pots[0].involved, vec![0, 1, 2]);
        assert_eq!(pots[1].involved, vec![1, 2]);
        assert_eq!(pots[2].involved, vec![2]);
        assert!(pots.iter().all(|p| p.closed));
    }

    #[test]
    fn folded_seat_leaves_dead_money() {
        let mut pots = Vec::new();
        fold_bets(
            &mut pots,
            &[bet(0, 100, false), bet(1, 100, true), bet(2, 100, true)],
        );
        assert_eq!(amounts(&pots), vec![300]);
        assert_eq!(pots[0].involved, vec![1, 2]);
    }

    #[test]
    fn partial_dead_money_folds_into_the_live_layer() {
        // Seat 0 folded after putting in 60 against a 100 bet; the 60
        // is dead money in the live players' pot, not a layer of its
        // own.
        let mut pots = Vec::new();
        fold_bets(
            &mut pots,
            &[bet(0, 60, false), bet(1, 100, true), bet(2, 100, true)],
        );
        assert_eq!(amounts(&pots), vec![260]);
        assert_eq!(pots[0].involved, vec![1, 2]);
    }

    #[test]
    fn folded_blind_never_opens_its_own_layer() {
        // Heads-up fold to the big blind: the folded small blind's 10
        // joins the single pot the survivor wins.
        let mut pots = Vec::new();
        fold_bets(&mut pots, &[bet(3, 10, false), bet(7, 20, true)]);
        assert_eq!(amounts(&pots), vec![30]);
        assert_eq!(pots[0].involved, vec![7]);
    }

    #[test]
    fn open_pot_accumulates_across_streets() {
        let mut pots = Vec::new();
        fold_bets(&mut pots, &[bet(0, 20, true), bet(1, 20, true)]);
        fold_bets(&mut pots, &[bet(0, 50, true), bet(1, 50, true)]);
        assert_eq!(amounts(&pots), vec![140]);
        assert_eq!(pots[0].involved, vec![0, 1]);
    }

    #[test]
    fn checked_street_prunes_folded_seats() {
        let mut pots = Vec::new();
        fold_bets(
            &mut pots,
            &[bet(0, 20, true), bet(1, 20, true), bet(2, 20, true)],
        );
        assert_eq!(pots[0].involved, vec![0, 1, 2]);
        // Next street checks through after seat 2 folds to a zero bet.
        fold_bets(
            &mut pots,
            &[bet(0, 0, true), bet(1, 0, true), bet(2, 0, false)],
        );
        assert_eq!(amounts(&pots), vec![60]);
        assert_eq!(pots[0].involved, vec![0, 1]);
    }

    #[test]
    fn matched_all_in_closes_the_pot_for_later_streets() {
        let mut pots = Vec::new();
        // Street one: all three put in 100, seat 0 for their whole
        // stack.
        fold_bets(
            &mut pots,
            &[allin(0, 100), bet(1, 100, true), bet(2, 100, true)],
        );
        assert!(pots[0].closed);
        // Street two: seats 1 and 2 keep betting; the chips must land
        // in a side pot seat 0 cannot win.
        fold_bets(
            &mut pots,
            &[allin(0, 0), bet(1, 80, true), bet(2, 80, true)],
        );
        assert_eq!(amounts(&pots), vec![300, 160]);
        assert_eq!(pots[0].involved, vec![0, 1, 2]);
        assert_eq!(pots[1].involved, vec![1, 2]);
    }

    #[test]
    fn involvement_chain_is_nested() {
        let mut pots = Vec::new();
        fold_bets(
            &mut pots,
            &[
                bet(1, 40, true),
                bet(3, 90, true),
                bet(5, 90, true),
                bet(8, 250, true),
            ],
        );
        for pair in pots.windows(2) {
            for seat in &pair[1].involved {
                assert!(pair[0].involves(*seat), "involvement must be nested");
            }
        }
    }

    #[test]
    fn conservation_across_layers() {
        let bets = [
            bet(0, 13, true),
            bet(2, 77, false),
            bet(4, 250, true),
            bet(6, 250, true),
            bet(9, 8, true),
        ];
        let wagered: Chips = bets.iter().map(|b| b.bet).sum();
        let mut pots = Vec::new();
        fold_bets(&mut pots, &bets);
        let collected: Chips = pots.iter().map(|p| p.amount).sum();
        assert_eq!(wagered, collected);
    }

    #[test]
    fn involved_count_of_winners() {
        let mut pots = Vec::new();
        fold_bets(
            &mut pots,
            &[allin(0, 50), bet(1, 200, true), bet(2, 200, true)],
        );
        assert_eq!(pots[0].involved_count_of(&[0, 2]), 2);
        assert_eq!(pots[1].involved_count_of(&[0, 2]), 1);
        assert_eq!(pots[1].involved_count_of(&[0]), 0);
    }
}
