//! Hand strength evaluation.
//!
//! The engine treats the evaluator as an external collaborator behind
//! the [`Evaluator`] trait: it hands over two hole cards plus the board
//! and gets back a totally ordered strength. [`StandardEvaluator`] is
//! the stock implementation (best five of up to seven cards). Nothing
//! else in the engine knows hand-ranking rules.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

use super::entities::{Card, HoleCards, SeatIndex};

/// Hand categories in ascending order of strength.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum HandRanking {
    HighCard,
    OnePair,
    TwoPair,
    ThreeOfAKind,
    Straight,
    Flush,
    FullHouse,
    FourOfAKind,
    StraightFlush,
}

impl fmt::Display for HandRanking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Self::HighCard => "high card",
            Self::OnePair => "one pair",
            Self::TwoPair => "two pair",
            Self::ThreeOfAKind => "three of a kind",
            Self::Straight => "straight",
            Self::Flush => "flush",
            Self::FullHouse => "full house",
            Self::FourOfAKind => "four of a kind",
            Self::StraightFlush => "straight flush",
        };
        write!(f, "{repr}")
    }
}

/// A comparable hand value: category plus the face values that break
/// ties within the category, most significant first.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HandValue {
    pub ranking: HandRanking,
    pub tiebreak: Vec<u8>,
}

impl Ord for HandValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ranking
            .cmp(&other.ranking)
            .then_with(|| self.tiebreak.cmp(&other.tiebreak))
    }
}

impl PartialOrd for HandValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A hand value attributed to a seat, as used by the win list.
#[derive(Clone, Debug)]
pub struct HandStrength {
    pub seat: SeatIndex,
    pub value: HandValue,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum EvalError {
    #[error("need at least five cards to rank a hand, got {0}")]
    NotEnoughCards(usize),
}

pub trait Evaluator {
    /// Rank two hole cards against the board (3 to 5 cards).
    fn evaluate(&self, hole: &HoleCards, board: &[Card]) -> Result<HandValue, EvalError>;
}

/// Best-five-of-seven evaluation by exhausting the 5-card subsets.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardEvaluator;

impl Evaluator for StandardEvaluator {
    fn evaluate(&self, hole: &HoleCards, board: &[Card]) -> Result<HandValue, EvalError> {
        let mut cards: Vec<Card> = hole.cards().to_vec();
        cards.extend_from_slice(board);
        if cards.len() < 5 {
            return Err(EvalError::NotEnoughCards(cards.len()));
        }

        let mut best: Option<HandValue> = None;
        let mut pick = [cards[0]; 5];
        for_each_combination(&cards, &mut pick, 0, 0, &mut |five| {
            let value = rank_five(five);
            if best.as_ref().is_none_or(|b| value > *b) {
                best = Some(value);
            }
        });

        Ok(best.expect("at least one 5-card subset exists"))
    }
}

fn for_each_combination(
    cards: &[Card],
    pick: &mut [Card; 5],
    depth: usize,
    start: usize,
    visit: &mut impl FnMut(&[Card; 5]),
) {
    if depth == 5 {
        visit(pick);
        return;
    }
    for i in start..cards.len() {
        pick[depth] = cards[i];
        for_each_combination(cards, pick, depth + 1, i + 1, visit);
    }
}

/// Rank exactly five cards.
fn rank_five(cards: &[Card; 5]) -> HandValue {
    let mut values: Vec<u8> = cards.iter().map(|c| c.face.value()).collect();
    values.sort_unstable_by(|a, b| b.cmp(a));

    let flush = cards.iter().all(|c| c.suit == cards[0].suit);
    let straight_high = straight_high(&values);

    // Face value -> multiplicity, then grouped by (count, value) so the
    // dominant group sorts first.
    let mut groups: Vec<(u8, u8)> = Vec::with_capacity(5);
    for &v in &values {
        match groups.iter_mut().find(|(_, gv)| *gv == v) {
            Some((count, _)) => *count += 1,
            None => groups.push((1, v)),
        }
    }
    groups.sort_unstable_by(|a, b| b.cmp(a));

    if let Some(high) = straight_high {
        let ranking = if flush {
            HandRanking::StraightFlush
        } else {
            HandRanking::Straight
        };
        return HandValue {
            ranking,
            tiebreak: vec![high],
        };
    }

    let tiebreak: Vec<u8> = groups.iter().map(|(_, v)| *v).collect();
    let ranking = match (groups[0].0, groups.get(1).map(|g| g.0)) {
        (4, _) => HandRanking::FourOfAKind,
        (3, Some(2)) => HandRanking::FullHouse,
        (3, _) => HandRanking::ThreeOfAKind,
        (2, Some(2)) => HandRanking::TwoPair,
        (2, _) => HandRanking::OnePair,
        _ if flush => HandRanking::Flush,
        _ => HandRanking::HighCard,
    };

    HandValue { ranking, tiebreak }
}

/// Highest card of a straight, or `None`. `values` must be sorted
/// descending. The wheel (A-5) ranks with high card five.
fn straight_high(values: &[u8]) -> Option<u8> {
    let consecutive = values.windows(2).all(|w| w[0] == w[1] + 1);
    if consecutive {
        return Some(values[0]);
    }
    if values == [14, 5, 4, 3, 2] {
        return Some(5);
    }
    None
}

/// Group seat strengths into tiers of equal value, strongest tier
/// first. Every seat still in the hand appears in exactly one tier.
#[must_use]
pub fn win_list(mut strengths: Vec<HandStrength>) -> Vec<Vec<HandStrength>> {
    strengths.sort_by(|a, b| b.value.cmp(&a.value));

    let mut tiers: Vec<Vec<HandStrength>> = Vec::new();
    for hs in strengths {
        match tiers.last_mut() {
            Some(tier) if tier[0].value == hs.value => tier.push(hs),
            _ => tiers.push(vec![hs]),
        }
    }
    tiers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entities::HoleCards;

    fn cards(spec: &str) -> Vec<Card> {
        spec.split_whitespace()
            .map(|s| s.parse().unwrap())
            .collect()
    }

    fn hole(spec: &str) -> HoleCards {
        let cs = cards(spec);
        let mut h = HoleCards::default();
        h.set(cs[0], cs[1]);
        h
    }

    fn eval(hole_spec: &str, board_spec: &str) -> HandValue {
        StandardEvaluator
            .evaluate(&hole(hole_spec), &cards(board_spec))
            .unwrap()
    }

    #[test]
    fn rankings_are_ordered() {
        assert!(HandRanking::StraightFlush > HandRanking::FourOfAKind);
        assert!(HandRanking::FourOfAKind > HandRanking::FullHouse);
        assert!(HandRanking::FullHouse > HandRanking::Flush);
        assert!(HandRanking::Flush > HandRanking::Straight);
        assert!(HandRanking::Straight > HandRanking::ThreeOfAKind);
        assert!(HandRanking::ThreeOfAKind > HandRanking::TwoPair);
        assert!(HandRanking::TwoPair > HandRanking::OnePair);
        assert!(HandRanking::OnePair > HandRanking::HighCard);
    }

    #[test]
    fn detects_each_category() {
        assert_eq!(eval("Ah Kh", "Qh Jh Th 2c 3d").ranking, HandRanking::StraightFlush);
        assert_eq!(eval("Ac Ad", "Ah As Kc 2c 3d").ranking, HandRanking::FourOfAKind);
        assert_eq!(eval("Ac Ad", "Ah Ks Kc 2c 3d").ranking, HandRanking::FullHouse);
        assert_eq!(eval("Ah 8h", "Qh Jh 2h 3c 4d").ranking, HandRanking::Flush);
        assert_eq!(eval("9c 8d", "7h 6s 5c Kc 2d").ranking, HandRanking::Straight);
        assert_eq!(eval("Ac Ad", "Ah Ks Qc 2c 3d").ranking, HandRanking::ThreeOfAKind);
        assert_eq!(eval("Ac Ad", "Kh Ks Qc 2c 3d").ranking, HandRanking::TwoPair);
        assert_eq!(eval("Ac Ad", "Kh Qs Jc 2c 3d").ranking, HandRanking::OnePair);
        assert_eq!(eval("Ac 9d", "Kh Qs Jc 2c 3d").ranking, HandRanking::HighCard);
    }

    #[test]
    fn wheel_straight_ranks_below_six_high() {
        let wheel = eval("Ac 2d", "3h 4s 5c Kc Qd");
        let six_high = eval("6c 2d", "3h 4s 5c Kc Qd");
        assert_eq!(wheel.ranking, HandRanking::Straight);
        assert_eq!(six_high.ranking, HandRanking::Straight);
        assert!(six_high > wheel);
    }

    #[test]
    fn kickers_break_ties() {
        let aces_king = eval("Ac Ad", "Kh 9s 5c 3c 2d");
        let aces_queen = eval("Ah As", "Qh 9d 5d 3s 2h");
        assert!(aces_king > aces_queen);
    }

    #[test]
    fn identical_board_plays_chop() {
        let a = eval("2c 3d", "Ah Kh Qh Jh Th");
        let b = eval("4c 5d", "Ah Kh Qh Jh Th");
        assert_eq!(a, b);
    }

    #[test]
    fn picks_best_five_of_seven() {
        // Two pair on the board plus a pair in the hole must find the
        // full house, not stop at two pair.
        let v = eval("9c 9d", "9h Ks Kc 2c 3d");
        assert_eq!(v.ranking, HandRanking::FullHouse);
        assert_eq!(v.tiebreak, vec![9, 13]);
    }

    #[test]
    fn evaluates_on_partial_board() {
        let v = StandardEvaluator
            .evaluate(&hole("Ac Ad"), &cards("Ah Ks Qc"))
            .unwrap();
        assert_eq!(v.ranking, HandRanking::ThreeOfAKind);
    }

    #[test]
    fn refuses_preflop_evaluation() {
        let err = StandardEvaluator.evaluate(&hole("Ac Ad"), &[]);
        assert_eq!(err, Err(EvalError::NotEnoughCards(2)));
    }

    #[test]
    fn win_list_groups_equal_strengths() {
        let board = cards("Ah Kh Qh Jh Th");
        let strengths = vec![
            HandStrength {
                seat: 0,
                value: StandardEvaluator.evaluate(&hole("2c 3d"), &board).unwrap(),
            },
            HandStrength {
                seat: 3,
                value: StandardEvaluator.evaluate(&hole("4c 5d"), &board).unwrap(),
            },
            HandStrength {
                seat: 7,
                value: StandardEvaluator
                    .evaluate(&hole("2s 2d"), &cards("2h 7s 8c 9d Kc"))
                    .unwrap(),
            },
        ];
        let tiers = win_list(strengths);
        assert_eq!(tiers.len(), 2);
        let top: Vec<SeatIndex> = tiers[0].iter().map(|h| h.seat).collect();
        assert_eq!(top, vec![0, 3]);
        assert_eq!(tiers[1][0].seat, 7);
    }

    #[test]
    fn win_list_orders_tiers_descending() {
        let mk = |seat, hole_spec: &str, board_spec: &str| HandStrength {
            seat,
            value: StandardEvaluator
                .evaluate(&hole(hole_spec), &cards(board_spec))
                .unwrap(),
        };
        let tiers = win_list(vec![
            mk(1, "2c 7d", "Kh Qs Jc 4c 3d"),
            mk(2, "Ac Ad", "Kh Qs Jc 4c 3d"),
            mk(3, "Kc Kd", "Kh Qs Jc 4c 3d"),
        ]);
        assert_eq!(tiers.len(), 3);
        assert_eq!(tiers[0][0].seat, 3);
        assert_eq!(tiers[1][0].seat, 2);
        assert_eq!(tiers[2][0].seat, 1);
    }
}
