//! Core domain types: cards, the deck, hole/community cards and players.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Whole chips. Stakes, bets and pots are integral; there is nothing
/// smaller than one chip to argue over.
pub type Chips = u32;

/// Stable client identifier, assigned at handshake time and preserved
/// across reconnects through the connection archive.
pub type ClientId = i32;

/// Table identifier within a game.
pub type TableId = i32;

/// Game identifier within the server registry.
pub type GameId = i32;

/// Seat position on a table.
pub type SeatIndex = usize;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Face {
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Jack,
    Queen,
    King,
    Ace,
}

impl Face {
    pub const ALL: [Face; 13] = [
        Face::Two,
        Face::Three,
        Face::Four,
        Face::Five,
        Face::Six,
        Face::Seven,
        Face::Eight,
        Face::Nine,
        Face::Ten,
        Face::Jack,
        Face::Queen,
        Face::King,
        Face::Ace,
    ];

    /// Numeric value used for hand comparison, deuce = 2 up to ace = 14.
    #[must_use]
    pub fn value(self) -> u8 {
        self as u8 + 2
    }

    #[must_use]
    pub fn symbol(self) -> char {
        match self {
            Face::Two => '2',
            Face::Three => '3',
            Face::Four => '4',
            Face::Five => '5',
            Face::Six => '6',
            Face::Seven => '7',
            Face::Eight => '8',
            Face::Nine => '9',
            Face::Ten => 'T',
            Face::Jack => 'J',
            Face::Queen => 'Q',
            Face::King => 'K',
            Face::Ace => 'A',
        }
    }

    fn from_symbol(c: char) -> Option<Face> {
        Face::ALL.iter().copied().find(|f| f.symbol() == c)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Suit {
    Club,
    Diamond,
    Heart,
    Spade,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Club, Suit::Diamond, Suit::Heart, Suit::Spade];

    #[must_use]
    pub fn symbol(self) -> char {
        match self {
            Suit::Club => 'c',
            Suit::Diamond => 'd',
            Suit::Heart => 'h',
            Suit::Spade => 's',
        }
    }

    fn from_symbol(c: char) -> Option<Suit> {
        Suit::ALL.iter().copied().find(|s| s.symbol() == c)
    }
}

/// A playing card with the short text form used on the wire, e.g. `Ah`
/// or `Tc`. Cards order by face first, which is the order hands care
/// about; the suit tie-break only keeps sorts stable.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Card {
    pub face: Face,
    pub suit: Suit,
}

impl Card {
    #[must_use]
    pub fn new(face: Face, suit: Suit) -> Self {
        Self { face, suit }
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.face.symbol(), self.suit.symbol())
    }
}

#[derive(Debug, Error, Eq, PartialEq)]
#[error("not a card: {0:?}")]
pub struct ParseCardError(String);

impl FromStr for Card {
    type Err = ParseCardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let (Some(f), Some(u), None) = (chars.next(), chars.next(), chars.next()) else {
            return Err(ParseCardError(s.to_string()));
        };
        match (Face::from_symbol(f), Suit::from_symbol(u)) {
            (Some(face), Some(suit)) => Ok(Card::new(face, suit)),
            _ => Err(ParseCardError(s.to_string())),
        }
    }
}

/// The deck, used as a stack: `fill` pushes the canonical 52 cards,
/// `shuffle` permutes them, `pop` deals from the top.
#[derive(Clone, Debug, Default)]
pub struct Deck {
    cards: Vec<Card>,
}

impl Deck {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the canonical 52-card set, replacing any prior content.
    pub fn fill(&mut self) {
        self.cards.clear();
        for face in Face::ALL {
            for suit in Suit::ALL {
                self.cards.push(Card::new(face, suit));
            }
        }
    }

    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.cards.shuffle(rng);
    }

    /// Deal the top card. `None` on underflow; callers treat that as a
    /// fatal hand condition, not a panic.
    pub fn pop(&mut self) -> Option<Card> {
        self.cards.pop()
    }

    /// Replace the deck with a caller-supplied sequence; cards are
    /// dealt in the order listed. Debug/test injection only.
    pub fn rig(&mut self, cards: &[Card]) {
        self.cards.clear();
        self.cards.extend(cards.iter().rev());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Cards still in the deck, in no meaningful order. The insurance
    /// outs computation iterates these.
    #[must_use]
    pub fn remaining(&self) -> &[Card] {
        &self.cards
    }
}

/// A player's two private cards, plus a per-card show flag driven by
/// the show/muck decision.
#[derive(Clone, Debug, Default)]
pub struct HoleCards {
    cards: Vec<Card>,
    show: Vec<bool>,
}

impl HoleCards {
    pub fn set(&mut self, c1: Card, c2: Card) {
        self.cards = vec![c1, c2];
        self.show = vec![false, false];
    }

    pub fn clear(&mut self) {
        self.cards.clear();
        self.show.clear();
    }

    pub fn set_show(&mut self, which: usize, show: bool) {
        if let Some(flag) = self.show.get_mut(which) {
            *flag = show;
        }
    }

    #[must_use]
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    #[must_use]
    pub fn is_dealt(&self) -> bool {
        self.cards.len() == 2
    }
}

/// The board, filled in phases: flop (3), turn (1), river (1).
#[derive(Clone, Debug, Default)]
pub struct CommunityCards {
    cards: Vec<Card>,
}

impl CommunityCards {
    pub fn clear(&mut self) {
        self.cards.clear();
    }

    pub fn set_flop(&mut self, c1: Card, c2: Card, c3: Card) {
        self.cards = vec![c1, c2, c3];
    }

    pub fn set_turn(&mut self, c: Card) {
        debug_assert_eq!(self.cards.len(), 3);
        self.cards.push(c);
    }

    pub fn set_river(&mut self, c: Card) {
        debug_assert_eq!(self.cards.len(), 4);
        self.cards.push(c);
    }

    #[must_use]
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// Everything a player can schedule or be recorded doing. The wire
/// codes are part of the snapshot protocol and must stay stable.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PlayerAction {
    None,
    ResetAction,
    Check,
    Fold,
    Call,
    Bet,
    Raise,
    Allin,
    Show,
    Muck,
    Sitout,
    Back,
}

impl PlayerAction {
    #[must_use]
    pub fn wire_code(self) -> u8 {
        match self {
            PlayerAction::None => 0,
            PlayerAction::ResetAction => 1,
            PlayerAction::Check => 2,
            PlayerAction::Fold => 3,
            PlayerAction::Call => 4,
            PlayerAction::Bet => 5,
            PlayerAction::Raise => 6,
            PlayerAction::Allin => 7,
            PlayerAction::Show => 8,
            PlayerAction::Muck => 9,
            PlayerAction::Sitout => 10,
            PlayerAction::Back => 11,
        }
    }

    /// Parse the action word of an `ACTION` command line.
    #[must_use]
    pub fn from_word(word: &str) -> Option<PlayerAction> {
        Some(match word {
            "check" => PlayerAction::Check,
            "fold" => PlayerAction::Fold,
            "call" => PlayerAction::Call,
            "bet" => PlayerAction::Bet,
            "raise" => PlayerAction::Raise,
            "allin" => PlayerAction::Allin,
            "show" => PlayerAction::Show,
            "muck" => PlayerAction::Muck,
            "sitout" => PlayerAction::Sitout,
            "back" => PlayerAction::Back,
            "reset" => PlayerAction::ResetAction,
            _ => return None,
        })
    }
}

/// An action a player has queued for their next turn. The betting
/// state consumes it, possibly rewriting it in place (call with
/// nothing bet becomes check, and so on) so the next tick retries.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SchedAction {
    pub action: PlayerAction,
    pub amount: Chips,
}

/// One round of the insurance mini-market for one player: the offer
/// published by the server plus whatever the player bought against it.
#[derive(Clone, Debug, Default)]
pub struct InsuranceSlot {
    pub bought: bool,
    /// Cap on the total payout for this round.
    pub max_payment: Chips,
    /// Premium the player committed.
    pub buy_amount: Chips,
    /// Every card that dethrones this leader, in descending order.
    pub outs: Vec<Card>,
    /// Outs that chop the pot rather than losing it outright.
    pub outs_divided: Vec<Card>,
    /// Outs broken down by the opponent they would promote.
    pub per_opponent_outs: BTreeMap<SeatIndex, Vec<Card>>,
    /// The subset of outs the player insured.
    pub buy_cards: Vec<Card>,
    /// Premium owed at showdown (payouts are credited when the card
    /// lands, debts settle at the end of the hand).
    pub owed: Chips,
}

impl InsuranceSlot {
    pub fn clear(&mut self) {
        *self = InsuranceSlot::default();
    }

    #[must_use]
    pub fn has_offer(&self) -> bool {
        !self.outs.is_empty()
    }
}

/// A registered player. The controller owns every player; tables refer
/// back to them by client id only.
#[derive(Clone, Debug)]
pub struct Player {
    pub client_id: ClientId,
    /// Copy of the session uuid; the player outlives a disconnect.
    pub uuid: String,

    pub stake: Chips,
    /// Stake at the start of the current hand.
    pub stake_before: Chips,
    /// Pending add-on, folded into the stake at the next hand start.
    pub rebuy_stake: Chips,

    pub holecards: HoleCards,

    pub next_action: Option<SchedAction>,
    pub last_action: PlayerAction,

    pub sitout: bool,
    pub wanna_leave: bool,

    pub table_no: i32,
    pub seat_no: i32,

    pub timed_out_count: u32,
    /// Per-player budget in seconds; respite purchases extend it.
    pub timeout_secs: u64,

    /// Slot 0 covers flop to turn, slot 1 covers turn to river.
    pub insurance: [InsuranceSlot; 2],
}

impl Player {
    #[must_use]
    pub fn new(client_id: ClientId, uuid: &str, stake: Chips, timeout_secs: u64) -> Self {
        Self {
            client_id,
            uuid: uuid.to_string(),
            stake,
            stake_before: stake,
            rebuy_stake: 0,
            holecards: HoleCards::default(),
            next_action: None,
            last_action: PlayerAction::None,
            sitout: false,
            wanna_leave: false,
            table_no: -1,
            seat_no: -1,
            timed_out_count: 0,
            timeout_secs,
            insurance: [InsuranceSlot::default(), InsuranceSlot::default()],
        }
    }

    pub fn reset_last_action(&mut self) {
        self.last_action = PlayerAction::None;
    }

    pub fn clear_insurance(&mut self) {
        self.insurance[0].clear();
        self.insurance[1].clear();
    }
}

/// One rung of a blind schedule.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BlindLevel {
    pub level: u32,
    pub big_blind: Chips,
    pub ante: Chips,
}

/// How blinds advance over the life of a game.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum BlindRule {
    /// Blinds never move (cash play).
    Fixed,
    /// Level advances when wall-clock time since the last advance
    /// exceeds the configured interval.
    ByTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::BTreeSet;

    #[test]
    fn card_short_form() {
        let ah = Card::new(Face::Ace, Suit::Heart);
        let tc = Card::new(Face::Ten, Suit::Club);
        assert_eq!(ah.to_string(), "Ah");
        assert_eq!(tc.to_string(), "Tc");
    }

    #[test]
    fn card_round_trips_through_text() {
        for face in Face::ALL {
            for suit in Suit::ALL {
                let card = Card::new(face, suit);
                assert_eq!(card.to_string().parse::<Card>(), Ok(card));
            }
        }
    }

    #[test]
    fn card_parse_rejects_garbage() {
        assert!("".parse::<Card>().is_err());
        assert!("A".parse::<Card>().is_err());
        assert!("Ahh".parse::<Card>().is_err());
        assert!("1c".parse::<Card>().is_err());
        assert!("Ax".parse::<Card>().is_err());
    }

    #[test]
    fn faces_order_by_strength() {
        assert!(Face::Ace > Face::King);
        assert!(Face::Ten > Face::Nine);
        assert!(Face::Two < Face::Three);
        assert_eq!(Face::Two.value(), 2);
        assert_eq!(Face::Ace.value(), 14);
    }

    #[test]
    fn fill_produces_canonical_set_exactly_once() {
        let mut deck = Deck::new();
        deck.fill();
        assert_eq!(deck.len(), 52);

        let unique: BTreeSet<Card> = deck.remaining().iter().copied().collect();
        assert_eq!(unique.len(), 52);

        // Filling again does not grow the deck.
        deck.fill();
        assert_eq!(deck.len(), 52);
    }

    #[test]
    fn shuffled_deck_still_holds_all_cards() {
        let mut deck = Deck::new();
        deck.fill();
        let mut rng = StdRng::seed_from_u64(7);
        deck.shuffle(&mut rng);

        let mut dealt = BTreeSet::new();
        while let Some(card) = deck.pop() {
            assert!(dealt.insert(card), "duplicate card dealt");
        }
        assert_eq!(dealt.len(), 52);
    }

    #[test]
    fn pop_on_empty_deck_fails() {
        let mut deck = Deck::new();
        assert_eq!(deck.pop(), None);
    }

    #[test]
    fn rigged_deck_deals_in_listed_order() {
        let order = [
            "Ah".parse().unwrap(),
            "Kd".parse().unwrap(),
            "2c".parse().unwrap(),
        ];
        let mut deck = Deck::new();
        deck.rig(&order);
        assert_eq!(deck.pop(), Some(order[0]));
        assert_eq!(deck.pop(), Some(order[1]));
        assert_eq!(deck.pop(), Some(order[2]));
        assert_eq!(deck.pop(), None);
    }

    #[test]
    fn holecards_set_and_clear() {
        let mut hole = HoleCards::default();
        assert!(!hole.is_dealt());
        hole.set("As".parse().unwrap(), "Ks".parse().unwrap());
        assert!(hole.is_dealt());
        assert_eq!(hole.cards().len(), 2);
        hole.clear();
        assert!(!hole.is_dealt());
    }

    #[test]
    fn community_phases() {
        let mut cc = CommunityCards::default();
        cc.set_flop(
            "2c".parse().unwrap(),
            "7d".parse().unwrap(),
            "Jh".parse().unwrap(),
        );
        assert_eq!(cc.len(), 3);
        cc.set_turn("Qs".parse().unwrap());
        assert_eq!(cc.len(), 4);
        cc.set_river("3c".parse().unwrap());
        assert_eq!(cc.len(), 5);
        cc.clear();
        assert!(cc.is_empty());
    }

    #[test]
    fn action_words() {
        assert_eq!(PlayerAction::from_word("fold"), Some(PlayerAction::Fold));
        assert_eq!(PlayerAction::from_word("allin"), Some(PlayerAction::Allin));
        assert_eq!(
            PlayerAction::from_word("reset"),
            Some(PlayerAction::ResetAction)
        );
        assert_eq!(PlayerAction::from_word("dance"), None);
    }

    #[test]
    fn player_starts_unseated() {
        let p = Player::new(42, "uuid", 1500, 30);
        assert_eq!(p.table_no, -1);
        assert_eq!(p.seat_no, -1);
        assert_eq!(p.stake, 1500);
        assert_eq!(p.last_action, PlayerAction::None);
        assert!(p.next_action.is_none());
        assert!(!p.insurance[0].has_offer());
    }
}
