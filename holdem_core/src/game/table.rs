//! One table: seats, dealer/blind pointers, the deck and board, the
//! layered pots, and the scheduled state machine cursor.

use std::time::{Duration, Instant};

use super::constants::MAX_SEATS;
use super::entities::{Chips, ClientId, CommunityCards, Deck, SeatIndex, TableId};
use super::pot::{self, Pot, SeatBet};

/// Table state machine states. Wire codes are part of the table
/// snapshot and must stay stable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TableState {
    GameStart,
    ElectDealer,
    NewRound,
    Blinds,
    Betting,
    BettingEnd,
    AskShow,
    AllFolded,
    Showdown,
    EndRound,
    Suspend,
    Resume,
}

impl TableState {
    #[must_use]
    pub fn wire_code(self) -> u8 {
        match self {
            TableState::GameStart => 0,
            TableState::ElectDealer => 1,
            TableState::NewRound => 2,
            TableState::Blinds => 3,
            TableState::Betting => 4,
            TableState::BettingEnd => 5,
            TableState::AskShow => 6,
            TableState::AllFolded => 7,
            TableState::Showdown => 8,
            TableState::EndRound => 9,
            TableState::Suspend => 10,
            TableState::Resume => 11,
        }
    }
}

/// Betting street cursor.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum BettingRound {
    Preflop,
    Flop,
    Turn,
    River,
}

impl BettingRound {
    #[must_use]
    pub fn wire_code(self) -> u8 {
        match self {
            BettingRound::Preflop => 0,
            BettingRound::Flop => 1,
            BettingRound::Turn => 2,
            BettingRound::River => 3,
        }
    }
}

/// Why a table is suspended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SuspendReason {
    None,
    BuyInsurance,
}

impl SuspendReason {
    #[must_use]
    pub fn wire_code(self) -> u8 {
        match self {
            SuspendReason::None => 0,
            SuspendReason::BuyInsurance => 1,
        }
    }
}

/// One seat. `occupied` implies a player id is present; `in_round`
/// implies `occupied`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Seat {
    pub occupied: bool,
    pub player_id: Option<ClientId>,
    pub bet: Chips,
    pub in_round: bool,
    /// The system forced this seat's cards open (last aggressor on the
    /// river, or an all-in runout).
    pub auto_showcards: bool,
    /// The player chose to show.
    pub manual_showcards: bool,
}

impl Seat {
    #[must_use]
    pub fn showing(&self) -> bool {
        self.auto_showcards || self.manual_showcards
    }
}

#[derive(Debug)]
pub struct Table {
    pub table_id: TableId,

    pub deck: Deck,
    pub community: CommunityCards,

    state: TableState,
    /// State to restore when a suspension resolves.
    pub resume_state: TableState,
    pub suspend_reason: SuspendReason,
    pub suspend_ticks: u32,
    pub max_suspend_ticks: u32,

    scheduled_until: Option<Instant>,

    /// When the clock started for the seat currently asked to act.
    pub timeout_start: Instant,

    /// No undecided betting remains even though streets are still to
    /// be dealt.
    pub nomoreaction: bool,
    pub betround: BettingRound,

    pub seats: [Seat; MAX_SEATS],
    pub dealer: SeatIndex,
    pub sb: SeatIndex,
    pub bb: SeatIndex,
    pub last_straddle: Option<SeatIndex>,
    pub cur_player: Option<SeatIndex>,
    pub last_bet_player: SeatIndex,

    /// Highest seat bet of the current street.
    pub bet_amount: Chips,
    /// Table bet before the last raise; feeds the minimum-bet rule.
    pub last_bet_amount: Chips,
    pub straddle_amount: Chips,
    pub straddle_rate: u32,

    pub pots: Vec<Pot>,
}

impl Table {
    #[must_use]
    pub fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            deck: Deck::new(),
            community: CommunityCards::default(),
            state: TableState::GameStart,
            resume_state: TableState::GameStart,
            suspend_reason: SuspendReason::None,
            suspend_ticks: 0,
            max_suspend_ticks: 0,
            scheduled_until: None,
            timeout_start: Instant::now(),
            nomoreaction: false,
            betround: BettingRound::Preflop,
            seats: [Seat::default(); MAX_SEATS],
            dealer: 0,
            sb: 0,
            bb: 0,
            last_straddle: None,
            cur_player: None,
            last_bet_player: 0,
            bet_amount: 0,
            last_bet_amount: 0,
            straddle_amount: 0,
            straddle_rate: 1,
            pots: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> TableState {
        self.state
    }

    /// Switch state with no delay.
    pub fn set_state(&mut self, state: TableState) {
        self.state = state;
        self.scheduled_until = None;
    }

    /// Switch to `state` after `delay`; ticks consume the wait first.
    pub fn schedule_state(&mut self, state: TableState, delay: Duration) {
        self.state = state;
        self.scheduled_until = if delay.is_zero() {
            None
        } else {
            Some(Instant::now() + delay)
        };
    }

    /// True while a scheduled delay is still running; clears itself
    /// once the deadline passes.
    pub fn consume_delay(&mut self) -> bool {
        match self.scheduled_until {
            Some(deadline) if Instant::now() < deadline => true,
            Some(_) => {
                self.scheduled_until = None;
                false
            }
            None => false,
        }
    }

    pub fn restart_action_clock(&mut self) {
        self.timeout_start = Instant::now();
    }

    /// Next occupied seat clockwise of `pos`; `pos` itself if it is the
    /// only occupied seat. `None` on an empty table.
    #[must_use]
    pub fn next_seat(&self, pos: SeatIndex) -> Option<SeatIndex> {
        (1..=MAX_SEATS)
            .map(|i| (pos + i) % MAX_SEATS)
            .find(|i| self.seats[*i].occupied)
    }

    /// Next seat still in the hand clockwise of `pos`.
    #[must_use]
    pub fn next_active_seat(&self, pos: SeatIndex) -> Option<SeatIndex> {
        (1..=MAX_SEATS)
            .map(|i| (pos + i) % MAX_SEATS)
            .find(|i| self.seats[*i].occupied && self.seats[*i].in_round)
    }

    /// Previous seat still in the hand counter-clockwise of `pos`.
    #[must_use]
    pub fn prev_active_seat(&self, pos: SeatIndex) -> Option<SeatIndex> {
        (1..=MAX_SEATS)
            .map(|i| (pos + MAX_SEATS - (i % MAX_SEATS)) % MAX_SEATS)
            .find(|i| self.seats[*i].occupied && self.seats[*i].in_round)
    }

    #[must_use]
    pub fn count_occupied(&self) -> usize {
        self.seats.iter().filter(|s| s.occupied).count()
    }

    #[must_use]
    pub fn count_active(&self) -> usize {
        self.seats.iter().filter(|s| s.occupied && s.in_round).count()
    }

    #[must_use]
    pub fn is_seat_available(&self, seat: SeatIndex) -> bool {
        seat < MAX_SEATS && !self.seats[seat].occupied
    }

    /// Vacate a seat; the player object itself stays with the game.
    pub fn clear_seat(&mut self, seat: SeatIndex) {
        if seat < MAX_SEATS {
            self.seats[seat] = Seat::default();
        }
    }

    /// Fold the current street's bets into the pot layers and zero the
    /// seat bets. `stake_of` reports the chips a player has behind so
    /// tapped-out seats cap their pot.
    pub fn collect_bets(&mut self, stake_of: impl Fn(ClientId) -> Chips) {
        let bets: Vec<SeatBet> = self
            .seats
            .iter()
            .enumerate()
            .filter(|(_, s)| s.occupied)
            .map(|(i, s)| SeatBet {
                seat: i,
                bet: s.bet,
                in_round: s.in_round,
                all_in: s.in_round && s.player_id.map(&stake_of) == Some(0),
            })
            .collect();
        pot::fold_bets(&mut self.pots, &bets);
        for seat in &mut self.seats {
            seat.bet = 0;
        }
    }

    /// Total chips sitting in pots.
    #[must_use]
    pub fn pot_total(&self) -> Chips {
        self.pots.iter().map(|p| p.amount).sum()
    }

    /// Total chips still in front of the seats.
    #[must_use]
    pub fn bets_total(&self) -> Chips {
        self.seats.iter().map(|s| s.bet).sum()
    }
}
