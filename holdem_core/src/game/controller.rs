//! The game controller: owns the players and tables of one game, runs
//! the per-table state machine off the server tick, applies the blind
//! schedule, seating, rebuys, straddles, antes and the insurance
//! window, and fans snapshots out through its outbox.
//!
//! One controller type covers both variants; the divergent behaviors
//! (start condition, blind rule, timeout consequences, leave handling,
//! expiry) hang off a small [`GameVariant`] policy object.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use super::constants::{
    DEFAULT_BLINDS_FACTOR, DEFAULT_BLINDS_START, DEFAULT_BLINDS_TIME_SECS, DEFAULT_EXPIRE_IN_SECS,
    DEFAULT_PLAYER_STAKES, DEFAULT_PLAYER_TIMEOUT_SECS, INSURANCE_MAX_OUTS,
    INSURANCE_SUSPEND_TICKS, MAX_SEATS, MIN_PLAYERS, TIMEOUT_STRIKES,
};
use super::entities::{
    BlindLevel, BlindRule, Card, Chips, ClientId, GameId, Player, PlayerAction, SchedAction,
    SeatIndex, TableId,
};
use super::eval::{Evaluator, HandStrength, StandardEvaluator, win_list};
use super::insurance;
use super::table::{BettingRound, SuspendReason, Table, TableState};
use crate::protocol::{SnapCode, cards, game_state, player_action, seat_state};

/// Big-blind ladder for elimination games, one entry per level.
const SNG_BLIND_LEVELS: [Chips; 26] = [
    20, 30, 50, 100, 200, 400, 600, 800, 1000, 1200, 1600, 2000, 3000, 4000, 6000, 8000, 10_000,
    12_000, 16_000, 20_000, 24_000, 30_000, 40_000, 60_000, 80_000, 100_000,
];

/// Variant policy: everything that differs between a persistent cash
/// table and an elimination game.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GameVariant {
    /// Persistent cash table: constant blinds, rebuys, leave/rejoin,
    /// ante/straddle, insurance, wall-clock expiry.
    Cash,
    /// Elimination game: starts when full, timed blind levels, busts
    /// are final, ends when one player remains.
    Sng,
}

impl GameVariant {
    #[must_use]
    pub fn wire_mode(self) -> u8 {
        match self {
            GameVariant::Cash => crate::protocol::game_info::MODE_RING,
            GameVariant::Sng => crate::protocol::game_info::MODE_SNG,
        }
    }

    fn blind_rule(self) -> BlindRule {
        match self {
            GameVariant::Cash => BlindRule::Fixed,
            GameVariant::Sng => BlindRule::ByTime,
        }
    }

    fn end_round_delay(self) -> u64 {
        match self {
            GameVariant::Cash => 4,
            GameVariant::Sng => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GameStatus {
    Created,
    Started,
    Paused,
    Ended,
    Expired,
    Finished,
}

/// Everything configurable at `CREATE` time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GameConfig {
    pub name: String,
    pub password: String,
    pub owner: ClientId,
    pub max_players: usize,
    pub player_stakes: Chips,
    pub timeout_secs: u64,
    pub blinds_start: Chips,
    pub blinds_factor: u32,
    pub blinds_time_secs: u64,
    pub ante: Chips,
    pub mandatory_straddle: bool,
    pub restart: bool,
    pub expire_in_secs: u64,
    pub enable_insurance: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            name: "game".to_string(),
            password: String::new(),
            owner: -1,
            max_players: MAX_SEATS,
            player_stakes: DEFAULT_PLAYER_STAKES,
            timeout_secs: DEFAULT_PLAYER_TIMEOUT_SECS,
            blinds_start: DEFAULT_BLINDS_START,
            blinds_factor: DEFAULT_BLINDS_FACTOR,
            blinds_time_secs: DEFAULT_BLINDS_TIME_SECS,
            ante: 0,
            mandatory_straddle: false,
            restart: false,
            expire_in_secs: DEFAULT_EXPIRE_IN_SECS,
            enable_insurance: false,
        }
    }
}

/// Inter-state delays. Production uses [`Pacing::standard`]; tests and
/// simulations run with [`Pacing::instant`] so every tick advances.
#[derive(Clone, Copy, Debug)]
pub struct Pacing {
    pub game_start: Duration,
    pub blinds_to_betting: Duration,
    pub betting_step: Duration,
    pub street_end: Duration,
    pub all_folded: Duration,
    pub showdown: Duration,
    pub suspend_step: Duration,
    /// Grace period before the show/muck default kicks in.
    pub ask_show_timeout: Duration,
    /// Pause between hands; `None` falls back to the variant default.
    pub end_round: Option<Duration>,
}

impl Pacing {
    #[must_use]
    pub fn standard() -> Self {
        Self {
            game_start: Duration::from_secs(5),
            blinds_to_betting: Duration::from_secs(3),
            betting_step: Duration::from_secs(1),
            street_end: Duration::from_secs(2),
            all_folded: Duration::from_secs(2),
            showdown: Duration::from_secs(4),
            suspend_step: Duration::from_secs(1),
            ask_show_timeout: Duration::from_secs(1),
            end_round: None,
        }
    }

    #[must_use]
    pub fn instant() -> Self {
        Self {
            game_start: Duration::ZERO,
            blinds_to_betting: Duration::ZERO,
            betting_step: Duration::ZERO,
            street_end: Duration::ZERO,
            all_folded: Duration::ZERO,
            showdown: Duration::ZERO,
            suspend_step: Duration::ZERO,
            ask_show_timeout: Duration::ZERO,
            end_round: Some(Duration::ZERO),
        }
    }
}

/// Blind schedule plus its live cursor.
#[derive(Debug)]
struct Blinds {
    rule: BlindRule,
    amount: Chips,
    start: Chips,
    interval: Duration,
    last_advance: Instant,
    last_advance_unix: i64,
    /// Zero-based index into `levels`.
    level: usize,
    levels: Vec<BlindLevel>,
}

impl Blinds {
    fn new(variant: GameVariant, start: Chips, interval_secs: u64) -> Self {
        let levels = match variant {
            GameVariant::Cash => vec![BlindLevel {
                level: 1,
                big_blind: start,
                ante: 0,
            }],
            GameVariant::Sng => SNG_BLIND_LEVELS
                .iter()
                .enumerate()
                .map(|(i, bb)| BlindLevel {
                    level: i as u32 + 1,
                    big_blind: *bb,
                    ante: 0,
                })
                .collect(),
        };
        Self {
            rule: variant.blind_rule(),
            amount: start,
            start,
            interval: Duration::from_secs(interval_secs),
            last_advance: Instant::now(),
            last_advance_unix: chrono::Utc::now().timestamp(),
            level: 0,
            levels,
        }
    }

    /// `(next display level, next big blind)`, zeroes past the ladder.
    fn next_level_info(&self) -> (u32, Chips) {
        match self.levels.get(self.level + 1) {
            Some(l) => (l.level, l.big_blind),
            None => (0, 0),
        }
    }
}

/// Who a controller-originated message is for. The server resolves
/// `Listeners` to the game's registered players plus spectators.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Recipient {
    Listeners,
    Client(ClientId),
}

#[derive(Clone, Debug)]
pub enum OutKind {
    Snap { code: SnapCode, payload: String },
    Chat { text: String },
}

/// One addressed, fire-and-forget message from the engine.
#[derive(Clone, Debug)]
pub struct Outgoing {
    pub to: Recipient,
    pub tid: TableId,
    pub kind: OutKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TickOutcome {
    Running,
    /// The game is over; the server may respawn it if restart is set.
    Closed,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum GameError {
    #[error("game is full")]
    GameFull,
    #[error("you are already registered")]
    AlreadyRegistered,
    #[error("cannot join game after it's started")]
    RegistrationClosed,
    #[error("you are not registered")]
    NotAPlayer,
    #[error("you are already subscribed")]
    AlreadySubscribed,
    #[error("you are not subscribed")]
    NotSubscribed,
    #[error("leaving is not allowed once the game has started")]
    LeaveAfterStart,
    #[error("could not resume player")]
    ResumeFailed,
    #[error("no free seat")]
    NoSeat,
    #[error("unable to straddle")]
    StraddleRefused,
    #[error("unable to buy insurance")]
    InsuranceRefused,
}

pub struct GameController {
    game_id: GameId,
    variant: GameVariant,
    config: GameConfig,
    status: GameStatus,
    hand_no: u32,

    players: BTreeMap<ClientId, Player>,
    spectators: BTreeSet<ClientId>,
    tables: BTreeMap<TableId, Table>,
    next_tid: TableId,

    blinds: Blinds,
    finish_list: Vec<ClientId>,

    created_at: Instant,
    started_at: Option<Instant>,

    rng: StdRng,
    evaluator: Box<dyn Evaluator + Send>,
    pacing: Pacing,
    rigged_deck: Option<Vec<Card>>,

    outbox: VecDeque<Outgoing>,

    /// Whether the insurance window already ran this hand, per round.
    asked_insurance: [bool; 2],
    /// An insurance payout landed mid-hand; disables the conservation
    /// check for the rest of the hand.
    insurance_credited: bool,
}

impl GameController {
    #[must_use]
    pub fn new(game_id: GameId, variant: GameVariant, config: GameConfig) -> Self {
        let blinds = Blinds::new(variant, config.blinds_start, config.blinds_time_secs);
        Self {
            game_id,
            variant,
            config,
            status: GameStatus::Created,
            hand_no: 0,
            players: BTreeMap::new(),
            spectators: BTreeSet::new(),
            tables: BTreeMap::new(),
            next_tid: 0,
            blinds,
            finish_list: Vec::new(),
            created_at: Instant::now(),
            started_at: None,
            rng: StdRng::from_os_rng(),
            evaluator: Box::new(StandardEvaluator),
            pacing: Pacing::standard(),
            outbox: VecDeque::new(),
            rigged_deck: None,
            asked_insurance: [false, false],
            insurance_credited: false,
        }
    }

    // --- accessors -----------------------------------------------------

    #[must_use]
    pub fn game_id(&self) -> GameId {
        self.game_id
    }

    #[must_use]
    pub fn variant(&self) -> GameVariant {
        self.variant
    }

    #[must_use]
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    #[must_use]
    pub fn status(&self) -> GameStatus {
        self.status
    }

    #[must_use]
    pub fn is_created(&self) -> bool {
        self.status == GameStatus::Created
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.status == GameStatus::Started
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.status == GameStatus::Paused
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        matches!(
            self.status,
            GameStatus::Ended | GameStatus::Expired | GameStatus::Finished
        )
    }

    pub fn set_finished(&mut self) {
        self.status = GameStatus::Finished;
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn owner(&self) -> ClientId {
        self.config.owner
    }

    pub fn set_owner(&mut self, cid: ClientId) {
        self.config.owner = cid;
    }

    #[must_use]
    pub fn restart(&self) -> bool {
        self.config.restart
    }

    pub fn set_restart(&mut self, restart: bool) {
        self.config.restart = restart;
    }

    #[must_use]
    pub fn has_password(&self) -> bool {
        !self.config.password.is_empty()
    }

    #[must_use]
    pub fn check_password(&self, password: &str) -> bool {
        !self.has_password() || self.config.password == password
    }

    #[must_use]
    pub fn hand_no(&self) -> u32 {
        self.hand_no
    }

    #[must_use]
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    #[must_use]
    pub fn is_player(&self, cid: ClientId) -> bool {
        self.players.contains_key(&cid)
    }

    #[must_use]
    pub fn is_spectator(&self, cid: ClientId) -> bool {
        self.spectators.contains(&cid)
    }

    #[must_use]
    pub fn finish_list(&self) -> &[ClientId] {
        &self.finish_list
    }

    /// Registered players plus spectators: everyone snapshots go to.
    #[must_use]
    pub fn listener_list(&self) -> Vec<ClientId> {
        self.players
            .keys()
            .copied()
            .chain(self.spectators.iter().copied())
            .collect()
    }

    /// Player ids, skipping leavers unless asked for them.
    #[must_use]
    pub fn player_list(&self, including_leavers: bool) -> Vec<ClientId> {
        self.players
            .values()
            .filter(|p| including_leavers || !p.wanna_leave)
            .map(|p| p.client_id)
            .collect()
    }

    /// `cid:tid:seat:stake` entries for the `PLAYERLIST` reply.
    #[must_use]
    pub fn player_list_entries(&self) -> Vec<String> {
        self.players
            .values()
            .filter(|p| !p.wanna_leave)
            .map(|p| format!("{}:{}:{}:{}", p.client_id, p.table_no, p.seat_no, p.stake))
            .collect()
    }

    #[must_use]
    pub fn find_player(&self, cid: ClientId) -> Option<&Player> {
        self.players.get(&cid)
    }

    pub fn select_new_owner(&mut self) {
        if let Some(cid) = self.players.keys().next() {
            self.config.owner = *cid;
        }
    }

    // --- test and tooling hooks ----------------------------------------

    pub fn set_pacing(&mut self, pacing: Pacing) {
        self.pacing = pacing;
    }

    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Replace random deals with a fixed card sequence, every hand.
    pub fn rig_deck(&mut self, cards: Vec<Card>) {
        self.rigged_deck = Some(cards);
    }

    #[must_use]
    pub fn table(&self, tid: TableId) -> Option<&Table> {
        self.tables.get(&tid)
    }

    #[must_use]
    pub fn first_table(&self) -> Option<&Table> {
        self.tables.values().next()
    }

    // --- outbox --------------------------------------------------------

    pub fn drain_outbox(&mut self) -> VecDeque<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    fn snap(&mut self, tid: TableId, code: SnapCode, payload: String) {
        self.outbox.push_back(Outgoing {
            to: Recipient::Listeners,
            tid,
            kind: OutKind::Snap { code, payload },
        });
    }

    fn snap_client(&mut self, cid: ClientId, tid: TableId, code: SnapCode, payload: String) {
        self.outbox.push_back(Outgoing {
            to: Recipient::Client(cid),
            tid,
            kind: OutKind::Snap { code, payload },
        });
    }

    fn chat_client(&mut self, cid: ClientId, tid: TableId, text: &str) {
        self.outbox.push_back(Outgoing {
            to: Recipient::Client(cid),
            tid,
            kind: OutKind::Chat {
                text: text.to_string(),
            },
        });
    }

    // --- registration and session-facing commands ----------------------

    pub fn add_spectator(&mut self, cid: ClientId) -> Result<(), GameError> {
        if self.is_spectator(cid) || self.is_player(cid) {
            return Err(GameError::AlreadySubscribed);
        }
        self.spectators.insert(cid);
        Ok(())
    }

    pub fn remove_spectator(&mut self, cid: ClientId) -> Result<(), GameError> {
        if self.spectators.remove(&cid) {
            Ok(())
        } else {
            Err(GameError::NotSubscribed)
        }
    }

    pub fn add_player(&mut self, cid: ClientId, uuid: &str, stake: Chips) -> Result<(), GameError> {
        match self.variant {
            GameVariant::Cash => {
                if let Some(t) = self.tables.values().next() {
                    if t.count_active() == self.config.max_players {
                        return Err(GameError::GameFull);
                    }
                }
                if self.is_player(cid) {
                    return Err(GameError::AlreadyRegistered);
                }
                let _ = self.remove_spectator(cid);
                let player = Player::new(cid, uuid, stake, self.config.timeout_secs);
                self.players.insert(cid, player);
                if self.tables.is_empty() {
                    self.place_table(0, self.players.len());
                } else {
                    self.arrange_seat(cid)?;
                }
                Ok(())
            }
            GameVariant::Sng => {
                if self.is_started() {
                    return Err(GameError::RegistrationClosed);
                }
                if self.players.len() == self.config.max_players {
                    return Err(GameError::GameFull);
                }
                if self.is_player(cid) {
                    return Err(GameError::AlreadyRegistered);
                }
                let _ = self.remove_spectator(cid);
                self.players
                    .insert(cid, Player::new(cid, uuid, stake, self.config.timeout_secs));
                Ok(())
            }
        }
    }

    pub fn remove_player(&mut self, cid: ClientId) -> Result<(), GameError> {
        match self.variant {
            GameVariant::Cash => {
                let Some(p) = self.players.get_mut(&cid) else {
                    return Err(GameError::NotAPlayer);
                };
                // Removal is deferred; the seat clears at the next
                // hand start.
                p.wanna_leave = true;
                if self.config.owner == cid {
                    self.select_new_owner();
                }
                Ok(())
            }
            GameVariant::Sng => {
                if self.is_started() {
                    return Err(GameError::LeaveAfterStart);
                }
                if self.players.remove(&cid).is_none() {
                    return Err(GameError::NotAPlayer);
                }
                if self.config.owner == cid {
                    self.select_new_owner();
                }
                Ok(())
            }
        }
    }

    /// Re-seat a returning player (cash). Mid-hand, a still-live seat
    /// gets its private cards replayed.
    pub fn resume_player(&mut self, cid: ClientId) -> Result<(), GameError> {
        if !self.is_player(cid) {
            return Err(GameError::NotAPlayer);
        }
        self.arrange_seat(cid)?;
        let Some(p) = self.players.get_mut(&cid) else {
            return Err(GameError::NotAPlayer);
        };
        p.wanna_leave = false;
        let (seat_no, table_no) = (p.seat_no, p.table_no);

        let Some(&tid) = self.tables.keys().next() else {
            return Ok(());
        };
        let Some(mut t) = self.tables.remove(&tid) else {
            return Ok(());
        };
        let in_hand = t.state().wire_code() > TableState::Blinds.wire_code()
            && seat_no >= 0
            && t.seats[seat_no as usize].in_round;
        if in_hand {
            self.send_table_snapshot(&mut t);
            if let Some(p) = self.players.get(&cid) {
                let cs = p.holecards.cards();
                if cs.len() == 2 {
                    let payload = format!("{} {} {}", cards::HOLE, cs[0], cs[1]);
                    self.snap_client(cid, table_no, SnapCode::Cards, payload);
                }
            }
        }
        self.tables.insert(tid, t);
        Ok(())
    }

    pub fn rebuy(&mut self, cid: ClientId, stake: Chips) -> Result<(), GameError> {
        let Some(p) = self.players.get_mut(&cid) else {
            return Err(GameError::NotAPlayer);
        };
        p.rebuy_stake = stake;
        Ok(())
    }

    /// Extend a player's action clock and tell the table.
    pub fn add_timeout(&mut self, cid: ClientId, secs: u64) -> Result<(), GameError> {
        let Some(p) = self.players.get_mut(&cid) else {
            return Err(GameError::NotAPlayer);
        };
        p.timeout_secs += secs;
        let (timeout_secs, tid) = (p.timeout_secs, p.table_no);
        if let Some(t) = self.tables.get(&tid) {
            let elapsed = t.timeout_start.elapsed().as_secs();
            let left = timeout_secs.saturating_sub(elapsed);
            let payload = format!("{cid} {secs} {left}");
            self.snap(tid, SnapCode::Respite, payload);
        }
        Ok(())
    }

    pub fn set_player_action(
        &mut self,
        cid: ClientId,
        action: PlayerAction,
        amount: Chips,
    ) -> Result<(), GameError> {
        let Some(p) = self.players.get_mut(&cid) else {
            return Err(GameError::NotAPlayer);
        };
        match action {
            PlayerAction::ResetAction => p.next_action = None,
            PlayerAction::Sitout => p.sitout = true,
            PlayerAction::Back => p.sitout = false,
            _ => {
                p.next_action = Some(SchedAction { action, amount });
                p.timed_out_count = 0;
            }
        }
        Ok(())
    }

    // --- seating -------------------------------------------------------

    fn take_seat(&mut self, tid: TableId, seat_no: SeatIndex, cid: ClientId) {
        info!("game {}: placing player {} at seat {}", self.game_id, cid, seat_no);
        let Some(t) = self.tables.get_mut(&tid) else {
            return;
        };
        let seat = &mut t.seats[seat_no];
        seat.occupied = true;
        seat.player_id = Some(cid);
        seat.auto_showcards = false;
        seat.manual_showcards = false;
        if let Some(p) = self.players.get_mut(&cid) {
            p.table_no = tid;
            p.seat_no = seat_no as i32;
            p.sitout = false;
        }
    }

    /// Seat a (re)joining cash player: previous seat when still free,
    /// otherwise a random free one.
    fn arrange_seat(&mut self, cid: ClientId) -> Result<(), GameError> {
        let Some(&tid) = self.tables.keys().next() else {
            warn!("game {}: no table to seat player {cid}", self.game_id);
            return Err(GameError::NoSeat);
        };
        let Some(p) = self.players.get(&cid) else {
            return Err(GameError::NotAPlayer);
        };
        let last_seat = p.seat_no;

        if last_seat >= 0 {
            let seat = last_seat as usize;
            let t = &self.tables[&tid];
            if t.is_seat_available(seat) || t.seats[seat].player_id == Some(cid) {
                self.take_seat(tid, seat, cid);
            }
            return Ok(());
        }

        for _ in 0..=10 {
            let seat = self.rng.random_range(0..MAX_SEATS - 1);
            if self.tables[&tid].is_seat_available(seat) {
                self.take_seat(tid, seat, cid);
                return Ok(());
            }
        }
        // Random probing ran dry; fall back to a scan.
        if let Some(seat) = (0..MAX_SEATS).find(|s| self.tables[&tid].is_seat_available(*s)) {
            self.take_seat(tid, seat, cid);
            return Ok(());
        }
        Err(GameError::NoSeat)
    }

    /// Create a table and place `total` players around it, randomized,
    /// using the canonical placement map. The first placed seat holds
    /// the button.
    fn place_table(&mut self, offset: usize, total: usize) {
        let tid = self.next_tid;
        self.next_tid += 1;
        let mut t = Table::new(tid);

        let mut placed: Vec<ClientId> = self
            .players
            .keys()
            .skip(offset)
            .take(total)
            .copied()
            .collect();
        placed.shuffle_with(&mut self.rng);

        const PLACEMENT: [[usize; MAX_SEATS]; MAX_SEATS] = [
            [4, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            [4, 9, 0, 0, 0, 0, 0, 0, 0, 0],
            [4, 8, 0, 0, 0, 0, 0, 0, 0, 0],
            [3, 5, 8, 0, 0, 0, 0, 0, 0, 0],
            [4, 6, 8, 0, 2, 0, 0, 0, 0, 0],
            [1, 2, 4, 6, 7, 9, 0, 0, 0, 0],
            [4, 6, 2, 7, 1, 8, 0, 0, 0, 0],
            [1, 2, 3, 5, 6, 7, 8, 0, 0, 0],
            [4, 6, 2, 7, 1, 8, 0, 5, 3, 0],
            [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
        ];

        let row = placed.len().saturating_sub(1).min(MAX_SEATS - 1);
        let mut chose_dealer = false;
        for (idx, cid) in placed.iter().enumerate() {
            let place = PLACEMENT[row][idx];
            debug!(
                "game {}: placement row={row} idx={idx} seat={place} player={cid}",
                self.game_id
            );
            t.seats[place].occupied = true;
            t.seats[place].player_id = Some(*cid);
            if let Some(p) = self.players.get_mut(cid) {
                p.table_no = tid;
                p.seat_no = place as i32;
            }
            if !chose_dealer {
                t.dealer = place;
                chose_dealer = true;
            }
        }

        self.snap(tid, SnapCode::GameState, game_state::START.to_string());
        t.set_state(TableState::GameStart);
        self.send_table_snapshot(&mut t);
        t.schedule_state(TableState::NewRound, self.pacing.game_start);
        self.tables.insert(tid, t);
    }

    // --- lifecycle -----------------------------------------------------

    pub fn start(&mut self) {
        if self.is_started() {
            return;
        }
        if self.variant == GameVariant::Sng && self.players.len() < MIN_PLAYERS {
            return;
        }
        if self.tables.is_empty() {
            self.place_table(0, self.players.len());
        }
        self.blinds.amount = self.blinds.start;
        self.blinds.last_advance = Instant::now();
        self.blinds.last_advance_unix = chrono::Utc::now().timestamp();

        info!("game {} has been started", self.game_id);
        self.status = GameStatus::Started;
        self.started_at = Some(Instant::now());
    }

    pub fn pause(&mut self) {
        if self.status != GameStatus::Started {
            return;
        }
        self.snap(-1, SnapCode::GameState, game_state::PAUSE.to_string());
        self.status = GameStatus::Paused;
        info!("game {} has been paused", self.game_id);
    }

    pub fn resume(&mut self) {
        if self.status != GameStatus::Paused {
            return;
        }
        self.snap(-1, SnapCode::GameState, game_state::RESUME.to_string());
        self.status = GameStatus::Started;
        info!("game {} has been resumed", self.game_id);
    }

    fn expire(&mut self) {
        self.status = GameStatus::Expired;
        self.snap(-1, SnapCode::GameState, game_state::END.to_string());
        info!("game {} has expired", self.game_id);
    }

    fn end_game(&mut self, last_table: &Table) {
        self.status = GameStatus::Ended;
        self.snap(-1, SnapCode::GameState, game_state::END.to_string());
        // The survivor finishes first.
        if let Some(cid) = last_table
            .seats
            .iter()
            .find(|s| s.occupied)
            .and_then(|s| s.player_id)
        {
            self.finish_list.push(cid);
        }
    }

    /// Advance the game by at most one state transition per table.
    pub fn tick(&mut self) -> TickOutcome {
        match self.status {
            GameStatus::Created => {
                match self.variant {
                    GameVariant::Cash => {
                        if !self.players.is_empty() {
                            info!("starting cash game {}", self.game_id);
                            self.start();
                        } else if self.created_at.elapsed().as_secs() >= self.config.expire_in_secs
                        {
                            self.expire();
                        }
                        return TickOutcome::Running;
                    }
                    GameVariant::Sng => {
                        if self.players.len() == self.config.max_players {
                            info!("starting elimination game {}", self.game_id);
                            self.start();
                        }
                        return TickOutcome::Running;
                    }
                }
            }
            GameStatus::Ended | GameStatus::Expired | GameStatus::Finished => {
                return TickOutcome::Closed;
            }
            GameStatus::Paused => return TickOutcome::Running,
            GameStatus::Started => {}
        }

        let tids: Vec<TableId> = self.tables.keys().copied().collect();
        for tid in tids {
            if self.handle_table(tid) {
                // Table closed: with the last table gone the game is
                // over and the survivor takes first place.
                if let Some(t) = self.tables.remove(&tid) {
                    if self.tables.is_empty() {
                        self.end_game(&t);
                    }
                }
            }
        }

        if self.variant == GameVariant::Cash {
            if let Some(started) = self.started_at {
                if started.elapsed().as_secs() >= self.config.expire_in_secs {
                    self.expire();
                }
            }
        }

        TickOutcome::Running
    }

    /// Returns true when the table has closed.
    fn handle_table(&mut self, tid: TableId) -> bool {
        let Some(mut t) = self.tables.remove(&tid) else {
            return false;
        };
        if t.consume_delay() {
            self.tables.insert(tid, t);
            return false;
        }

        match t.state() {
            TableState::NewRound => self.state_new_round(&mut t),
            TableState::Blinds => self.state_blinds(&mut t),
            TableState::Betting => self.state_betting(&mut t),
            TableState::BettingEnd => self.state_betting_end(&mut t),
            TableState::AskShow => self.state_ask_show(&mut t),
            TableState::AllFolded => self.state_all_folded(&mut t),
            TableState::Showdown => self.state_showdown(&mut t),
            TableState::EndRound => self.state_end_round(&mut t),
            TableState::Suspend => self.state_suspend(&mut t),
            TableState::Resume => self.state_resume(&mut t),
            TableState::GameStart | TableState::ElectDealer => {}
        }

        let closed = self.variant == GameVariant::Sng && t.count_occupied() == 1;
        self.tables.insert(tid, t);
        closed
    }

    // --- helpers over seats and players --------------------------------

    fn seat_player_id(t: &Table, seat: SeatIndex) -> Option<ClientId> {
        t.seats[seat].player_id.filter(|_| t.seats[seat].occupied)
    }

    fn stake_of(&self, cid: ClientId) -> Chips {
        self.players.get(&cid).map_or(0, |p| p.stake)
    }

    /// All (or all but one) live players have no chips behind.
    fn is_allin(&self, t: &Table) -> bool {
        let with_chips = t
            .seats
            .iter()
            .filter(|s| s.occupied && s.in_round)
            .filter_map(|s| s.player_id)
            .filter(|cid| self.stake_of(*cid) > 0)
            .count();
        with_chips <= 1
    }

    fn reset_last_actions(&mut self, t: &Table) {
        for seat in t.seats.iter().filter(|s| s.occupied) {
            if let Some(cid) = seat.player_id {
                if let Some(p) = self.players.get_mut(&cid) {
                    p.reset_last_action();
                }
            }
        }
    }

    fn collect_bets(&mut self, t: &mut Table) {
        let stakes: BTreeMap<ClientId, Chips> =
            self.players.iter().map(|(cid, p)| (*cid, p.stake)).collect();
        t.collect_bets(|cid| stakes.get(&cid).copied().unwrap_or(0));
        self.check_conservation(t);
    }

    /// Log-only conservation invariant: everything wagered this hand
    /// sits in the pots once the street is collected.
    fn check_conservation(&self, t: &Table) {
        if self.insurance_credited {
            return;
        }
        let mut wagered: i64 = 0;
        for seat in t.seats.iter().filter(|s| s.occupied) {
            if let Some(p) = seat.player_id.and_then(|cid| self.players.get(&cid)) {
                wagered += i64::from(p.stake_before) - i64::from(p.stake);
            }
        }
        let held = i64::from(t.pot_total()) + i64::from(t.bets_total());
        if wagered != held {
            error!(
                "game {} table {}: pot conservation broken: wagered {wagered} != held {held}",
                self.game_id, t.table_id
            );
        }
    }

    /// Deck underflow or evaluator failure: refund what can be
    /// attributed and end the hand.
    fn abort_hand(&mut self, t: &mut Table) {
        error!(
            "game {} table {}: aborting hand {}; refunding open bets",
            self.game_id, t.table_id, self.hand_no
        );
        for seat_no in 0..MAX_SEATS {
            let bet = t.seats[seat_no].bet;
            if bet == 0 {
                continue;
            }
            t.seats[seat_no].bet = 0;
            if let Some(p) = Self::seat_player_id(t, seat_no).and_then(|cid| self.players.get_mut(&cid))
            {
                p.stake += bet;
            }
        }
        let pots = std::mem::take(&mut t.pots);
        for pot in &pots {
            if pot.involved.is_empty() || pot.amount == 0 {
                continue;
            }
            let share = pot.amount / pot.involved.len() as Chips;
            let mut rest = pot.amount - share * pot.involved.len() as Chips;
            for seat_no in &pot.involved {
                if let Some(p) =
                    Self::seat_player_id(t, *seat_no).and_then(|cid| self.players.get_mut(&cid))
                {
                    p.stake += share + rest;
                    rest = 0;
                }
            }
        }
        t.schedule_state(TableState::EndRound, Duration::ZERO);
    }

    // --- dealing -------------------------------------------------------

    fn deal_hole(&mut self, t: &mut Table) {
        let mut seat = t.sb;
        for _ in 0..t.count_occupied() {
            if let Some(cid) = Self::seat_player_id(t, seat) {
                let (Some(c1), Some(c2)) = (t.deck.pop(), t.deck.pop()) else {
                    self.abort_hand(t);
                    return;
                };
                if let Some(p) = self.players.get_mut(&cid) {
                    p.holecards.set(c1, c2);
                }
                let payload = format!("{} {c1} {c2}", cards::HOLE);
                self.snap_client(cid, t.table_id, SnapCode::Cards, payload);
            }
            seat = t.next_seat(seat).unwrap_or(seat);
        }
    }

    fn deal_flop(&mut self, t: &mut Table) {
        let (Some(f1), Some(f2), Some(f3)) = (t.deck.pop(), t.deck.pop(), t.deck.pop()) else {
            self.abort_hand(t);
            return;
        };
        t.community.set_flop(f1, f2, f3);
        let payload = format!("{} {f1} {f2} {f3}", cards::FLOP);
        self.snap(t.table_id, SnapCode::Cards, payload);
    }

    fn deal_turn(&mut self, t: &mut Table) {
        let Some(c) = t.deck.pop() else {
            self.abort_hand(t);
            return;
        };
        t.community.set_turn(c);
        let payload = format!("{} {c}", cards::TURN);
        self.snap(t.table_id, SnapCode::Cards, payload);
    }

    fn deal_river(&mut self, t: &mut Table) {
        let Some(c) = t.deck.pop() else {
            self.abort_hand(t);
            return;
        };
        t.community.set_river(c);
        let payload = format!("{} {c}", cards::RIVER);
        self.snap(t.table_id, SnapCode::Cards, payload);
    }

    // --- snapshots -----------------------------------------------------

    #[must_use]
    pub fn determine_minimum_bet(&self, t: &Table) -> Chips {
        if t.bet_amount == 0 {
            self.blinds.amount
        } else {
            t.bet_amount + (t.bet_amount - t.last_bet_amount)
        }
    }

    fn send_table_snapshot(&mut self, t: &mut Table) {
        let board = t
            .community
            .cards()
            .iter()
            .map(Card::to_string)
            .collect::<Vec<_>>()
            .join(":");

        let mut seats_repr = String::new();
        for (seat_no, seat) in t.seats.iter().enumerate() {
            if !seat.occupied {
                continue;
            }
            let Some(p) = seat.player_id.and_then(|cid| self.players.get(&cid)) else {
                continue;
            };
            let hole = if t.nomoreaction || seat.showing() {
                p.holecards
                    .cards()
                    .iter()
                    .map(Card::to_string)
                    .collect::<String>()
            } else {
                "-".to_string()
            };
            let mut state_bits = 0u8;
            if seat.in_round {
                state_bits |= seat_state::IN_ROUND;
            }
            if p.sitout {
                state_bits |= seat_state::SITOUT;
            }
            seats_repr.push_str(&format!(
                "s{}:{}:{}:{}:{}:{}:{}:{} ",
                seat_no,
                p.client_id,
                state_bits,
                p.stake,
                p.rebuy_stake,
                seat.bet,
                p.last_action.wire_code(),
                hole,
            ));
        }

        let pots_repr = t
            .pots
            .iter()
            .enumerate()
            .map(|(i, pot)| format!("p{}:{}", i, pot.amount))
            .collect::<Vec<_>>()
            .join(" ");

        let turn_repr = match t.state() {
            TableState::GameStart | TableState::ElectDealer => "-1".to_string(),
            _ => format!(
                "{}:{}:{}:{}:{}",
                t.dealer,
                t.sb,
                t.bb,
                t.cur_player.map_or(-1, |s| s as i64),
                t.last_bet_player,
            ),
        };

        let minimum_bet = if t.state() == TableState::Betting {
            self.determine_minimum_bet(t)
        } else {
            0
        };
        let (next_level, next_amount) = self.blinds.next_level_info();

        let betround = if t.state() == TableState::Betting {
            i64::from(t.betround.wire_code())
        } else {
            -1
        };
        let payload = format!(
            "{}:{} {} cc:{} {} {} {} {} {} {} {} {}",
            t.state().wire_code(),
            betround,
            turn_repr,
            board,
            seats_repr.trim_end(),
            pots_repr,
            self.blinds.amount,
            self.blinds.level + 1,
            next_amount,
            next_level,
            self.blinds.last_advance_unix,
            minimum_bet,
        );
        self.snap(t.table_id, SnapCode::Table, payload);
    }

    fn send_player_show_snapshot(&mut self, tid: TableId, cid: ClientId) {
        if let Some(p) = self.players.get(&cid) {
            let cs = p.holecards.cards();
            if cs.len() == 2 {
                let payload = format!("{cid} {} {}", cs[0], cs[1]);
                self.snap(tid, SnapCode::PlayerShow, payload);
            }
        }
    }

    // --- state machine -------------------------------------------------

    fn state_new_round(&mut self, t: &mut Table) {
        match self.variant {
            GameVariant::Cash => {
                self.handle_rebuy(t);
                self.handle_wanna_leave(t);
                if t.count_active() < MIN_PLAYERS {
                    return;
                }
            }
            GameVariant::Sng => {
                self.handle_rebuy(t);
                if t.count_occupied() < MIN_PLAYERS {
                    return;
                }
            }
        }

        self.hand_no += 1;
        let payload = format!("{} {}", game_state::NEW_HAND, self.hand_no);
        self.snap(t.table_id, SnapCode::GameState, payload);
        info!(
            "hand #{} (gid={} tid={})",
            self.hand_no, self.game_id, t.table_id
        );

        match &self.rigged_deck {
            Some(cards) => {
                debug!("using rigged deck");
                t.deck.rig(cards);
            }
            None => {
                t.deck.fill();
                t.deck.shuffle(&mut self.rng);
            }
        }

        t.community.clear();
        t.bet_amount = 0;
        t.last_bet_amount = 0;
        t.nomoreaction = false;
        self.insurance_credited = false;
        t.pots.clear();
        t.pots.push(super::pot::Pot::default());

        for seat in t.seats.iter_mut().filter(|s| s.occupied) {
            seat.in_round = true;
            seat.auto_showcards = false;
            seat.manual_showcards = false;
            seat.bet = 0;
            if let Some(p) = seat.player_id.and_then(|cid| self.players.get_mut(&cid)) {
                p.holecards.clear();
                p.reset_last_action();
                p.clear_insurance();
                p.stake_before = p.stake;
                p.timeout_secs = self.config.timeout_secs;
            }
        }

        // Heads-up: the button posts the small blind.
        let headsup = t.count_occupied() == 2;
        let (Some(first), Some(second)) = (
            t.next_seat(t.dealer),
            t.next_seat(t.dealer).and_then(|s| t.next_seat(s)),
        ) else {
            return;
        };
        if headsup {
            t.bb = first;
            t.sb = second;
        } else {
            t.sb = first;
            t.bb = second;
        }

        t.cur_player = t.next_seat(t.bb);
        t.last_bet_player = t.cur_player.unwrap_or(t.bb);

        self.send_table_snapshot(t);
        t.set_state(TableState::Blinds);
    }

    fn state_blinds(&mut self, t: &mut Table) {
        match self.variant {
            GameVariant::Cash => {
                self.handle_ante(t);
                self.handle_straddle(t);
            }
            GameVariant::Sng => self.advance_blind_level(t),
        }

        t.bet_amount = self.blinds.amount;

        // Post the small blind, clamped to the stack.
        let sb_amount = self.blinds.amount / 2;
        if let Some(cid) = Self::seat_player_id(t, t.sb) {
            if let Some(p) = self.players.get_mut(&cid) {
                let posted = sb_amount.min(p.stake);
                t.seats[t.sb].bet += posted;
                p.stake -= posted;
            }
        }
        // Post the big blind.
        if let Some(cid) = Self::seat_player_id(t, t.bb) {
            if let Some(p) = self.players.get_mut(&cid) {
                let posted = self.blinds.amount.min(p.stake);
                t.seats[t.bb].bet += posted;
                p.stake -= posted;
            }
        }

        t.restart_action_clock();
        self.deal_hole(t);
        if t.state() == TableState::EndRound {
            // The hand died on a dead deck.
            return;
        }

        if self.is_allin(t) {
            let sb_stake = Self::seat_player_id(t, t.sb).map_or(0, |cid| self.stake_of(cid));
            let bb_stake = Self::seat_player_id(t, t.bb).map_or(0, |cid| self.stake_of(cid));
            if (bb_stake == 0 && sb_stake == 0)
                || (bb_stake == 0 && t.seats[t.sb].bet >= t.seats[t.bb].bet)
                || sb_stake == 0
            {
                debug!(
                    "no more action: sb-allin={} bb-allin={}",
                    sb_stake == 0,
                    bb_stake == 0
                );
                t.nomoreaction = true;
            }
        }

        if t.straddle_amount > t.bet_amount {
            t.bet_amount = t.straddle_amount;
        }
        t.betround = BettingRound::Preflop;
        t.schedule_state(TableState::Betting, self.pacing.blinds_to_betting);
        self.send_table_snapshot(t);

        if self.variant == GameVariant::Cash {
            self.prompt_next_straddler(t);
            self.asked_insurance = [false, false];
        }
    }

    fn state_betting_end(&mut self, t: &mut Table) {
        for seat in t.seats.iter().filter(|s| s.occupied) {
            if let Some(p) = seat.player_id.and_then(|cid| self.players.get_mut(&cid)) {
                p.timeout_secs = self.config.timeout_secs;
            }
        }
        t.set_state(TableState::Betting);
        self.send_table_snapshot(t);
    }

    #[allow(clippy::too_many_lines)]
    fn state_betting(&mut self, t: &mut Table) {
        let Some(cur) = t.cur_player else {
            return;
        };
        let Some(cid) = Self::seat_player_id(t, cur) else {
            return;
        };
        let minimum_bet = self.determine_minimum_bet(t);

        let (stake, sitout, scheduled, timeout_secs) = {
            let Some(p) = self.players.get(&cid) else {
                return;
            };
            (p.stake, p.sitout, p.next_action, p.timeout_secs)
        };

        let mut action = PlayerAction::None;
        let mut amount: Chips = 0;
        let mut allowed = false;
        let mut auto = false;

        if t.nomoreaction || stake == 0 {
            // Early showdown, or the seat is all-in with nothing to
            // decide.
            allowed = true;
        } else if let Some(sched) = scheduled {
            action = sched.action;
            match sched.action {
                PlayerAction::Fold => allowed = true,
                PlayerAction::Check => {
                    if t.seats[cur].bet < t.bet_amount {
                        self.chat_client(cid, t.table_id, "You cannot check! Try call.");
                    } else {
                        allowed = true;
                    }
                }
                PlayerAction::Call => {
                    if t.bet_amount == 0 || t.bet_amount == t.seats[cur].bet {
                        // Nothing to call: retry as a check next tick.
                        self.rewrite_action(cid, PlayerAction::Check, sched.amount);
                        return;
                    } else if t.bet_amount > t.seats[cur].bet + stake {
                        self.rewrite_action(cid, PlayerAction::Allin, sched.amount);
                        return;
                    }
                    allowed = true;
                    amount = t.bet_amount - t.seats[cur].bet;
                }
                PlayerAction::Bet => {
                    if t.bet_amount > 0 {
                        self.chat_client(
                            cid,
                            t.table_id,
                            "You cannot bet, there was already a bet! Try raise.",
                        );
                    } else if sched.amount < minimum_bet {
                        let text =
                            format!("You cannot bet this amount. Minimum bet is {minimum_bet}.");
                        self.chat_client(cid, t.table_id, &text);
                    } else {
                        allowed = true;
                        amount = sched.amount - t.seats[cur].bet;
                    }
                }
                PlayerAction::Raise => {
                    if t.bet_amount == 0 {
                        self.rewrite_action(cid, PlayerAction::Bet, sched.amount);
                        return;
                    } else if sched.amount < minimum_bet {
                        let text =
                            format!("You cannot raise this amount. Minimum bet is {minimum_bet}.");
                        self.chat_client(cid, t.table_id, &text);
                    } else {
                        allowed = true;
                        amount = sched.amount - t.seats[cur].bet;
                    }
                }
                PlayerAction::Allin => {
                    allowed = true;
                    amount = stake;
                }
                _ => {}
            }
            if let Some(p) = self.players.get_mut(&cid) {
                p.next_action = None;
            }
        } else {
            // No action queued: check the clock.
            let elapsed = t.timeout_start.elapsed().as_secs_f64();
            if sitout || elapsed > timeout_secs as f64 {
                if let Some(p) = self.players.get_mut(&cid) {
                    if !p.sitout {
                        p.timed_out_count += 1;
                    }
                    if p.timed_out_count >= TIMEOUT_STRIKES {
                        p.sitout = true;
                        p.timed_out_count = 0;
                        if self.variant == GameVariant::Cash {
                            p.wanna_leave = true;
                            t.seats[cur].in_round = false;
                            info!(
                                "player {cid} timed out {TIMEOUT_STRIKES} times, marking as leaving"
                            );
                        } else {
                            info!(
                                "player {cid} timed out {TIMEOUT_STRIKES} times, marking as sitout"
                            );
                        }
                    }
                }
                action = if t.seats[cur].bet < t.bet_amount {
                    PlayerAction::Fold
                } else {
                    PlayerAction::Check
                };
                allowed = true;
                auto = true;
            }
        }

        if !allowed {
            return;
        }

        if let Some(p) = self.players.get_mut(&cid) {
            p.last_action = action;
        }

        match action {
            PlayerAction::None => {}
            PlayerAction::Fold => {
                t.seats[cur].in_round = false;
                let payload =
                    format!("{} {cid} {}", player_action::FOLDED, u8::from(auto));
                self.snap(t.table_id, SnapCode::PlayerAction, payload);
            }
            PlayerAction::Check => {
                let payload =
                    format!("{} {cid} {}", player_action::CHECKED, u8::from(auto));
                self.snap(t.table_id, SnapCode::PlayerAction, payload);
            }
            _ => {
                let amount = amount.min(stake);
                t.seats[cur].bet += amount;
                let stake_left = {
                    let Some(p) = self.players.get_mut(&cid) else {
                        return;
                    };
                    p.stake -= amount;
                    p.stake
                };

                let payload = if matches!(
                    action,
                    PlayerAction::Bet | PlayerAction::Raise | PlayerAction::Allin
                ) {
                    // Only a bet above the table bet re-opens the round.
                    if t.seats[cur].bet > t.bet_amount {
                        t.last_bet_player = cur;
                        t.last_bet_amount = t.bet_amount;
                        t.bet_amount = t.seats[cur].bet;
                    }
                    if action == PlayerAction::Allin || stake_left == 0 {
                        format!("{} {cid} {}", player_action::ALLIN, t.seats[cur].bet)
                    } else if action == PlayerAction::Bet {
                        format!("{} {cid} {}", player_action::BET, t.bet_amount)
                    } else {
                        format!("{} {cid} {}", player_action::RAISED, t.bet_amount)
                    }
                } else {
                    format!("{} {cid} {amount}", player_action::CALLED)
                };
                self.snap(t.table_id, SnapCode::PlayerAction, payload);
            }
        }

        // Everyone but one folded: the hand is over.
        if t.count_active() == 1 {
            self.collect_bets(t);
            t.set_state(TableState::AskShow);
            t.cur_player = t.next_active_seat(cur);
            t.restart_action_clock();
            self.send_table_snapshot(t);
            self.reset_last_actions(t);
            return;
        }

        // Street complete when action returns to the last aggressor.
        if t.next_active_seat(cur) == Some(t.last_bet_player) {
            self.collect_bets(t);

            if self.is_allin(t) {
                t.nomoreaction = true;
            }

            if t.nomoreaction
                && self.variant == GameVariant::Cash
                && self.config.enable_insurance
                && matches!(t.betround, BettingRound::Flop | BettingRound::Turn)
            {
                let round = usize::from(t.betround == BettingRound::Turn);
                if !self.asked_insurance[round] {
                    self.asked_insurance[round] = true;
                    if self.offer_insurance(t, round) {
                        t.resume_state = TableState::BettingEnd;
                        t.suspend_reason = SuspendReason::BuyInsurance;
                        t.max_suspend_ticks = INSURANCE_SUSPEND_TICKS;
                        t.schedule_state(TableState::Suspend, self.pacing.suspend_step);
                        return;
                    }
                }
            }

            match t.betround {
                BettingRound::Preflop => {
                    t.betround = BettingRound::Flop;
                    self.deal_flop(t);
                    debug!("betround flop");
                }
                BettingRound::Flop => {
                    t.betround = BettingRound::Turn;
                    self.deal_turn(t);
                    debug!("betround turn");
                    if t.nomoreaction && self.insurance_enabled() {
                        self.apply_insurance_benefits(t, 0);
                    }
                }
                BettingRound::Turn => {
                    t.betround = BettingRound::River;
                    self.deal_river(t);
                    debug!("betround river");
                    if t.nomoreaction && self.insurance_enabled() {
                        self.apply_insurance_benefits(t, 1);
                    }
                }
                BettingRound::River => {
                    // The last aggressor must table their hand.
                    t.seats[t.last_bet_player].auto_showcards = true;
                    t.cur_player = t.next_active_seat(t.last_bet_player);
                    t.restart_action_clock();
                    t.set_state(if t.nomoreaction {
                        TableState::Showdown
                    } else {
                        TableState::AskShow
                    });
                    self.send_table_snapshot(t);
                    self.reset_last_actions(t);
                    return;
                }
            }

            if t.state() == TableState::EndRound {
                // The hand died on a dead deck mid-deal.
                return;
            }

            t.cur_player = None;
            self.send_table_snapshot(t);

            t.bet_amount = 0;
            t.last_bet_amount = 0;
            t.cur_player = t.next_active_seat(t.dealer);
            t.restart_action_clock();
            t.last_bet_player = t.cur_player.unwrap_or(t.dealer);
            self.reset_last_actions(t);
            t.schedule_state(TableState::BettingEnd, self.pacing.street_end);
        } else {
            // Preflop: if the seat holding last action folds, pass it
            // on to the next live seat.
            if action == PlayerAction::Fold && cur == t.last_bet_player {
                if let Some(next) = t.next_active_seat(t.last_bet_player) {
                    t.last_bet_player = next;
                }
            }
            t.cur_player = t.next_active_seat(cur);
            t.restart_action_clock();
            if let Some(p) = t
                .cur_player
                .and_then(|s| Self::seat_player_id(t, s))
                .and_then(|cid| self.players.get_mut(&cid))
            {
                p.reset_last_action();
            }
            t.schedule_state(TableState::Betting, self.pacing.betting_step);
            self.send_table_snapshot(t);
        }
    }

    fn rewrite_action(&mut self, cid: ClientId, action: PlayerAction, amount: Chips) {
        if let Some(p) = self.players.get_mut(&cid) {
            p.next_action = Some(SchedAction { action, amount });
        }
    }

    fn state_ask_show(&mut self, t: &mut Table) {
        let Some(cur) = t.cur_player else {
            return;
        };
        let Some(cid) = Self::seat_player_id(t, cur) else {
            return;
        };
        let (stake, sitout, scheduled) = {
            let Some(p) = self.players.get(&cid) else {
                return;
            };
            (p.stake, p.sitout, p.next_action)
        };

        let mut chose_action = false;

        if stake == 0 && t.count_active() > 1 {
            // All-in players have no muck option.
            t.seats[cur].auto_showcards = true;
            chose_action = true;
            if let Some(p) = self.players.get_mut(&cid) {
                p.next_action = None;
            }
        } else if let Some(sched) = scheduled {
            match sched.action {
                PlayerAction::Muck => chose_action = true,
                PlayerAction::Show => {
                    t.seats[cur].manual_showcards = true;
                    chose_action = true;
                }
                _ => {}
            }
            if let Some(p) = self.players.get_mut(&cid) {
                p.next_action = None;
            }
        } else {
            let elapsed = t.timeout_start.elapsed();
            if sitout || elapsed > self.pacing.ask_show_timeout {
                // Default is to show while the pot is contested, so
                // chopped hands reveal themselves.
                if t.count_active() > 1 {
                    t.seats[cur].auto_showcards = true;
                }
                chose_action = true;
            }
        }

        if !chose_action {
            return;
        }

        if let Some(p) = self.players.get_mut(&cid) {
            p.last_action = if t.seats[cur].showing() {
                PlayerAction::Show
            } else {
                PlayerAction::Muck
            };
        }

        if t.count_active() == 1 {
            t.set_state(TableState::AllFolded);
            return;
        }

        // Mucking while alive concedes the hand.
        if !t.seats[cur].showing() {
            t.seats[cur].in_round = false;
        }

        if t.next_active_seat(cur) == Some(t.last_bet_player) {
            t.set_state(TableState::Showdown);
        } else {
            t.cur_player = t.next_active_seat(cur);
            t.restart_action_clock();
            self.send_table_snapshot(t);
        }
    }

    fn state_all_folded(&mut self, t: &mut Table) {
        let Some(cur) = t.cur_player else {
            return;
        };
        let Some(cid) = Self::seat_player_id(t, cur) else {
            return;
        };

        if t.seats[cur].showing() {
            self.send_player_show_snapshot(t.table_id, cid);
        }

        let amount = t.pots.first().map_or(0, |p| p.amount);
        if let Some(p) = self.players.get_mut(&cid) {
            p.stake += amount;
        }
        // The winnings show up as the seat's bet in the snapshot.
        t.seats[cur].bet = amount;
        if let Some(pot) = t.pots.first_mut() {
            pot.amount = 0;
        }

        let payload = format!("{cid} 0 {amount}");
        self.snap(t.table_id, SnapCode::WinPot, payload);

        self.send_table_snapshot(t);
        t.schedule_state(TableState::EndRound, self.pacing.all_folded);
    }

    fn create_win_list(&mut self, t: &mut Table) -> Option<Vec<Vec<HandStrength>>> {
        let mut strengths = Vec::new();
        let mut seat = t.last_bet_player;
        for _ in 0..t.count_active() {
            let Some(cid) = Self::seat_player_id(t, seat) else {
                return None;
            };
            let Some(p) = self.players.get(&cid) else {
                return None;
            };
            match self.evaluator.evaluate(&p.holecards, t.community.cards()) {
                Ok(value) => strengths.push(HandStrength { seat, value }),
                Err(e) => {
                    error!("evaluator failed for player {cid}: {e}");
                    self.abort_hand(t);
                    return None;
                }
            }
            seat = t.next_active_seat(seat).unwrap_or(seat);
        }
        Some(win_list(strengths))
    }

    fn state_showdown(&mut self, t: &mut Table) {
        // Reveal hands, starting at the last aggressor.
        let mut seat = t.last_bet_player;
        for _ in 0..t.count_active() {
            if t.seats[seat].showing() || t.nomoreaction {
                if let Some(cid) = Self::seat_player_id(t, seat) {
                    self.send_player_show_snapshot(t.table_id, cid);
                }
            }
            seat = t.next_active_seat(seat).unwrap_or(seat);
        }

        let Some(winlist) = self.create_win_list(t) else {
            return;
        };

        for tier in &winlist {
            let tier_seats: Vec<SeatIndex> = tier.iter().map(|h| h.seat).collect();
            for pot_idx in 0..t.pots.len() {
                let (pot_amount, involved_count) = {
                    let pot = &t.pots[pot_idx];
                    (pot.amount, pot.involved_count_of(&tier_seats))
                };
                if involved_count == 0 || pot_amount == 0 {
                    continue;
                }
                let win_amount = pot_amount / involved_count as Chips;
                let odd_chips = pot_amount - win_amount * involved_count as Chips;
                let mut cashout: Chips = 0;

                for &winner_seat in &tier_seats {
                    if !t.pots[pot_idx].involves(winner_seat) {
                        continue;
                    }
                    if win_amount > 0 {
                        if let Some(cid) = Self::seat_player_id(t, winner_seat) {
                            if let Some(p) = self.players.get_mut(&cid) {
                                p.stake += win_amount;
                            }
                            t.seats[winner_seat].bet += win_amount;
                            cashout += win_amount;
                            let payload = format!("{cid} {pot_idx} {win_amount}");
                            self.snap(t.table_id, SnapCode::WinPot, payload);
                        }
                    }
                }

                if odd_chips > 0 {
                    // First eligible seat clockwise from the button.
                    let odd_seat = (1..=MAX_SEATS)
                        .map(|i| (t.dealer + i) % MAX_SEATS)
                        .find(|s| {
                            t.seats[*s].occupied
                                && t.seats[*s].in_round
                                && t.pots[pot_idx].involves(*s)
                        });
                    if let Some(odd_seat) = odd_seat {
                        if let Some(cid) = Self::seat_player_id(t, odd_seat) {
                            if let Some(p) = self.players.get_mut(&cid) {
                                p.stake += odd_chips;
                            }
                            t.seats[odd_seat].bet += odd_chips;
                            cashout += odd_chips;
                            let payload = format!("{cid} {pot_idx} {odd_chips}");
                            self.snap(t.table_id, SnapCode::OddChips, payload);
                        }
                    }
                }

                t.pots[pot_idx].amount -= cashout;
            }
        }

        for (i, pot) in t.pots.iter().enumerate() {
            if pot.amount > 0 {
                error!(
                    "game {} table {}: remaining chips in pot {}: {}",
                    self.game_id, t.table_id, i, pot.amount
                );
            }
        }

        if self.insurance_enabled() {
            self.settle_insurance_debts(t);
        }

        t.pots.clear();
        self.send_table_snapshot(t);
        t.schedule_state(TableState::EndRound, self.pacing.showdown);
    }

    fn state_end_round(&mut self, t: &mut Table) {
        // (stake before hand, seat) so busts report in order of the
        // stack they started the hand with.
        let mut broken: Vec<(Chips, SeatIndex)> = Vec::new();
        let mut stake_repr = String::new();

        let need_stake = match self.variant {
            GameVariant::Cash => self.config.ante,
            GameVariant::Sng => 0,
        };

        for seat_no in 0..MAX_SEATS {
            let seat = &t.seats[seat_no];
            let counted = match self.variant {
                GameVariant::Cash => seat.occupied && seat.in_round,
                GameVariant::Sng => seat.occupied,
            };
            if !counted {
                continue;
            }
            let Some(p) = seat.player_id.and_then(|cid| self.players.get(&cid)) else {
                continue;
            };
            let delta = i64::from(p.stake) - i64::from(p.stake_before);
            stake_repr.push_str(&format!("{}:{}:{} ", p.client_id, p.stake, delta));

            if p.stake == 0 || p.stake < need_stake {
                broken.push((p.stake_before, seat_no));
            } else if delta > 0 {
                let payload = format!("{} -1 {delta}", p.client_id);
                self.snap(t.table_id, SnapCode::WinAmount, payload);
            }
        }

        self.snap(
            t.table_id,
            SnapCode::StakeChange,
            stake_repr.trim_end().to_string(),
        );
        self.send_table_snapshot(t);

        // Shortest starting stack busts first and finishes last.
        broken.sort_unstable();
        for (_, seat_no) in broken {
            let Some(cid) = Self::seat_player_id(t, seat_no) else {
                continue;
            };
            self.finish_list.push(cid);
            let place = self.players.len() as i64 - self.finish_list.len() as i64 + 1;
            let payload = format!("{} {cid} {place}", game_state::BROKE);
            self.snap(t.table_id, SnapCode::GameState, payload);
            t.seats[seat_no].occupied = false;
        }

        if let Some(next_dealer) = t.next_seat(t.dealer) {
            t.dealer = next_dealer;
        }
        let delay = self
            .pacing
            .end_round
            .unwrap_or_else(|| Duration::from_secs(self.variant.end_round_delay()));
        t.schedule_state(TableState::NewRound, delay);
    }

    fn state_suspend(&mut self, t: &mut Table) {
        if t.suspend_ticks == 0 {
            let payload = format!(
                "{} {} {}",
                game_state::TABLE_SUSPEND,
                t.suspend_reason.wire_code(),
                t.max_suspend_ticks - t.suspend_ticks,
            );
            self.snap(t.table_id, SnapCode::GameState, payload);
        }
        if t.suspend_ticks >= t.max_suspend_ticks {
            t.schedule_state(TableState::Resume, Duration::ZERO);
            return;
        }
        t.suspend_ticks += 1;
        t.schedule_state(TableState::Suspend, self.pacing.suspend_step);
    }

    fn state_resume(&mut self, t: &mut Table) {
        if t.suspend_reason == SuspendReason::BuyInsurance && t.betround == BettingRound::Turn {
            self.auto_buy_turn_insurance(t);
        }
        self.snap(
            t.table_id,
            SnapCode::GameState,
            game_state::TABLE_RESUME.to_string(),
        );
        t.suspend_ticks = 0;
        t.max_suspend_ticks = 0;
        t.suspend_reason = SuspendReason::None;
        let resume_state = t.resume_state;
        t.schedule_state(resume_state, Duration::ZERO);
    }

    // --- blinds, antes, straddles, rebuys ------------------------------

    fn advance_blind_level(&mut self, t: &mut Table) {
        if self.blinds.rule == BlindRule::ByTime
            && self.blinds.last_advance.elapsed() > self.blinds.interval
            && self.blinds.level + 1 < self.blinds.levels.len()
        {
            self.blinds.level += 1;
            self.blinds.amount = self.blinds.levels[self.blinds.level].big_blind;
            self.blinds.last_advance = Instant::now();
            self.blinds.last_advance_unix = chrono::Utc::now().timestamp();
        }

        let (next_level, next_amount) = self.blinds.next_level_info();
        let payload = format!(
            "{} {} {} {} {} {} {}",
            game_state::BLINDS,
            self.blinds.amount / 2,
            self.blinds.amount,
            self.blinds.level + 1,
            next_level,
            next_amount,
            self.blinds.last_advance_unix,
        );
        self.snap(t.table_id, SnapCode::GameState, payload);
    }

    /// Flat per-hand tax, collected into the pot immediately.
    fn handle_ante(&mut self, t: &mut Table) {
        if self.config.ante == 0 {
            return;
        }
        debug!("collecting ante {}", self.config.ante);
        for seat_no in 0..MAX_SEATS {
            if !(t.seats[seat_no].occupied && t.seats[seat_no].in_round) {
                continue;
            }
            if let Some(p) =
                Self::seat_player_id(t, seat_no).and_then(|cid| self.players.get_mut(&cid))
            {
                let amount = self.config.ante.min(p.stake);
                t.seats[seat_no].bet += amount;
                p.stake -= amount;
            }
        }
        self.collect_bets(t);
    }

    /// Post the straddle chain: 2xBB, then 4xBB, doubling up to the
    /// declared last straddler or until a stack cannot cover it.
    fn handle_straddle(&mut self, t: &mut Table) {
        t.straddle_amount = 0;
        if let Some(declared_last) = t.last_straddle {
            let mut amount = self.blinds.amount;
            let mut seat = t.bb;
            loop {
                amount *= 2;
                let Some(next) = t.next_active_seat(seat) else {
                    break;
                };
                seat = next;
                let Some(cid) = Self::seat_player_id(t, seat) else {
                    break;
                };
                let Some(p) = self.players.get_mut(&cid) else {
                    break;
                };
                if p.stake < amount {
                    t.last_straddle = t.prev_active_seat(seat);
                    break;
                }
                t.seats[seat].bet += amount;
                p.stake -= amount;
                t.straddle_amount = amount;
                if seat == declared_last {
                    break;
                }
            }
            if let Some(last) = t.last_straddle {
                t.cur_player = t.next_active_seat(last);
                t.last_bet_player = t.cur_player.unwrap_or(last);
            }
        }

        // Arm the next hand.
        if self.config.mandatory_straddle {
            let next_bb = t.next_active_seat(t.bb);
            t.last_straddle = next_bb.and_then(|s| t.next_active_seat(s));
            t.straddle_rate = 2;
        } else {
            t.last_straddle = None;
            t.straddle_rate = 1;
        }
    }

    fn straddle_min_players(&self) -> usize {
        if self.config.mandatory_straddle { 5 } else { 4 }
    }

    /// Seat eligible to extend the straddle chain for the next hand.
    fn next_straddler_seat(&self, t: &Table) -> Option<SeatIndex> {
        match t.last_straddle {
            None => {
                let mut pos = t.next_active_seat(t.bb)?;
                pos = t.next_active_seat(pos)?;
                if self.config.mandatory_straddle {
                    pos = t.next_active_seat(pos)?;
                }
                Some(pos)
            }
            Some(last) => {
                if last == t.dealer {
                    return None;
                }
                t.next_active_seat(last)
            }
        }
    }

    fn prompt_next_straddler(&mut self, t: &Table) {
        if t.count_active() < self.straddle_min_players() {
            return;
        }
        let Some(pos) = self.next_straddler_seat(t) else {
            return;
        };
        if let Some(cid) = Self::seat_player_id(t, pos) {
            debug!("straddle prompt to cid={cid}");
            self.snap_client(
                cid,
                t.table_id,
                SnapCode::WantToStraddleNextRound,
                t.straddle_rate.to_string(),
            );
        }
    }

    /// A player declares intent to straddle the next hand.
    pub fn next_round_straddle(&mut self, cid: ClientId) -> Result<(), GameError> {
        if !self.is_player(cid) {
            return Err(GameError::NotAPlayer);
        }
        let Some(&tid) = self.tables.keys().next() else {
            return Err(GameError::StraddleRefused);
        };
        let Some(mut t) = self.tables.remove(&tid) else {
            return Err(GameError::StraddleRefused);
        };
        let result = self.next_round_straddle_at(&mut t, cid);
        self.tables.insert(tid, t);
        result
    }

    fn next_round_straddle_at(&mut self, t: &mut Table, cid: ClientId) -> Result<(), GameError> {
        let state = t.state().wire_code();
        if state <= TableState::Blinds.wire_code() || state >= TableState::EndRound.wire_code() {
            debug!("straddle declared outside a hand");
            return Err(GameError::StraddleRefused);
        }
        if t.count_active() < self.straddle_min_players() {
            debug!("straddle needs {}+ players", self.straddle_min_players());
            return Err(GameError::StraddleRefused);
        }

        let Some(expected) = self.next_straddler_seat(t) else {
            debug!("straddle chain already covers the table");
            return Err(GameError::StraddleRefused);
        };
        if Self::seat_player_id(t, expected) != Some(cid) {
            debug!("straddle declared from the wrong position");
            return Err(GameError::StraddleRefused);
        }
        if t.last_straddle.is_none() {
            t.straddle_rate *= 2;
        }
        t.last_straddle = Some(expected);

        if t.last_straddle != Some(t.dealer) {
            if let Some(next) = t.next_active_seat(expected) {
                if let Some(next_cid) = Self::seat_player_id(t, next) {
                    self.snap_client(
                        next_cid,
                        t.table_id,
                        SnapCode::WantToStraddleNextRound,
                        t.straddle_rate.to_string(),
                    );
                }
            }
        }
        Ok(())
    }

    /// Fold pending rebuys into stacks and re-admit funded seats.
    fn handle_rebuy(&mut self, t: &mut Table) {
        let need = match self.variant {
            GameVariant::Cash => self.blinds.amount + self.config.ante,
            GameVariant::Sng => self.blinds.amount,
        };
        for p in self.players.values_mut() {
            p.stake += p.rebuy_stake;
            p.rebuy_stake = 0;
            if p.seat_no < 0 {
                continue;
            }
            let seat_no = p.seat_no as usize;
            // Never displace a seat that has since gone to someone
            // else.
            if t.seats[seat_no].occupied && t.seats[seat_no].player_id != Some(p.client_id) {
                continue;
            }
            match self.variant {
                GameVariant::Cash => {
                    if p.stake >= need && !p.wanna_leave {
                        t.seats[seat_no].occupied = true;
                        t.seats[seat_no].player_id = Some(p.client_id);
                        t.seats[seat_no].in_round = true;
                    }
                }
                GameVariant::Sng => {
                    if !t.seats[seat_no].occupied && p.stake >= need {
                        t.seats[seat_no].occupied = true;
                        t.seats[seat_no].player_id = Some(p.client_id);
                    }
                }
            }
        }
    }

    /// Clear the seats of players who asked to leave; runs at hand
    /// start only.
    fn handle_wanna_leave(&mut self, t: &mut Table) {
        let mut someone_left = false;
        let leaving: Vec<(ClientId, i32)> = self
            .players
            .values()
            .filter(|p| p.wanna_leave)
            .map(|p| (p.client_id, p.seat_no))
            .collect();
        for (cid, seat_no) in leaving {
            if seat_no < 0 {
                continue;
            }
            let seat_no = seat_no as usize;
            if t.seats[seat_no].occupied && t.seats[seat_no].player_id == Some(cid) {
                info!("clearing seat of leaving player {cid}");
                t.clear_seat(seat_no);
                someone_left = true;
            }
        }

        if t.count_occupied() <= 3 {
            t.last_straddle = None;
            return;
        }

        if someone_left {
            if self.config.mandatory_straddle {
                let bb = t.next_seat(t.dealer);
                let sb = bb.and_then(|s| t.next_seat(s));
                t.last_straddle = sb.and_then(|s| t.next_seat(s));
            } else {
                t.last_straddle = None;
            }
        }
    }

    // --- insurance -----------------------------------------------------

    fn insurance_enabled(&self) -> bool {
        self.variant == GameVariant::Cash && self.config.enable_insurance
    }

    /// Compute offers for every pot leader and publish them. Returns
    /// whether anyone has something to buy.
    fn offer_insurance(&mut self, t: &mut Table, round: usize) -> bool {
        let board = t.community.cards().to_vec();
        let remaining = t.deck.remaining().to_vec();

        for pot_idx in 0..t.pots.len() {
            let involved = t.pots[pot_idx].involved.clone();
            if involved.len() < 2 {
                continue;
            }

            let mut strengths = Vec::new();
            for &seat in &involved {
                let Some(p) = Self::seat_player_id(t, seat).and_then(|cid| self.players.get(&cid))
                else {
                    continue;
                };
                match self.evaluator.evaluate(&p.holecards, &board) {
                    Ok(value) => strengths.push(HandStrength { seat, value }),
                    Err(e) => {
                        error!("evaluator failed during insurance offer: {e}");
                        return false;
                    }
                }
            }
            let tiers = win_list(strengths);
            if tiers.len() < 2 {
                // No winner yet, nothing to insure for this pot.
                continue;
            }

            let leaders: Vec<SeatIndex> = tiers[0].iter().map(|h| h.seat).collect();
            let pot_share = t.pots[pot_idx].amount / leaders.len() as Chips;

            for &leader in &leaders {
                let hands: Vec<(SeatIndex, &crate::game::entities::HoleCards)> = involved
                    .iter()
                    .filter_map(|seat| {
                        Self::seat_player_id(t, *seat)
                            .and_then(|cid| self.players.get(&cid))
                            .map(|p| (*seat, &p.holecards))
                    })
                    .collect();
                let report = match insurance::compute_outs(
                    self.evaluator.as_ref(),
                    leader,
                    &hands,
                    &board,
                    &remaining,
                ) {
                    Ok(report) => report,
                    Err(e) => {
                        error!("outs computation failed: {e}");
                        return false;
                    }
                };

                let Some(leader_cid) = Self::seat_player_id(t, leader) else {
                    continue;
                };
                let flop_buy = self
                    .players
                    .get(&leader_cid)
                    .map_or(0, |p| p.insurance[0].buy_amount);
                let Some(p) = self.players.get_mut(&leader_cid) else {
                    continue;
                };
                let slot = &mut p.insurance[round];
                for card in &report.outs {
                    if !slot.outs.contains(card) {
                        slot.outs.push(*card);
                    }
                }
                slot.outs.sort_unstable_by(|a, b| b.cmp(a));
                for card in &report.outs_divided {
                    if !slot.outs_divided.contains(card) {
                        slot.outs_divided.push(*card);
                    }
                }
                for (opp, cards) in report.per_opponent {
                    slot.per_opponent_outs.entry(opp).or_default().extend(cards);
                }

                let outs_count = slot.outs.len();
                if outs_count == 0 {
                    continue;
                }
                if round == 0 {
                    if outs_count <= INSURANCE_MAX_OUTS {
                        slot.max_payment += insurance::flop_pot_cap(pot_share, outs_count);
                    }
                } else {
                    slot.max_payment += pot_share.saturating_sub(flop_buy);
                }
                debug!(
                    "insurance offer: round={round} pot={pot_idx} leader seat {leader} \
                     outs={outs_count} max_payment={}",
                    slot.max_payment
                );
            }
        }

        // A flop-round board that is too live disqualifies the leader.
        if round == 0 {
            for p in self.players.values_mut() {
                let slot = &mut p.insurance[round];
                if slot.outs.len() > INSURANCE_MAX_OUTS {
                    slot.outs.clear();
                    slot.outs_divided.clear();
                    slot.per_opponent_outs.clear();
                    slot.max_payment = 0;
                }
            }
        }

        // Publish the offers clockwise from the button.
        let mut published = false;
        let mut seat = t.dealer;
        for _ in 0..t.count_active() {
            let Some(next) = t.next_active_seat(seat) else {
                break;
            };
            seat = next;
            let Some(cid) = Self::seat_player_id(t, seat) else {
                continue;
            };

            let payload = {
                let Some(p) = self.players.get(&cid) else {
                    continue;
                };
                let slot = &p.insurance[round];
                if slot.outs.is_empty() {
                    continue;
                }

                let outs_repr = slot
                    .outs
                    .iter()
                    .map(Card::to_string)
                    .collect::<Vec<_>>()
                    .join(":");
                let divided_repr = if slot.outs_divided.is_empty() {
                    "0".to_string()
                } else {
                    slot.outs_divided
                        .iter()
                        .map(Card::to_string)
                        .collect::<Vec<_>>()
                        .join(":")
                };
                let per_opponent_repr = slot
                    .per_opponent_outs
                    .iter()
                    .filter_map(|(opp_seat, opp_outs)| {
                        let opp = Self::seat_player_id(t, *opp_seat)
                            .and_then(|opp_cid| self.players.get(&opp_cid))?;
                        let cs = opp.holecards.cards();
                        if cs.len() == 2 {
                            Some(format!(
                                "{}:{}:{}:{}",
                                opp_seat,
                                opp_outs.len(),
                                cs[0],
                                cs[1]
                            ))
                        } else {
                            None
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("-");

                format!(
                    "{} {} {} {}",
                    slot.max_payment, outs_repr, divided_repr, per_opponent_repr
                )
            };
            info!("insurance offer to cid={cid}: {payload}");
            self.snap_client(cid, t.table_id, SnapCode::BuyInsurance, payload);
            published = true;
        }
        published
    }

    /// `BUYINSURANCE` command: validate and book a purchase during the
    /// suspend window.
    pub fn buy_insurance(
        &mut self,
        cid: ClientId,
        buy_amount: Chips,
        cards: &[Card],
    ) -> Result<(), GameError> {
        if !self.insurance_enabled() {
            return Err(GameError::InsuranceRefused);
        }
        if !self.is_player(cid) {
            return Err(GameError::NotAPlayer);
        }
        let Some(&tid) = self.tables.keys().next() else {
            return Err(GameError::InsuranceRefused);
        };
        let Some(mut t) = self.tables.remove(&tid) else {
            return Err(GameError::InsuranceRefused);
        };
        let result = self.buy_insurance_at(&mut t, cid, buy_amount, cards);
        self.tables.insert(tid, t);
        result
    }

    fn buy_insurance_at(
        &mut self,
        t: &mut Table,
        cid: ClientId,
        buy_amount: Chips,
        cards: &[Card],
    ) -> Result<(), GameError> {
        if t.state() != TableState::Suspend || t.suspend_reason != SuspendReason::BuyInsurance {
            debug!("insurance purchase outside the buy window");
            return Err(GameError::InsuranceRefused);
        }
        let round = match t.betround {
            BettingRound::Flop => 0,
            BettingRound::Turn => 1,
            _ => {
                debug!("insurance purchase on a non-insurable street");
                return Err(GameError::InsuranceRefused);
            }
        };

        {
            let Some(p) = self.players.get_mut(&cid) else {
                return Err(GameError::NotAPlayer);
            };
            let slot = &mut p.insurance[round];
            if slot.bought {
                debug!("insurance already bought this round");
                return Err(GameError::InsuranceRefused);
            }

            if cards.is_empty() || buy_amount == 0 {
                // Declining clears the offer.
                slot.outs.clear();
                slot.outs_divided.clear();
                slot.per_opponent_outs.clear();
            } else {
                if cards.iter().any(|c| !slot.outs.contains(c)) {
                    debug!("insurance purchase includes a card outside the outs");
                    return Err(GameError::InsuranceRefused);
                }
                let max_buy = insurance::max_buy(slot.max_payment, cards.len());
                if buy_amount > max_buy {
                    debug!("insurance purchase above the cap: {buy_amount} > {max_buy}");
                    return Err(GameError::InsuranceRefused);
                }
                slot.bought = true;
                slot.buy_amount = buy_amount;
                slot.buy_cards = cards.to_vec();
                info!("insurance bought: cid={cid} round={round} amount={buy_amount}");
            }
        }

        // Resume as soon as every offered leader has answered.
        let mut all_answered = true;
        let mut seat = t.dealer;
        for _ in 0..t.count_active() {
            let Some(next) = t.next_active_seat(seat) else {
                break;
            };
            seat = next;
            if let Some(p) = Self::seat_player_id(t, seat).and_then(|c| self.players.get(&c)) {
                let slot = &p.insurance[round];
                if slot.has_offer() && !slot.bought {
                    all_answered = false;
                    break;
                }
            }
        }
        if all_answered {
            t.schedule_state(TableState::Resume, Duration::ZERO);
        }
        Ok(())
    }

    /// Forced turn-round repurchase: a flop buyer who still has outs
    /// and did not answer again is covered on the full outs list.
    fn auto_buy_turn_insurance(&mut self, t: &Table) {
        let mut seat = t.dealer;
        for _ in 0..t.count_active() {
            let Some(next) = t.next_active_seat(seat) else {
                break;
            };
            seat = next;
            let Some(p) = Self::seat_player_id(t, seat).and_then(|c| self.players.get_mut(&c))
            else {
                continue;
            };
            if p.insurance[0].bought && !p.insurance[1].bought && p.insurance[1].has_offer() {
                let outs = p.insurance[1].outs.clone();
                let flop_buy = p.insurance[0].buy_amount;
                let slot = &mut p.insurance[1];
                slot.bought = true;
                slot.buy_cards = outs.clone();
                slot.buy_amount = insurance::auto_buy_amount(flop_buy, outs.len());
                info!(
                    "auto-bought turn insurance for player {}: amount={}",
                    p.client_id, slot.buy_amount
                );
            }
        }
    }

    /// The insured street's card landed: pay winners now, remember
    /// debts for showdown.
    fn apply_insurance_benefits(&mut self, t: &mut Table, round: usize) {
        let card_index = if round == 0 { 3 } else { 4 };
        let Some(&landed) = t.community.cards().get(card_index) else {
            return;
        };
        debug!("settling insurance round {round} on {landed}");

        let mut seat = t.dealer;
        for _ in 0..t.count_active() {
            let Some(next) = t.next_active_seat(seat) else {
                break;
            };
            seat = next;
            let Some(cid) = Self::seat_player_id(t, seat) else {
                continue;
            };
            let settlement = {
                let Some(p) = self.players.get_mut(&cid) else {
                    continue;
                };
                if !p.insurance[round].bought {
                    continue;
                }
                let settlement = insurance::settle(&p.insurance[round], landed);
                p.insurance[round].owed = settlement.owed;
                if settlement.credit > 0 {
                    p.stake += settlement.credit;
                }
                settlement
            };
            if settlement.credit > 0 {
                self.insurance_credited = true;
                info!("insurance payout: cid={cid} amount={}", settlement.credit);
                self.snap_client(
                    cid,
                    t.table_id,
                    SnapCode::InsuranceBenefits,
                    settlement.credit.to_string(),
                );
            }
        }
    }

    /// Deduct accumulated premiums at showdown.
    fn settle_insurance_debts(&mut self, t: &Table) {
        let mut seat = t.dealer;
        for _ in 0..t.count_active() {
            let Some(next) = t.next_active_seat(seat) else {
                break;
            };
            seat = next;
            let Some(cid) = Self::seat_player_id(t, seat) else {
                continue;
            };
            let owed = {
                let Some(p) = self.players.get_mut(&cid) else {
                    continue;
                };
                let owed: Chips = p
                    .insurance
                    .iter()
                    .filter(|slot| slot.bought)
                    .map(|slot| slot.owed)
                    .sum();
                if owed > 0 {
                    if owed > p.stake {
                        warn!("insurance debt {owed} exceeds stack of player {cid}");
                    }
                    p.stake = p.stake.saturating_sub(owed);
                }
                owed
            };
            if owed > 0 {
                info!("insurance premium collected: cid={cid} amount={owed}");
                self.snap_client(
                    cid,
                    t.table_id,
                    SnapCode::InsuranceBenefits,
                    format!("-{owed}"),
                );
            }
        }
    }
}

/// Shuffle helper so placement stays deterministic under a seeded RNG.
trait ShuffleWith {
    fn shuffle_with(&mut self, rng: &mut StdRng);
}

impl<T> ShuffleWith for Vec<T> {
    fn shuffle_with(&mut self, rng: &mut StdRng) {
        use rand::seq::SliceRandom;
        self.as_mut_slice().shuffle(rng);
    }
}
