//! The poker engine: cards and decks, the per-table state machine,
//! side-pot construction, winner resolution, the insurance market and
//! the game controller that drives it all off the server tick.

pub mod constants;
pub mod controller;
pub mod entities;
pub mod eval;
pub mod insurance;
pub mod pot;
pub mod table;

pub use controller::{
    GameConfig, GameController, GameError, GameStatus, GameVariant, OutKind, Outgoing, Pacing,
    Recipient, TickOutcome,
};
pub use entities::{Card, Chips, ClientId, GameId, Player, PlayerAction, SeatIndex, TableId};
pub use table::{BettingRound, Table, TableState};
