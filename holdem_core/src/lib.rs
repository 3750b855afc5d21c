//! # Holdem Core
//!
//! A multi-table Texas Hold'em poker server engine with a line-based
//! client protocol.
//!
//! The core is single-threaded and tick-driven: a `mio` poll loop
//! reads client commands, dispatches them into per-game controllers,
//! and advances every table's state machine one transition per tick.
//! Tables schedule their own successor states with delays; timeouts
//! run against the wall clock, so the tick cadence affects latency but
//! never correctness.
//!
//! ## Modules
//!
//! - [`game`]: cards, tables, pots, the hand state machine, the
//!   insurance mini-market, and the cash/elimination game controllers
//! - [`net`]: line codec, command grammar, sessions, the server loop
//! - [`protocol`]: wire constants shared by both
//! - [`config`]: the string-keyed server configuration map
//!
//! ## Example
//!
//! ```no_run
//! use holdem_core::config::ServerConfig;
//! use holdem_core::net::server::Server;
//!
//! let addr = "127.0.0.1:40888".parse().unwrap();
//! let mut server = Server::bind(addr, ServerConfig::default()).unwrap();
//! server.run().unwrap();
//! ```

pub mod config;
pub mod game;
pub mod net;
pub mod protocol;

pub use config::ServerConfig;
pub use game::{
    Card, Chips, ClientId, GameConfig, GameController, GameId, GameVariant, Pacing, PlayerAction,
};
pub use net::{client::Client, server::Server};
