//! Networking layer: line codec, command grammar, session state and
//! the tick-driven TCP server.

/// Blocking line client, used mainly by tests.
pub mod client;

/// Line framing and tokenizing.
pub mod codec;

/// Client command grammar.
pub mod messages;

/// The mio-driven server loop and command dispatch.
pub mod server;

/// Per-connection session state and the reconnect archive.
pub mod session;
