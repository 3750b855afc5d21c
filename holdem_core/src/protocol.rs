//! Wire-protocol constants shared by the engine and the session layer.
//!
//! Every snapshot, sub-code and flag below is rendered as a bare
//! number on the wire; the values are part of the protocol and must
//! not be reordered.

/// Protocol version announced in `PSERVER`.
pub const SERVER_VERSION: u32 = 902;

/// Oldest client version still accepted at `PCLIENT`.
pub const VERSION_COMPAT: u32 = 900;

/// Top-level snapshot codes (`SNAP gid:tid <code> <payload>`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SnapCode {
    Table,
    Cards,
    PlayerAction,
    PlayerShow,
    WinPot,
    OddChips,
    WinAmount,
    StakeChange,
    GameState,
    BuyInsurance,
    InsuranceBenefits,
    Respite,
    Foyer,
    WantToStraddleNextRound,
}

impl SnapCode {
    #[must_use]
    pub fn wire_code(self) -> u8 {
        match self {
            SnapCode::Table => 1,
            SnapCode::Cards => 2,
            SnapCode::PlayerAction => 3,
            SnapCode::PlayerShow => 4,
            SnapCode::WinPot => 5,
            SnapCode::OddChips => 6,
            SnapCode::WinAmount => 7,
            SnapCode::StakeChange => 8,
            SnapCode::GameState => 9,
            SnapCode::BuyInsurance => 10,
            SnapCode::InsuranceBenefits => 11,
            SnapCode::Respite => 12,
            SnapCode::Foyer => 13,
            SnapCode::WantToStraddleNextRound => 14,
        }
    }
}

/// Sub-codes of `SnapCode::Cards`.
pub mod cards {
    pub const HOLE: u8 = 0;
    pub const FLOP: u8 = 1;
    pub const TURN: u8 = 2;
    pub const RIVER: u8 = 3;
}

/// Sub-codes of `SnapCode::PlayerAction`.
pub mod player_action {
    pub const FOLDED: u8 = 1;
    pub const CHECKED: u8 = 2;
    pub const CALLED: u8 = 3;
    pub const BET: u8 = 4;
    pub const RAISED: u8 = 5;
    pub const ALLIN: u8 = 6;
}

/// Sub-codes of `SnapCode::GameState`.
pub mod game_state {
    pub const NEW_HAND: u8 = 1;
    pub const BROKE: u8 = 2;
    pub const START: u8 = 3;
    pub const END: u8 = 4;
    pub const PAUSE: u8 = 5;
    pub const RESUME: u8 = 6;
    pub const BLINDS: u8 = 7;
    pub const TABLE_SUSPEND: u8 = 8;
    pub const TABLE_RESUME: u8 = 9;
}

/// Sub-codes of `SnapCode::Foyer`.
pub mod foyer {
    pub const JOIN: u8 = 1;
    pub const LEAVE: u8 = 2;
}

/// Error codes carried on `ERR` responses.
pub mod err {
    pub const OK: u8 = 0;
    pub const WRONG_VERSION: u8 = 1;
    pub const PROTOCOL: u8 = 2;
    pub const PARAMETERS: u8 = 3;
    pub const NO_PERMISSION: u8 = 4;
    pub const NOT_IMPLEMENTED: u8 = 5;
}

/// `GAMEINFO` encoding.
pub mod game_info {
    /// Game family; only hold'em exists.
    pub const TYPE_HOLDEM: u8 = 1;

    // Game modes.
    pub const MODE_RING: u8 = 1;
    pub const MODE_FREEZEOUT: u8 = 2;
    pub const MODE_SNG: u8 = 3;

    // Game states.
    pub const STATE_WAITING: u8 = 1;
    pub const STATE_STARTED: u8 = 2;
    pub const STATE_ENDED: u8 = 3;
    pub const STATE_PAUSED: u8 = 4;

    // Per-client flag bits.
    pub const FLAG_REGISTERED: u8 = 0x01;
    pub const FLAG_SUBSCRIBED: u8 = 0x02;
    pub const FLAG_PASSWORD: u8 = 0x04;
    pub const FLAG_OWNER: u8 = 0x08;
    pub const FLAG_RESTART: u8 = 0x10;
}

/// Per-seat state bits inside the table snapshot.
pub mod seat_state {
    pub const IN_ROUND: u8 = 0x01;
    pub const SITOUT: u8 = 0x02;
}

/// Key codes of the `SERVERINFO` reply.
pub mod server_stats {
    pub const SERVER_STARTED: u8 = 1;
    pub const CLIENTS_CONNECTED: u8 = 2;
    pub const CLIENTS_INTRODUCED: u8 = 3;
    pub const CLIENTS_INCOMPATIBLE: u8 = 4;
    pub const GAMES_CREATED: u8 = 5;
    pub const CLIENT_COUNT: u8 = 6;
    pub const GAMES_COUNT: u8 = 7;
    pub const CONARCHIVE_COUNT: u8 = 8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snap_codes_are_stable() {
        assert_eq!(SnapCode::Table.wire_code(), 1);
        assert_eq!(SnapCode::GameState.wire_code(), 9);
        assert_eq!(SnapCode::WantToStraddleNextRound.wire_code(), 14);
    }

    #[test]
    fn version_floor_is_not_above_current() {
        assert!(VERSION_COMPAT <= SERVER_VERSION);
    }
}
