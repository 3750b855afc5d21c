//! Engine-wide constants.

use super::entities::Chips;

/// Seats per table. The seat placement map and every snapshot assume
/// this exact count.
pub const MAX_SEATS: usize = 10;

/// Smallest table that can deal a hand.
pub const MIN_PLAYERS: usize = 2;

/// Default starting stake handed to a registering player.
pub const DEFAULT_PLAYER_STAKES: Chips = 1500;

/// Default per-action timeout budget in seconds.
pub const DEFAULT_PLAYER_TIMEOUT_SECS: u64 = 30;

/// Consecutive timeouts before a player is forced to sit out.
pub const TIMEOUT_STRIKES: u32 = 3;

/// Default big blind for a freshly created game.
pub const DEFAULT_BLINDS_START: Chips = 10;

/// Default blind escalation factor (percent) and interval (seconds).
pub const DEFAULT_BLINDS_FACTOR: u32 = 20;
pub const DEFAULT_BLINDS_TIME_SECS: u64 = 60 * 4;

/// Default wall-clock lifetime of a cash game in seconds.
pub const DEFAULT_EXPIRE_IN_SECS: u64 = 30 * 60;

/// Ticks (one second each) a table stays suspended for the insurance
/// window before it resumes on its own.
pub const INSURANCE_SUSPEND_TICKS: u32 = 20;

/// More outs than this on the flop round disqualifies a leader from
/// buying insurance.
pub const INSURANCE_MAX_OUTS: usize = 20;
