//! Per-connection session state and the reconnect archive.

use std::collections::HashMap;

use log::debug;

use crate::game::entities::ClientId;

/// What a client told us about itself via `INFO`.
#[derive(Clone, Debug, Default)]
pub struct ClientInfo {
    pub name: String,
    pub location: String,
}

/// Outcome of the chat flood check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FloodVerdict {
    Ok,
    /// A mute is still running.
    StillMuted,
    /// This message tripped the limit; the mute starts now.
    NowMuted,
}

/// One client connection's protocol state. A session dies with its
/// socket; identity survives in the [`ConnectionArchive`].
#[derive(Clone, Debug)]
pub struct Session {
    pub id: ClientId,
    pub version: u32,
    pub uuid: String,

    pub introduced: bool,
    pub sent_info: bool,
    pub authed: bool,

    pub info: ClientInfo,

    /// Echoed back on the reply to the current command, when given.
    pub last_msgid: Option<i64>,

    /// Start of the current flood-measuring interval; pushed into the
    /// future while the client is muted.
    last_chat_unix: i64,
    chat_count: u32,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: -1,
            version: 0,
            uuid: String::new(),
            introduced: false,
            sent_info: false,
            authed: false,
            info: ClientInfo::default(),
            last_msgid: None,
            last_chat_unix: 0,
            chat_count: 0,
        }
    }

    /// Chat flood control: more than `per_interval` messages within
    /// `interval` seconds mutes the client for `mute` seconds.
    pub fn flood_check(
        &mut self,
        now_unix: i64,
        interval: i64,
        per_interval: u32,
        mute: i64,
    ) -> FloodVerdict {
        let since_last = now_unix - self.last_chat_unix;
        if since_last < 0 {
            return FloodVerdict::StillMuted;
        }
        if since_last > interval {
            self.last_chat_unix = now_unix;
            self.chat_count = 0;
        }
        self.chat_count += 1;
        if self.chat_count >= per_interval {
            self.last_chat_unix = now_unix + mute;
            self.chat_count = 0;
            return FloodVerdict::NowMuted;
        }
        FloodVerdict::Ok
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ArchiveEntry {
    pub id: ClientId,
    /// Unset while the uuid's owner is connected.
    pub logout_unix: Option<i64>,
}

/// uuid -> client-id memory that preserves identity across reconnects.
/// Entries expire a configurable time after logout.
#[derive(Debug, Default)]
pub struct ConnectionArchive {
    entries: HashMap<String, ArchiveEntry>,
}

impl ConnectionArchive {
    #[must_use]
    pub fn lookup(&self, uuid: &str) -> Option<ArchiveEntry> {
        self.entries.get(uuid).copied()
    }

    /// Bind a uuid to a client id; clears any pending expiry.
    pub fn reserve(&mut self, uuid: &str, id: ClientId) {
        self.entries.insert(
            uuid.to_string(),
            ArchiveEntry {
                id,
                logout_unix: None,
            },
        );
    }

    /// Start the expiry clock for a disconnecting uuid.
    pub fn mark_logout(&mut self, uuid: &str, now_unix: i64) {
        if let Some(entry) = self.entries.get_mut(uuid) {
            entry.logout_unix = Some(now_unix);
        }
    }

    /// Drop entries whose owner logged out more than `expire_secs`
    /// ago. Returns how many were removed.
    pub fn sweep(&mut self, now_unix: i64, expire_secs: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|uuid, entry| match entry.logout_unix {
            Some(logout) if now_unix - logout > expire_secs => {
                debug!("removing expired archive entry {uuid}");
                false
            }
            _ => true,
        });
        before - self.entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_unintroduced() {
        let s = Session::new();
        assert!(!s.introduced);
        assert!(!s.sent_info);
        assert!(!s.authed);
        assert_eq!(s.id, -1);
    }

    #[test]
    fn flood_allows_slow_chat() {
        let mut s = Session::new();
        for minute in 0..10 {
            assert_eq!(s.flood_check(minute * 60, 4, 6, 120), FloodVerdict::Ok);
        }
    }

    #[test]
    fn flood_mutes_burst() {
        let mut s = Session::new();
        let mut verdicts = Vec::new();
        for _ in 0..6 {
            verdicts.push(s.flood_check(100, 4, 6, 120));
        }
        assert_eq!(verdicts[4], FloodVerdict::Ok);
        assert_eq!(verdicts[5], FloodVerdict::NowMuted);

        // Still muted shortly after, free again once the mute lapses.
        assert_eq!(s.flood_check(150, 4, 6, 120), FloodVerdict::StillMuted);
        assert_eq!(s.flood_check(221, 4, 6, 120), FloodVerdict::Ok);
    }

    #[test]
    fn archive_round_trip() {
        let mut archive = ConnectionArchive::default();
        archive.reserve("uuid-a", 42);
        let entry = archive.lookup("uuid-a").unwrap();
        assert_eq!(entry.id, 42);
        assert_eq!(entry.logout_unix, None);
        assert!(archive.lookup("uuid-b").is_none());
    }

    #[test]
    fn archive_expires_after_logout() {
        let mut archive = ConnectionArchive::default();
        archive.reserve("uuid-a", 1);
        archive.reserve("uuid-b", 2);
        archive.mark_logout("uuid-a", 1000);

        // Not yet expired.
        assert_eq!(archive.sweep(1100, 300), 0);
        assert_eq!(archive.len(), 2);

        // Expired; the still-connected entry survives.
        assert_eq!(archive.sweep(1301, 300), 1);
        assert!(archive.lookup("uuid-a").is_none());
        assert!(archive.lookup("uuid-b").is_some());
    }

    #[test]
    fn reconnect_clears_pending_expiry() {
        let mut archive = ConnectionArchive::default();
        archive.reserve("uuid-a", 1);
        archive.mark_logout("uuid-a", 1000);
        archive.reserve("uuid-a", 1);
        assert_eq!(archive.sweep(10_000, 300), 0);
    }
}
