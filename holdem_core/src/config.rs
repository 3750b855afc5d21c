//! String-keyed server configuration.
//!
//! Backs the `CONFIG get|set|save` command: every value is a string on
//! the wire, with typed getters for the common cases. Persisted as a
//! flat JSON object.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use log::info;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    values: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut values = BTreeMap::new();
        let defaults: &[(&str, &str)] = &[
            ("auth_password", ""),
            ("conarchive_expire", "300"),
            // Run created games with zero inter-state delays; test and
            // simulation rigs only.
            ("dbg_instant_pacing", "0"),
            ("flood_chat_interval", "4"),
            ("flood_chat_per_interval", "6"),
            ("flood_chat_mute", "120"),
            ("max_games", "50"),
            ("max_create_per_player", "2"),
            ("max_register_per_player", "5"),
            ("max_subscribe_per_player", "5"),
            ("perm_create_user", "1"),
            ("welcome_message", ""),
        ];
        for (key, value) in defaults {
            values.insert((*key).to_string(), (*value).to_string());
        }
        Self { values }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).map_or("", String::as_str)
    }

    #[must_use]
    pub fn get_int(&self, key: &str) -> i64 {
        self.get(key).parse().unwrap_or(0)
    }

    #[must_use]
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.get(key), "1" | "true" | "yes")
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    /// Merge a JSON config file over the defaults. A missing file is
    /// not an error; a fresh install has none.
    pub fn load(&mut self, path: &Path) -> io::Result<()> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let parsed: BTreeMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        for (key, value) in parsed {
            self.values.insert(key, value);
        }
        info!("loaded config from {}", path.display());
        Ok(())
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let raw = serde_json::to_string_pretty(&self.values)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, raw)?;
        info!("saved config to {}", path.display());
        Ok(())
    }
}
