//! Server configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Startup configuration read from a JSON file.
///
/// Every field has a default, and a missing or unreadable file falls back
/// to the defaults entirely, so a bare server can run with no config at
/// all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// User ids allowed to join rooms as monitor observers.
    pub monitors: Vec<i32>,

    /// Whether clients may record replays; advisory, read by deployments
    /// that mount a replay store.
    pub replay_enabled: bool,

    /// Whether `CreateRoom` is accepted at all.
    pub room_creation_enabled: bool,

    /// How long (in seconds) a disconnected user keeps its identity and
    /// room membership before being reaped.
    pub dangle_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            monitors: Vec::new(),
            replay_enabled: true,
            room_creation_enabled: true,
            dangle_grace_secs: 60,
        }
    }
}

impl ServerConfig {
    /// Loads the config from `path`, falling back to defaults when the
    /// file is missing or malformed.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "config not read, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "config not parsed, using defaults");
                Self::default()
            }
        }
    }

    /// Whether `user` may join rooms as a monitor.
    pub fn can_monitor(&self, user: i32) -> bool {
        self.monitors.contains(&user)
    }

    pub fn dangle_grace(&self) -> Duration {
        Duration::from_secs(self.dangle_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert!(config.monitors.is_empty());
        assert!(config.replay_enabled);
        assert!(config.room_creation_enabled);
        assert_eq!(config.dangle_grace_secs, 60);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = ServerConfig::load(Path::new("/definitely/not/here.json"));
        assert!(config.room_creation_enabled);
    }

    #[test]
    fn test_partial_json_keeps_other_defaults() {
        let config: ServerConfig = serde_json::from_str(r#"{"monitors": [3, 9]}"#).unwrap();
        assert_eq!(config.monitors, vec![3, 9]);
        assert!(config.replay_enabled);
        assert!(config.can_monitor(3));
        assert!(!config.can_monitor(4));
    }
}
