use crate::error::ConfigError;

/// Default snapshot window: the first 200 messages.
pub const DEFAULT_SNAPSHOT_LIMIT: u32 = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Upper bound on entries read by the snapshot.
    pub snapshot_limit: u32,
    /// Table holding the feed; also the live topic.
    pub topic: String,
    /// Table holding author profiles.
    pub profile_table: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
            topic: "messages".to_string(),
            profile_table: "profiles".to_string(),
        }
    }
}

impl SyncConfig {
    /// Read `LOBBY_SNAPSHOT_LIMIT`, `LOBBY_FEED_TOPIC` and `LOBBY_PROFILE_TABLE`,
    /// keeping defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("LOBBY_SNAPSHOT_LIMIT") {
            config.snapshot_limit = raw.trim().parse().map_err(|e| ConfigError::Invalid {
                var: "LOBBY_SNAPSHOT_LIMIT",
                reason: format!("'{}': {}", raw, e),
            })?;
        }
        if let Some(topic) = lookup("LOBBY_FEED_TOPIC").filter(|s| !s.trim().is_empty()) {
            config.topic = topic.trim().to_string();
        }
        if let Some(table) = lookup("LOBBY_PROFILE_TABLE").filter(|s| !s.trim().is_empty()) {
            config.profile_table = table.trim().to_string();
        }

        Ok(config)
    }
}
