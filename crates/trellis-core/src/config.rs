//! Store configuration
//!
//! Settings are resolved in three layers: built-in defaults, an optional
//! TOML file, then `TRELLIS_*` environment variables.
//!
//! ```toml
//! dense_node_threshold = 50
//! relationship_grab_size = 100
//! free_ids_during_rollback = true
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for the record stores and write transactions
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Relationship count at which a node is promoted to dense storage
    pub dense_node_threshold: u64,
    /// Maximum number of relationships returned per `get_more_relationships` call
    pub relationship_grab_size: usize,
    /// Whether rolled back transactions hand the ids of their created records back
    pub free_ids_during_rollback: bool,
    /// Same policy, applied to transactions rebuilt from the command log
    pub free_ids_during_recovery_rollback: bool,
    /// Initial size in bytes of each store file
    pub initial_store_size: usize,
    /// How long a transaction waits for a record lock
    pub lock_timeout_ms: u64,
    /// Append commands to the command log during prepare/commit
    pub command_log_enabled: bool,
    /// Log size in bytes past which a commit flushes the stores and drops
    /// finished transactions from the log; 0 disables rotation
    pub command_log_rotation_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dense_node_threshold: 50,
            relationship_grab_size: 100,
            free_ids_during_rollback: true,
            free_ids_during_recovery_rollback: false,
            initial_store_size: 64 * 1024,
            lock_timeout_ms: 5_000,
            command_log_enabled: true,
            command_log_rotation_bytes: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config: StoreConfig = toml::from_str(&content)
            .map_err(|e| Error::config(format!("failed to parse {:?}: {}", path, e)))?;
        tracing::info!("Loaded store configuration from {:?}", path);
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TRELLIS_*` overrides from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TRELLIS_DENSE_NODE_THRESHOLD") {
            self.dense_node_threshold = parse_var("TRELLIS_DENSE_NODE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("TRELLIS_RELATIONSHIP_GRAB_SIZE") {
            self.relationship_grab_size = parse_var("TRELLIS_RELATIONSHIP_GRAB_SIZE", &v)?;
        }
        if let Some(v) = lookup("TRELLIS_FREE_IDS_DURING_ROLLBACK") {
            self.free_ids_during_rollback = parse_var("TRELLIS_FREE_IDS_DURING_ROLLBACK", &v)?;
        }
        if let Some(v) = lookup("TRELLIS_FREE_IDS_DURING_RECOVERY_ROLLBACK") {
            self.free_ids_during_recovery_rollback =
                parse_var("TRELLIS_FREE_IDS_DURING_RECOVERY_ROLLBACK", &v)?;
        }
        if let Some(v) = lookup("TRELLIS_INITIAL_STORE_SIZE") {
            self.initial_store_size = parse_var("TRELLIS_INITIAL_STORE_SIZE", &v)?;
        }
        if let Some(v) = lookup("TRELLIS_LOCK_TIMEOUT_MS") {
            self.lock_timeout_ms = parse_var("TRELLIS_LOCK_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("TRELLIS_COMMAND_LOG_ENABLED") {
            self.command_log_enabled = parse_var("TRELLIS_COMMAND_LOG_ENABLED", &v)?;
        }
        if let Some(v) = lookup("TRELLIS_COMMAND_LOG_ROTATION_BYTES") {
            self.command_log_rotation_bytes =
                parse_var("TRELLIS_COMMAND_LOG_ROTATION_BYTES", &v)?;
        }
        Ok(())
    }

    /// Reject settings the stores cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.dense_node_threshold == 0 {
            return Err(Error::config("dense_node_threshold must be at least 1"));
        }
        if self.relationship_grab_size == 0 {
            return Err(Error::config("relationship_grab_size must be at least 1"));
        }
        if self.initial_store_size == 0 {
            return Err(Error::config("initial_store_size must be non-zero"));
        }
        Ok(())
    }

    /// Lock wait as a `Duration`
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Builder-style log rotation size override
    pub fn with_command_log_rotation_bytes(mut self, bytes: u64) -> Self {
        self.command_log_rotation_bytes = bytes;
        self
    }

    /// Builder-style threshold override
    pub fn with_dense_node_threshold(mut self, threshold: u64) -> Self {
        self.dense_node_threshold = threshold;
        self
    }

    /// Builder-style grab size override
    pub fn with_relationship_grab_size(mut self, grab_size: usize) -> Self {
        self.relationship_grab_size = grab_size;
        self
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("invalid value for {}: {:?}", key, value)))
}
