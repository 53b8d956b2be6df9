//! Process settings
//!
//! Loaded once at startup from a TOML file. Every key has a default so an
//! empty file (or no file at all) yields a working configuration.
//!
//! ```toml
//! [database]
//! path = "/var/lib/invex/inventory.db"
//!
//! [groups]
//! cache_expiration_interval_secs = 43200
//! cache_expiration_fuzz_secs = 43200
//! manual_assignment_retry_ms = 1000
//!
//! [locks]
//! validity_secs = 60
//! ```

use crate::errors::{ExError, ExErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub groups: GroupSettings,
    pub locks: LockSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".invex/inventory.db"),
        }
    }
}

/// Group membership cache tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSettings {
    /// Base lifetime of a rebuilt cache
    pub cache_expiration_interval_secs: u64,
    /// Upper bound of the random offset added to each expiry
    pub cache_expiration_fuzz_secs: u64,
    /// Fixed backoff between lock attempts during manual assignment
    pub manual_assignment_retry_ms: u64,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            cache_expiration_interval_secs: 43_200,
            cache_expiration_fuzz_secs: 43_200,
            manual_assignment_retry_ms: 1_000,
        }
    }
}

impl GroupSettings {
    pub fn cache_expiration_interval(&self) -> Duration {
        Duration::from_secs(self.cache_expiration_interval_secs)
    }

    pub fn cache_expiration_fuzz(&self) -> Duration {
        Duration::from_secs(self.cache_expiration_fuzz_secs)
    }

    pub fn manual_assignment_retry(&self) -> Duration {
        Duration::from_millis(self.manual_assignment_retry_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Age after which a lock row is considered abandoned
    pub validity_secs: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self { validity_secs: 60 }
    }
}

impl LockSettings {
    pub fn validity(&self) -> Duration {
        Duration::from_secs(self.validity_secs)
    }
}

impl Settings {
    /// Parse settings from TOML text
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the text is not valid TOML or a key has
    /// the wrong type.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| {
            ExError::new(ExErrorKind::Configuration)
                .with_op("load_settings")
                .with_message(e.to_string())
        })
    }

    /// Load settings from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `Configuration` if it cannot
    /// be parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExError::new(ExErrorKind::Io)
                .with_op("load_settings")
                .with_message(format!("{}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }
}
