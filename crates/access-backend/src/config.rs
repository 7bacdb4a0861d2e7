//! Backend configuration.

use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

use proven_access_api::{Address, VersionRange};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Settings for a shard backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// ABI versions the backend accepts.
    pub versions: VersionRange,

    /// Outstanding requests each frontend may have; advertised on connect.
    pub max_messages: NonZeroU32,

    /// Other backends of the shard, advertised on connect.
    pub alternates: Vec<Address>,

    /// Purged transactions remembered per history, so that late requests get
    /// a precise `ClosedTransaction` answer instead of `DeadTransaction`.
    pub closed_transaction_retention: usize,

    /// Purged histories whose purge acknowledgement can still be replayed.
    pub purged_history_retention: usize,

    /// Envelopes queued per frontend before new ones are dropped.
    pub frontend_mailbox_capacity: usize,

    /// Silence after which a frontend holding no histories or open
    /// transactions is forgotten.
    #[serde(with = "humantime_serde")]
    pub frontend_idle_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            versions: VersionRange::all(),
            max_messages: NonZeroU32::new(1000).unwrap_or(NonZeroU32::MIN),
            alternates: Vec::new(),
            closed_transaction_retention: 1024,
            purged_history_retention: 128,
            frontend_mailbox_capacity: 1024,
            frontend_idle_timeout: Duration::from_secs(600),
        }
    }
}

impl BackendConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Fails if the string cannot be parsed or validated.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| Error::Configuration {
            message: format!("Failed to parse config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the backend cannot run with.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.versions.min > self.versions.max {
            return Err(Error::Configuration {
                message: format!(
                    "Minimum version {} is above maximum {}",
                    self.versions.min, self.versions.max
                ),
            });
        }

        if self.closed_transaction_retention == 0 {
            return Err(Error::Configuration {
                message: "Closed transaction retention must be positive".to_string(),
            });
        }

        if self.purged_history_retention == 0 {
            return Err(Error::Configuration {
                message: "Purged history retention must be positive".to_string(),
            });
        }

        if self.frontend_mailbox_capacity == 0 {
            return Err(Error::Configuration {
                message: "Frontend mailbox capacity must be positive".to_string(),
            });
        }

        if self.frontend_idle_timeout.is_zero() {
            return Err(Error::Configuration {
                message: "Frontend idle timeout must be positive".to_string(),
            });
        }

        Ok(())
    }
}
