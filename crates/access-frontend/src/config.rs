//! Frontend configuration.

use std::path::Path;
use std::time::Duration;

use proven_access_api::VersionRange;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Settings for a frontend's connection to one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    /// ABI versions offered on connect.
    pub versions: VersionRange,

    /// How long to wait for a response before resending.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Pause before resending after a retriable failure.
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,

    /// Resends of one request before giving up.
    pub max_retries: u32,

    /// Leader redirects followed for one request before giving up.
    pub max_redirects: u32,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            versions: VersionRange::all(),
            request_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(50),
            max_retries: 10,
            max_redirects: 5,
        }
    }
}

impl FrontendConfig {
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

    /// Check the configuration for values the frontend cannot run with.
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

        if self.request_timeout.is_zero() {
            return Err(Error::Configuration {
                message: "Request timeout must be positive".to_string(),
            });
        }

        Ok(())
    }
}
