//! Configuration loading and validation.
//!
//! Configuration is a small TOML file. Validation is fail-closed: a
//! missing or undersized signing secret is rejected at load time, before
//! any token could be signed with it.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::token::{TokenError, TokenSecret};

/// Default verification token lifetime: five minutes.
const DEFAULT_TOKEN_TTL_SECS: u64 = 300;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but fails validation.
    #[error("invalid config: {reason}")]
    Validation {
        /// What failed.
        reason: String,
    },
}

/// Core service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    /// Path to the `SQLite` database file.
    pub db_path: PathBuf,

    /// Hex-encoded token signing secret, at least 32 bytes decoded.
    token_secret: String,

    /// Token lifetime in seconds.
    #[serde(default = "default_token_ttl")]
    pub default_token_ttl_secs: u64,

    /// Whether advisory insight annotations are enabled. Off by default;
    /// insights never gate or alter ledger writes.
    #[serde(default)]
    pub ai_insights_enabled: bool,
}

const fn default_token_ttl() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

impl CoreConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed or validated.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// The decoded signing secret.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the secret does not decode; unlikely
    /// after [`Self::from_toml`], which validates it up front.
    pub fn token_secret(&self) -> Result<TokenSecret, ConfigError> {
        TokenSecret::from_hex(&self.token_secret).map_err(|e| ConfigError::Validation {
            reason: secret_error(&e),
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                reason: "db_path must not be empty".to_string(),
            });
        }
        if self.default_token_ttl_secs == 0 {
            return Err(ConfigError::Validation {
                reason: "default_token_ttl_secs must be positive".to_string(),
            });
        }
        // Decode the secret now so a bad secret fails at startup, not at
        // the first issuance.
        self.token_secret().map(|_| ())
    }
}

fn secret_error(e: &TokenError) -> String {
    match e {
        TokenError::SecretTooShort { len, min } => {
            format!("token_secret too short: {len} bytes decoded, minimum {min}")
        }
        other => format!("token_secret invalid: {other}"),
    }
}
