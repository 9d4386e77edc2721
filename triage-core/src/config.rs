//! Ledger configuration
//!
//! Loaded from environment variables with production defaults. Every value
//! is checked by [`LedgerConfig::validate`] before a ledger is built.

use crate::{ConfigError, TriageResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Maximum number of problem records kept per app.
pub const DEFAULT_MAX_PROBLEMS_PER_APP: usize = 100;

/// Aggregation window applied when a report does not specify one.
pub const DEFAULT_AGGREGATION_PERIOD_MINUTES: u32 = 60;

/// Maximum ids or keys accepted by a single dismissal.
pub const DEFAULT_MAX_DISMISS_BATCH: usize = 100;

/// Stored message length in characters. Longer messages are truncated.
pub const MESSAGE_MAX_CHARS: usize = 2048;

/// Shortest accepted message in characters.
pub const MESSAGE_MIN_CHARS: usize = 3;

pub const KEY_MIN_CHARS: usize = 3;
pub const KEY_MAX_CHARS: usize = 128;

/// Configuration for a problem ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Cap on records per app; the oldest are evicted beyond it.
    pub max_problems_per_app: usize,
    /// Window used when a report omits `aggregation_period`.
    pub default_aggregation_period_minutes: u32,
    pub max_dismiss_batch: usize,
    pub message_min_chars: usize,
    pub message_max_chars: usize,
    pub key_min_chars: usize,
    pub key_max_chars: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_problems_per_app: DEFAULT_MAX_PROBLEMS_PER_APP,
            default_aggregation_period_minutes: DEFAULT_AGGREGATION_PERIOD_MINUTES,
            max_dismiss_batch: DEFAULT_MAX_DISMISS_BATCH,
            message_min_chars: MESSAGE_MIN_CHARS,
            message_max_chars: MESSAGE_MAX_CHARS,
            key_min_chars: KEY_MIN_CHARS,
            key_max_chars: KEY_MAX_CHARS,
        }
    }
}

fn env_or<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Parse {
            var: var.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

impl LedgerConfig {
    /// Create LedgerConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TRIAGE_MAX_PROBLEMS_PER_APP`: per-app record cap (default: 100)
    /// - `TRIAGE_DEFAULT_AGGREGATION_PERIOD_MINUTES`: default window (default: 60)
    /// - `TRIAGE_MAX_DISMISS_BATCH`: ids/keys per dismissal (default: 100)
    ///
    /// Length bounds are not configurable from the environment.
    pub fn from_env() -> TriageResult<Self> {
        let defaults = Self::default();
        let config = Self {
            max_problems_per_app: env_or(
                "TRIAGE_MAX_PROBLEMS_PER_APP",
                defaults.max_problems_per_app,
            )?,
            default_aggregation_period_minutes: env_or(
                "TRIAGE_DEFAULT_AGGREGATION_PERIOD_MINUTES",
                defaults.default_aggregation_period_minutes,
            )?,
            max_dismiss_batch: env_or("TRIAGE_MAX_DISMISS_BATCH", defaults.max_dismiss_batch)?,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Override the per-app cap.
    pub fn with_max_problems_per_app(mut self, max: usize) -> Self {
        self.max_problems_per_app = max;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - max_problems_per_app > 0
    /// - max_dismiss_batch > 0
    /// - message bounds leave room for the "..." truncation suffix
    /// - key_min_chars <= key_max_chars
    pub fn validate(&self) -> TriageResult<()> {
        if self.max_problems_per_app == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_problems_per_app".to_string(),
                value: self.max_problems_per_app.to_string(),
                reason: "max_problems_per_app must be greater than 0".to_string(),
            }
            .into());
        }

        if self.max_dismiss_batch == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_dismiss_batch".to_string(),
                value: self.max_dismiss_batch.to_string(),
                reason: "max_dismiss_batch must be greater than 0".to_string(),
            }
            .into());
        }

        if self.message_max_chars < 3 || self.message_min_chars > self.message_max_chars {
            return Err(ConfigError::InvalidValue {
                field: "message_max_chars".to_string(),
                value: self.message_max_chars.to_string(),
                reason: format!(
                    "message_max_chars must be at least 3 and not below message_min_chars ({})",
                    self.message_min_chars
                ),
            }
            .into());
        }

        if self.key_min_chars > self.key_max_chars {
            return Err(ConfigError::InvalidValue {
                field: "key_min_chars".to_string(),
                value: self.key_min_chars.to_string(),
                reason: format!("key_min_chars must not exceed key_max_chars ({})", self.key_max_chars),
            }
            .into());
        }

        Ok(())
    }
}
