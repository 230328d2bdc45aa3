//! Engine tunables.

use std::env;

use thiserror::Error;

pub const MAX_COMMIT_ATTEMPTS_ENV: &str = "SPORTSBOOK_MAX_COMMIT_ATTEMPTS";
pub const REPLAY_PAGE_SIZE_ENV: &str = "SPORTSBOOK_REPLAY_PAGE_SIZE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse '{value}' as a positive integer")]
    Malformed { var: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Attempts per optimistic transaction before giving up with a store failure.
    pub max_commit_attempts: u32,
    /// Page size used when replaying a user's ledger.
    pub replay_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 16,
            replay_page_size: 512,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `SPORTSBOOK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup(MAX_COMMIT_ATTEMPTS_ENV) {
            config.max_commit_attempts = parse_positive(MAX_COMMIT_ATTEMPTS_ENV, &value)?;
        }
        if let Some(value) = lookup(REPLAY_PAGE_SIZE_ENV) {
            config.replay_page_size = parse_positive(REPLAY_PAGE_SIZE_ENV, &value)?;
        }
        Ok(config)
    }
}

fn parse_positive<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Default + PartialEq,
{
    let parsed: T = value.trim().parse().map_err(|_| ConfigError::Malformed {
        var,
        value: value.to_string(),
    })?;
    if parsed == T::default() {
        return Err(ConfigError::Zero(var));
    }
    Ok(parsed)
}
