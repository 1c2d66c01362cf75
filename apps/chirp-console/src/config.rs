//! Environment-backed runtime configuration for `chirp-console`.

use std::{
    env,
    error::Error,
    fmt,
    path::PathBuf,
};

const DEFAULT_DATA_DIR: &str = "./.chirp-console-store";
const DEFAULT_ROOM_ID: &str = "room:general";

/// Runtime configuration used by the console demo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleConfig {
    /// Directory holding the persisted avatar cache.
    pub data_dir: PathBuf,
    /// Room the demo script runs against.
    pub room_id: String,
    /// Messages requested per timeline backfill.
    pub backfill_limit: u16,
    /// Cap on live events buffered while a backfill is in flight.
    pub pending_limit: usize,
    /// LRU capacity of the user avatar namespace.
    pub user_avatar_capacity: usize,
    /// LRU capacity of the room avatar namespace.
    pub room_avatar_capacity: usize,
}

impl ConsoleConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let data_dir = optional_trimmed_env("CHIRP_DATA_DIR", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let room_id = optional_trimmed_env("CHIRP_ROOM_ID", &mut lookup)
            .unwrap_or_else(|| DEFAULT_ROOM_ID.to_owned());

        let backfill_limit = parse_optional_u16(
            "CHIRP_BACKFILL_LIMIT",
            chirp_client::DEFAULT_BACKFILL_LIMIT,
            &mut lookup,
        )?;
        let pending_limit = parse_optional_usize(
            "CHIRP_PENDING_LIMIT",
            chirp_core::DEFAULT_PENDING_LIMIT,
            &mut lookup,
        )?;
        let user_avatar_capacity = parse_optional_usize(
            "CHIRP_USER_AVATAR_CAPACITY",
            chirp_avatar::DEFAULT_USER_CAPACITY,
            &mut lookup,
        )?;
        let room_avatar_capacity = parse_optional_usize(
            "CHIRP_ROOM_AVATAR_CAPACITY",
            chirp_avatar::DEFAULT_ROOM_CAPACITY,
            &mut lookup,
        )?;

        if backfill_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHIRP_BACKFILL_LIMIT",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if pending_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHIRP_PENDING_LIMIT",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if user_avatar_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHIRP_USER_AVATAR_CAPACITY",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if room_avatar_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHIRP_ROOM_AVATAR_CAPACITY",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            data_dir,
            room_id,
            backfill_limit,
            pending_limit,
            user_avatar_capacity,
            room_avatar_capacity,
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u16<F>(key: &'static str, default: u16, lookup: &mut F) -> Result<u16, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<u16>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_usize<F>(
    key: &'static str,
    default: usize,
    lookup: &mut F,
) -> Result<usize, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<usize>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
