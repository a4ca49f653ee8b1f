//! Configuration types

use crate::{ConfigError, MirrorDbResult};
use serde::{Deserialize, Deserializer, Serialize};

/// Collection used when none is configured.
pub const DEFAULT_COLLECTION: &str = "db-collections";

/// Longest serialized value still embedded in debug log lines.
pub const DEFAULT_VALUE_LOGGING_MAX_LENGTH: usize = 20;

pub const ENV_CONNECTION_STRING: &str = "MIRRORDB_CONNECTION_STRING";
pub const ENV_COLLECTION: &str = "MIRRORDB_COLLECTION";
pub const ENV_VALUE_LOGGING_MAX_LENGTH: &str = "MIRRORDB_VALUE_LOGGING_MAX_LENGTH";

/// Serializable store configuration.
///
/// `value_logging_max_length` of `0` disables value logging entirely. In TOML
/// it may also be given as `false` (same as `0`) or `true` (the default).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub connection_string: Option<String>,
    pub collection: String,
    #[serde(deserialize_with = "deserialize_logging_limit")]
    pub value_logging_max_length: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            collection: DEFAULT_COLLECTION.to_string(),
            value_logging_max_length: DEFAULT_VALUE_LOGGING_MAX_LENGTH,
        }
    }
}

impl DbConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: Some(connection_string.into()),
            ..Self::default()
        }
    }

    /// Set the collection name.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Set the value logging limit. `0` disables value logging.
    pub fn with_value_logging_max_length(mut self, max: usize) -> Self {
        self.value_logging_max_length = max;
        self
    }

    /// Build a config from `MIRRORDB_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> MirrorDbResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`DbConfig::from_env`] but with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> MirrorDbResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(conn) = lookup(ENV_CONNECTION_STRING).filter(|s| !s.is_empty()) {
            config.connection_string = Some(conn);
        }
        if let Some(collection) = lookup(ENV_COLLECTION) {
            config.collection = collection;
        }
        if let Some(raw) = lookup(ENV_VALUE_LOGGING_MAX_LENGTH) {
            config.value_logging_max_length = parse_logging_limit(&raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a config from TOML.
    pub fn from_toml_str(source: &str) -> MirrorDbResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> MirrorDbResult<()> {
        if self.collection.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "collection".to_string(),
                value: self.collection.clone(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn parse_logging_limit(raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "false" | "off" | "no" => Ok(0),
        "true" | "on" | "yes" => Ok(DEFAULT_VALUE_LOGGING_MAX_LENGTH),
        other => other.parse().map_err(|_| ConfigError::InvalidValue {
            field: ENV_VALUE_LOGGING_MAX_LENGTH.to_string(),
            value: raw.to_string(),
            reason: "expected a non-negative integer or false".to_string(),
        }),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LoggingLimit {
    Max(usize),
    Flag(bool),
}

fn deserialize_logging_limit<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match LoggingLimit::deserialize(deserializer)? {
        LoggingLimit::Max(max) => max,
        LoggingLimit::Flag(false) => 0,
        LoggingLimit::Flag(true) => DEFAULT_VALUE_LOGGING_MAX_LENGTH,
    })
}
