//! Error types for mirrordb operations

use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Cannot apply update at '{path}': {reason}")]
    PathConflict { path: String, reason: String },

    #[error("Backend failure: {reason}")]
    Backend { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("A connection string is required when no connection is open")]
    MissingConnectionString,

    #[error("Unsupported connection scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all mirrordb errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MirrorDbError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for mirrordb operations.
pub type MirrorDbResult<T> = Result<T, MirrorDbError>;

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for MirrorDbError {
    fn from(e: serde_json::Error) -> Self {
        MirrorDbError::Storage(e.into())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_invalid_path() {
        let err = StorageError::InvalidPath {
            path: "a..b".to_string(),
            reason: "empty segment".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Invalid path"));
        assert!(msg.contains("a..b"));
        assert!(msg.contains("empty segment"));
    }

    #[test]
    fn test_storage_error_display_lock_poisoned() {
        let msg = format!("{}", StorageError::LockPoisoned);
        assert_eq!(msg, "Storage lock poisoned");
    }

    #[test]
    fn test_config_error_display_missing_connection_string() {
        let msg = format!("{}", ConfigError::MissingConnectionString);
        assert!(msg.contains("connection string is required"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "collection".to_string(),
            value: "".to_string(),
            reason: "must not be empty".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("collection"));
        assert!(msg.contains("must not be empty"));
    }

    #[test]
    fn test_mirrordb_error_from_variants() {
        let storage = MirrorDbError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, MirrorDbError::Storage(_)));

        let config = MirrorDbError::from(ConfigError::UnsupportedScheme {
            scheme: "ftp".to_string(),
        });
        assert!(matches!(config, MirrorDbError::Config(_)));
    }

    #[test]
    fn test_serde_error_maps_to_serialization() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = MirrorDbError::from(parse_err);
        assert!(matches!(
            err,
            MirrorDbError::Storage(StorageError::Serialization { .. })
        ));
    }
}
