//! mirrordb Core - Shared Types
//!
//! Errors, configuration and dotted-path helpers used by every other crate in
//! the workspace. Nothing in here performs I/O.

pub mod config;
pub mod error;
pub mod path;

pub use config::{
    DbConfig, DEFAULT_COLLECTION, DEFAULT_VALUE_LOGGING_MAX_LENGTH, ENV_COLLECTION,
    ENV_CONNECTION_STRING, ENV_VALUE_LOGGING_MAX_LENGTH,
};
pub use error::{ConfigError, MirrorDbError, MirrorDbResult, StorageError};
pub use path::{
    add_to_set_at, push_at, set_at, unset_at, value_at, FieldPath, MAX_ARRAY_PADDING,
};

use serde::{Deserialize, Serialize};

pub use serde_json::Value;

// ============================================================================
// ENTRY
// ============================================================================

/// One `{key, value}` pair as returned by a full-table `reduce()`.
///
/// `value` is `None` for records that exist without a value field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Order a list of entries by key so snapshots can be compared as sets.
pub fn sort_entries(mut entries: Vec<Entry>) -> Vec<Entry> {
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    entries
}
