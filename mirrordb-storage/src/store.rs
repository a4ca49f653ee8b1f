//! Async key/value store trait shared by the uncached and cached variants.

use async_trait::async_trait;
use mirrordb_core::{Entry, MirrorDbResult, Value};

/// Key/value access over a collection of `{key, value}` records.
///
/// `db` names a record; `path` is a dotted path into its value. Empty `db`
/// (and, for `update`, an empty `path`) is a no-op returning `None`/`false`
/// without touching the backing store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value stored under `db`, or the nested field at `path` inside it.
    async fn get(&self, db: &str, path: Option<&str>) -> MirrorDbResult<Option<Value>>;

    /// Replace the whole value of `db`.
    async fn set(&self, db: &str, value: Value, overwrite: bool) -> MirrorDbResult<Option<Value>>;

    /// Set the nested field at `path`.
    async fn update(&self, db: &str, path: &str, value: Value) -> MirrorDbResult<Option<Value>>;

    /// Append to the array at `path`.
    async fn push(&self, db: &str, path: &str, values: Vec<Value>) -> MirrorDbResult<Option<Value>>;

    /// Append the values not already present in the array at `path`.
    async fn push_to_set(
        &self,
        db: &str,
        path: &str,
        values: Vec<Value>,
    ) -> MirrorDbResult<Option<Value>>;

    /// Delete the field at `path`, or the whole record when `path` is `None`.
    async fn delete(&self, db: &str, path: Option<&str>) -> MirrorDbResult<bool>;

    /// Snapshot of every record.
    async fn reduce(&self) -> MirrorDbResult<Vec<Entry>>;

    /// Emit a debug log line, with `value` appended when it is short enough.
    fn save_log(&self, msg: &str, value: Option<&Value>);
}
