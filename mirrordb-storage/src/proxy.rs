//! Uncached store proxy.
//!
//! [`StoreProxy`] translates key/value calls into operations on a single
//! [`DocumentCollection`]. Every read is a round trip to the backing store;
//! every write is one atomic find-one-and-upsert whose post-write value is
//! returned to the caller.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use mirrordb_core::{
    value_at, ConfigError, Entry, FieldPath, MirrorDbResult, Value, DEFAULT_VALUE_LOGGING_MAX_LENGTH,
};

use crate::backend::Connection;
use crate::collection::{DocumentCollection, Update};
use crate::options::{default_debug_logger, DbOptions, DebugLogger};
use crate::store::KeyValueStore;

/// Key/value access straight against the backing collection.
#[derive(Clone)]
pub struct StoreProxy {
    collection: Arc<dyn DocumentCollection>,
    debug_logger: DebugLogger,
    value_logging_max_length: usize,
}

impl StoreProxy {
    /// Connect (or reuse the supplied connection) and bind the configured
    /// collection.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingConnectionString`] when neither a
    /// connection nor a connection string is given, and any error raised
    /// while opening the connection or the collection.
    pub async fn init(options: DbOptions) -> MirrorDbResult<Self> {
        let (config, debug_logger, connection) = options.into_parts();
        config.validate()?;

        let connection = match (connection, config.connection_string.as_deref()) {
            (Some(connection), _) => connection,
            (None, Some(connection_string)) if !connection_string.is_empty() => {
                Connection::open(connection_string).await?
            }
            (None, _) => return Err(ConfigError::MissingConnectionString.into()),
        };

        let collection = connection.collection(&config.collection)?;
        tracing::info!(
            scheme = connection.scheme(),
            collection = %config.collection,
            "store proxy initialized"
        );

        Ok(Self {
            debug_logger: debug_logger.unwrap_or_else(|| default_debug_logger(&config.collection)),
            value_logging_max_length: config.value_logging_max_length,
            collection,
        })
    }

    /// Wrap an already-open collection with default logging settings.
    pub fn new(collection: Arc<dyn DocumentCollection>) -> Self {
        Self {
            debug_logger: default_debug_logger(collection.name()),
            value_logging_max_length: DEFAULT_VALUE_LOGGING_MAX_LENGTH,
            collection,
        }
    }

    pub fn with_debug_logger(mut self, logger: DebugLogger) -> Self {
        self.debug_logger = logger;
        self
    }

    pub fn with_value_logging_max_length(mut self, max: usize) -> Self {
        self.value_logging_max_length = max;
        self
    }

    /// The backing collection handle.
    pub fn collection(&self) -> &Arc<dyn DocumentCollection> {
        &self.collection
    }

    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }

    pub fn value_logging_max_length(&self) -> usize {
        self.value_logging_max_length
    }

    /// Emit `msg` through the debug logger, appending `, value: {json}` when
    /// a value is given and its compact JSON fits the configured length.
    pub fn save_log(&self, msg: &str, value: Option<&Value>) -> &Self {
        let json = value
            .and_then(|v| serde_json::to_string(v).ok())
            .filter(|json| json.chars().count() <= self.value_logging_max_length);

        match json {
            Some(json) => (self.debug_logger)(&format!("{msg}, value: {json}")),
            None => (self.debug_logger)(msg),
        }
        self
    }

    /// Full-table snapshot of `{key, value}` pairs.
    pub async fn reduce(&self) -> MirrorDbResult<Vec<Entry>> {
        self.collection.find_all().await
    }

    pub async fn get(&self, db: &str, path: Option<&str>) -> MirrorDbResult<Option<Value>> {
        if db.is_empty() {
            return Ok(None);
        }

        let entry = self.collection.find_one(db).await?;
        Ok(entry.and_then(|entry| value_at(entry.value.as_ref(), path).cloned()))
    }

    /// Upsert `value` as the whole value of `db`.
    ///
    /// Without `overwrite` the update also writes the key on insert.
    pub async fn set(&self, db: &str, value: Value, overwrite: bool) -> MirrorDbResult<Option<Value>> {
        if db.is_empty() {
            return Ok(None);
        }

        let note = if overwrite { "overwriting existing data" } else { "" };
        self.save_log(&format!("setting collection {db}, {note}"), Some(&value));

        let update = Update::set_value(value);
        let update = if overwrite { update } else { update.with_key_on_insert() };
        Ok(self.collection.find_one_and_upsert(db, update).await?.value)
    }

    /// Upsert the nested field at `path`.
    pub async fn update(&self, db: &str, path: &str, value: Value) -> MirrorDbResult<Option<Value>> {
        if db.is_empty() || path.is_empty() {
            return Ok(None);
        }

        self.save_log(&format!("updating {db}.{path}"), Some(&value));

        let path = FieldPath::parse(path)?;
        let entry = self
            .collection
            .find_one_and_upsert(db, Update::set(path, value))
            .await?;
        Ok(entry.value)
    }

    pub async fn push(&self, db: &str, path: &str, values: Vec<Value>) -> MirrorDbResult<Option<Value>> {
        self.push_values(db, path, values, false).await
    }

    pub async fn push_to_set(
        &self,
        db: &str,
        path: &str,
        values: Vec<Value>,
    ) -> MirrorDbResult<Option<Value>> {
        self.push_values(db, path, values, true).await
    }

    async fn push_values(
        &self,
        db: &str,
        path: &str,
        values: Vec<Value>,
        as_set: bool,
    ) -> MirrorDbResult<Option<Value>> {
        let values = spread_single_array(values);
        if db.is_empty() || values.is_empty() {
            return Ok(None);
        }

        self.save_log(
            &format!("pushing data to {db}.{path}"),
            Some(&Value::Array(values.clone())),
        );

        let path = FieldPath::parse(path)?;
        let update = if as_set {
            Update::add_to_set(path, values)
        } else {
            Update::push(path, values)
        };
        Ok(self.collection.find_one_and_upsert(db, update).await?.value)
    }

    /// Delete the field at `path`, or the whole record.
    ///
    /// Deleting a field upserts the record and always reports `true`;
    /// deleting a record reports whether one was removed.
    pub async fn delete(&self, db: &str, path: Option<&str>) -> MirrorDbResult<bool> {
        if db.is_empty() {
            return Ok(false);
        }

        match path.filter(|p| !p.is_empty()) {
            Some(path) => {
                self.unset_path(db, path).await?;
                Ok(true)
            }
            None => {
                self.save_log(&format!("deleting {db}"), None);
                Ok(self.collection.delete_one(db).await? > 0)
            }
        }
    }

    /// Log and upsert-unset `path` inside `db`, returning the new value.
    pub(crate) async fn unset_path(&self, db: &str, path: &str) -> MirrorDbResult<Option<Value>> {
        self.save_log(&format!("deleting {db}.{path}"), None);

        let path = FieldPath::parse(path)?;
        let entry = self
            .collection
            .find_one_and_upsert(db, Update::unset(path))
            .await?;
        Ok(entry.value)
    }
}

/// A single array argument stands for its elements.
fn spread_single_array(mut values: Vec<Value>) -> Vec<Value> {
    if values.len() == 1 && values[0].is_array() {
        if let Some(Value::Array(items)) = values.pop() {
            return items;
        }
    }
    values
}

impl fmt::Display for StoreProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StoreProxy")
    }
}

impl fmt::Debug for StoreProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreProxy")
            .field("collection", &self.collection.name())
            .field("value_logging_max_length", &self.value_logging_max_length)
            .finish()
    }
}

#[async_trait]
impl KeyValueStore for StoreProxy {
    async fn get(&self, db: &str, path: Option<&str>) -> MirrorDbResult<Option<Value>> {
        StoreProxy::get(self, db, path).await
    }

    async fn set(&self, db: &str, value: Value, overwrite: bool) -> MirrorDbResult<Option<Value>> {
        StoreProxy::set(self, db, value, overwrite).await
    }

    async fn update(&self, db: &str, path: &str, value: Value) -> MirrorDbResult<Option<Value>> {
        StoreProxy::update(self, db, path, value).await
    }

    async fn push(&self, db: &str, path: &str, values: Vec<Value>) -> MirrorDbResult<Option<Value>> {
        StoreProxy::push(self, db, path, values).await
    }

    async fn push_to_set(
        &self,
        db: &str,
        path: &str,
        values: Vec<Value>,
    ) -> MirrorDbResult<Option<Value>> {
        StoreProxy::push_to_set(self, db, path, values).await
    }

    async fn delete(&self, db: &str, path: Option<&str>) -> MirrorDbResult<bool> {
        StoreProxy::delete(self, db, path).await
    }

    async fn reduce(&self) -> MirrorDbResult<Vec<Entry>> {
        StoreProxy::reduce(self).await
    }

    fn save_log(&self, msg: &str, value: Option<&Value>) {
        StoreProxy::save_log(self, msg, value);
    }
}
