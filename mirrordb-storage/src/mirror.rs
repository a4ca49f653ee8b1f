//! Write-through mirror cache.
//!
//! [`MirrorCache`] owns a [`StoreProxy`] and an in-memory copy of every
//! record. The copy is loaded in full on construction; afterwards reads are
//! served from memory and every mutation goes to the store first and is then
//! mirrored with the value the store returned.
//!
//! # Consistency
//!
//! There is no TTL, capacity bound or conflict detection. The mirror lock is
//! held only for the synchronous map update, never across the store write,
//! so concurrent writers to one key can leave the mirror briefly stale (the
//! last response to arrive wins). Writes made to the backing collection by
//! anything other than this cache are not seen until [`MirrorCache::fetch`]
//! or [`MirrorCache::fetch_all`].

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use mirrordb_core::{value_at, Entry, MirrorDbResult, Value};

use crate::collection::DocumentCollection;
use crate::options::DbOptions;
use crate::proxy::StoreProxy;
use crate::store::KeyValueStore;

/// Store proxy with an in-memory mirror of the whole collection.
pub struct MirrorCache {
    proxy: StoreProxy,
    mirror: RwLock<BTreeMap<String, Option<Value>>>,
}

impl MirrorCache {
    /// Initialize the underlying proxy and load every record.
    pub async fn init(options: DbOptions) -> MirrorDbResult<Self> {
        Self::from_proxy(StoreProxy::init(options).await?).await
    }

    /// Build a cache over an already-initialized proxy.
    pub async fn from_proxy(proxy: StoreProxy) -> MirrorDbResult<Self> {
        let cache = Self {
            proxy,
            mirror: RwLock::new(BTreeMap::new()),
        };
        cache.fetch_all().await?;
        Ok(cache)
    }

    /// Build a cache over an already-open collection.
    pub async fn with_collection(collection: Arc<dyn DocumentCollection>) -> MirrorDbResult<Self> {
        Self::from_proxy(StoreProxy::new(collection)).await
    }

    pub fn proxy(&self) -> &StoreProxy {
        &self.proxy
    }

    pub fn collection_name(&self) -> &str {
        self.proxy.collection_name()
    }

    pub fn value_logging_max_length(&self) -> usize {
        self.proxy.value_logging_max_length()
    }

    pub fn save_log(&self, msg: &str, value: Option<&Value>) -> &Self {
        self.proxy.save_log(msg, value);
        self
    }

    /// Load every record from the store into the mirror.
    ///
    /// Mirror entries whose records no longer exist in the store are kept.
    pub async fn fetch_all(&self) -> MirrorDbResult<&Self> {
        let entries = self.proxy.reduce().await?;
        let count = entries.len();

        let mut mirror = self.write_mirror();
        for entry in entries {
            mirror.insert(entry.key, entry.value);
        }
        drop(mirror);

        tracing::debug!(
            target: "mirrordb",
            collection = %self.collection_name(),
            count,
            "mirror loaded"
        );
        Ok(self)
    }

    /// Reload one record from the store, bypassing the mirror.
    pub async fn fetch(&self, db: &str) -> MirrorDbResult<Option<Value>> {
        let value = self.proxy.get(db, None).await?;
        self.mirror_put(db, value.clone());
        Ok(value)
    }

    /// Read from the mirror. Never touches the store.
    pub fn get(&self, db: &str, path: Option<&str>) -> Option<Value> {
        if db.is_empty() {
            return None;
        }

        let mirror = self.read_mirror();
        let value = mirror.get(db)?;
        value_at(value.as_ref(), path).cloned()
    }

    /// Snapshot of the mirror in key order.
    pub fn reduce(&self) -> Vec<Entry> {
        self.read_mirror()
            .iter()
            .map(|(key, value)| Entry::new(key.clone(), value.clone()))
            .collect()
    }

    pub async fn set(&self, db: &str, value: Value, overwrite: bool) -> MirrorDbResult<Option<Value>> {
        self.write_through(db, self.proxy.set(db, value, overwrite))
            .await
    }

    pub async fn update(&self, db: &str, path: &str, value: Value) -> MirrorDbResult<Option<Value>> {
        self.write_through(db, self.proxy.update(db, path, value))
            .await
    }

    pub async fn push(&self, db: &str, path: &str, values: Vec<Value>) -> MirrorDbResult<Option<Value>> {
        self.write_through(db, self.proxy.push(db, path, values))
            .await
    }

    pub async fn push_to_set(
        &self,
        db: &str,
        path: &str,
        values: Vec<Value>,
    ) -> MirrorDbResult<Option<Value>> {
        self.write_through(db, self.proxy.push_to_set(db, path, values))
            .await
    }

    /// Delete the field at `path`, or the whole record.
    ///
    /// A whole-record delete reports `true` when either the store or the
    /// mirror held the record.
    pub async fn delete(&self, db: &str, path: Option<&str>) -> MirrorDbResult<bool> {
        if db.is_empty() {
            return Ok(false);
        }

        match path.filter(|p| !p.is_empty()) {
            Some(path) => {
                self.write_through(db, self.proxy.unset_path(db, path))
                    .await?;
                Ok(true)
            }
            None => {
                let deleted_from_store = self.proxy.delete(db, None).await?;
                let deleted_from_mirror = self.mirror_remove(db);
                Ok(deleted_from_store || deleted_from_mirror)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read_mirror().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_mirror().is_empty()
    }

    pub fn contains_key(&self, db: &str) -> bool {
        self.read_mirror().contains_key(db)
    }

    /// Run a store write, then mirror the value it returned.
    ///
    /// Nothing is mirrored when the store write fails. A `None` result is
    /// mirrored as-is, including for calls the proxy ignored.
    async fn write_through<F>(&self, db: &str, write: F) -> MirrorDbResult<Option<Value>>
    where
        F: Future<Output = MirrorDbResult<Option<Value>>> + Send,
    {
        let value = write.await?;
        self.mirror_put(db, value.clone());
        Ok(value)
    }

    fn mirror_put(&self, db: &str, value: Option<Value>) {
        self.write_mirror().insert(db.to_string(), value);
    }

    fn mirror_remove(&self, db: &str) -> bool {
        self.write_mirror().remove(db).is_some()
    }

    // Entries are independent, so a poisoned map is still usable.
    fn read_mirror(&self) -> RwLockReadGuard<'_, BTreeMap<String, Option<Value>>> {
        self.mirror.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_mirror(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Option<Value>>> {
        self.mirror.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Display for MirrorCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MirrorCache")
    }
}

impl fmt::Debug for MirrorCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorCache")
            .field("proxy", &self.proxy)
            .field("entries", &self.len())
            .finish()
    }
}

#[async_trait]
impl KeyValueStore for MirrorCache {
    async fn get(&self, db: &str, path: Option<&str>) -> MirrorDbResult<Option<Value>> {
        Ok(MirrorCache::get(self, db, path))
    }

    async fn set(&self, db: &str, value: Value, overwrite: bool) -> MirrorDbResult<Option<Value>> {
        MirrorCache::set(self, db, value, overwrite).await
    }

    async fn update(&self, db: &str, path: &str, value: Value) -> MirrorDbResult<Option<Value>> {
        MirrorCache::update(self, db, path, value).await
    }

    async fn push(&self, db: &str, path: &str, values: Vec<Value>) -> MirrorDbResult<Option<Value>> {
        MirrorCache::push(self, db, path, values).await
    }

    async fn push_to_set(
        &self,
        db: &str,
        path: &str,
        values: Vec<Value>,
    ) -> MirrorDbResult<Option<Value>> {
        MirrorCache::push_to_set(self, db, path, values).await
    }

    async fn delete(&self, db: &str, path: Option<&str>) -> MirrorDbResult<bool> {
        MirrorCache::delete(self, db, path).await
    }

    async fn reduce(&self) -> MirrorDbResult<Vec<Entry>> {
        Ok(MirrorCache::reduce(self))
    }

    fn save_log(&self, msg: &str, value: Option<&Value>) {
        MirrorCache::save_log(self, msg, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrordb_core::{sort_entries, MirrorDbError, StorageError};
    use serde_json::json;

    use crate::backend::{Connection, MemoryCollection};
    use crate::collection::Update;

    async fn seeded() -> (MirrorCache, Arc<MemoryCollection>) {
        let collection = Arc::new(MemoryCollection::new("test"));
        collection
            .find_one_and_upsert("seed", Update::set_value(json!({"n": 1})))
            .await
            .unwrap();
        let cache = MirrorCache::with_collection(collection.clone()).await.unwrap();
        (cache, collection)
    }

    #[tokio::test]
    async fn test_construction_loads_everything() {
        let (cache, _) = seeded().await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("seed", Some("n")), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_init_from_options() {
        let connection = Connection::memory();
        let proxy = StoreProxy::init(DbOptions::default().with_connection(connection.clone()))
            .await
            .unwrap();
        proxy.set("pre", json!("existing"), false).await.unwrap();

        let cache = MirrorCache::init(DbOptions::default().with_connection(connection))
            .await
            .unwrap();
        assert_eq!(cache.get("pre", None), Some(json!("existing")));
        assert_eq!(cache.to_string(), "MirrorCache");
    }

    #[tokio::test]
    async fn test_writes_go_through_to_store_and_mirror() {
        let (cache, collection) = seeded().await;

        cache.set("x", json!({"a": 1}), false).await.unwrap();
        cache.update("x", "b", json!(2)).await.unwrap();
        cache.push("x", "arr", vec![json!(1), json!(1)]).await.unwrap();
        cache.push_to_set("x", "set", vec![json!(1), json!(1)]).await.unwrap();

        let expected = json!({"a": 1, "b": 2, "arr": [1, 1], "set": [1]});
        assert_eq!(cache.get("x", None), Some(expected.clone()));

        let stored = collection.find_one("x").await.unwrap().unwrap();
        assert_eq!(stored.value, Some(expected));
    }

    #[tokio::test]
    async fn test_get_reads_only_the_mirror() {
        let (cache, collection) = seeded().await;
        collection
            .find_one_and_upsert("seed", Update::set_value(json!({"n": 99})))
            .await
            .unwrap();

        assert_eq!(cache.get("seed", Some("n")), Some(json!(1)));
        assert_eq!(cache.fetch("seed").await.unwrap(), Some(json!({"n": 99})));
        assert_eq!(cache.get("seed", Some("n")), Some(json!(99)));
    }

    #[tokio::test]
    async fn test_fetch_missing_record_mirrors_none() {
        let (cache, _) = seeded().await;
        assert_eq!(cache.fetch("nobody").await.unwrap(), None);
        assert!(cache.contains_key("nobody"));
        assert_eq!(cache.get("nobody", None), None);
    }

    #[tokio::test]
    async fn test_fetch_all_keeps_entries_missing_from_store() {
        let (cache, collection) = seeded().await;
        collection.clear();
        collection
            .find_one_and_upsert("new", Update::set_value(json!(true)))
            .await
            .unwrap();

        cache.fetch_all().await.unwrap();
        assert!(cache.contains_key("seed"));
        assert!(cache.contains_key("new"));
    }

    #[tokio::test]
    async fn test_no_op_writes_mirror_none() {
        let (cache, collection) = seeded().await;
        assert_eq!(cache.update("seed", "", json!(1)).await.unwrap(), None);
        assert_eq!(cache.get("seed", None), None);
        // the store still holds the record
        assert!(collection.find_one("seed").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_store_write_leaves_mirror_untouched() {
        let (cache, _) = seeded().await;
        let err = cache.push("seed", "n", vec![json!(2)]).await.unwrap_err();
        assert!(matches!(
            err,
            MirrorDbError::Storage(StorageError::PathConflict { .. })
        ));
        assert_eq!(cache.get("seed", None), Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_delete_field() {
        let (cache, collection) = seeded().await;
        cache.set("x", json!({"a": 1, "b": 2}), false).await.unwrap();

        assert!(cache.delete("x", Some("a")).await.unwrap());
        assert_eq!(cache.get("x", None), Some(json!({"b": 2})));
        let stored = collection.find_one("x").await.unwrap().unwrap();
        assert_eq!(stored.value, Some(json!({"b": 2})));
    }

    #[tokio::test]
    async fn test_delete_record() {
        let (cache, _) = seeded().await;
        assert!(!cache.delete("missing", None).await.unwrap());
        assert!(!cache.delete("", None).await.unwrap());

        cache.set("x", json!(1), false).await.unwrap();
        assert!(cache.delete("x", None).await.unwrap());
        assert_eq!(cache.get("x", None), None);
        assert!(!cache.contains_key("x"));
    }

    #[tokio::test]
    async fn test_delete_true_when_only_mirror_had_record() {
        let (cache, collection) = seeded().await;
        collection.delete_one("seed").await.unwrap();

        assert!(cache.delete("seed", None).await.unwrap());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_delete_true_when_only_store_had_record() {
        let (cache, collection) = seeded().await;
        collection
            .find_one_and_upsert("late", Update::set_value(json!(1)))
            .await
            .unwrap();

        assert!(!cache.contains_key("late"));
        assert!(cache.delete("late", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_reduce_matches_store_after_fetch_all() {
        let (cache, collection) = seeded().await;
        cache.set("a", json!([1]), true).await.unwrap();
        cache.delete("b", Some("x")).await.unwrap();

        let store = sort_entries(collection.find_all().await.unwrap());
        assert_eq!(cache.reduce(), store);

        let via_trait = KeyValueStore::reduce(&cache).await.unwrap();
        assert_eq!(via_trait, store);
    }
}
