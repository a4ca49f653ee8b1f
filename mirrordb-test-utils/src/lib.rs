//! mirrordb Test Utilities
//!
//! Shared test infrastructure for the mirrordb workspace:
//! - Proptest generators for keys, dotted paths and JSON values
//! - A fault-injecting collection wrapper
//! - Fixtures for fresh connections, proxies and caches
//! - Custom assertions for mirrordb results

pub use mirrordb_core::{
    sort_entries, ConfigError, DbConfig, Entry, FieldPath, MirrorDbError, MirrorDbResult,
    StorageError, Value,
};
pub use mirrordb_storage::{
    Connection, DbOptions, DebugLogger, DocumentCollection, KeyValueStore, MemoryCollection,
    MirrorCache, StoreProxy, Update,
};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Collection wrapper that can be told to fail reads or writes.
///
/// Counts every call that reaches it, so tests can also check that an
/// operation did no I/O at all.
pub struct FaultyCollection {
    inner: Arc<dyn DocumentCollection>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    calls: AtomicUsize,
}

impl FaultyCollection {
    pub fn new(inner: Arc<dyn DocumentCollection>) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Wrap a fresh in-memory collection.
    pub fn in_memory(name: &str) -> Self {
        Self::new(Arc::new(MemoryCollection::new(name)))
    }

    pub fn inner(&self) -> &Arc<dyn DocumentCollection> {
        &self.inner
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of calls made so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, flag: &AtomicBool, kind: &str) -> MirrorDbResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::Backend {
                reason: format!("injected {kind} failure"),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentCollection for FaultyCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn find_one(&self, key: &str) -> MirrorDbResult<Option<Entry>> {
        self.check(&self.fail_reads, "read")?;
        self.inner.find_one(key).await
    }

    async fn find_all(&self) -> MirrorDbResult<Vec<Entry>> {
        self.check(&self.fail_reads, "read")?;
        self.inner.find_all().await
    }

    async fn find_one_and_upsert(&self, key: &str, update: Update) -> MirrorDbResult<Entry> {
        self.check(&self.fail_writes, "write")?;
        self.inner.find_one_and_upsert(key, update).await
    }

    async fn delete_one(&self, key: &str) -> MirrorDbResult<u64> {
        self.check(&self.fail_writes, "write")?;
        self.inner.delete_one(key).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for mirrordb inputs.

    use super::*;
    use proptest::prelude::*;

    /// Non-empty record key.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,11}"
    }

    /// Small key space, so generated operations collide on the same records.
    pub fn arb_small_key() -> impl Strategy<Value = String> {
        "[a-d]"
    }

    /// Valid dotted path of one to three segments.
    pub fn arb_path() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-c]", 1..=3).prop_map(|segments| segments.join("."))
    }

    /// JSON scalar.
    pub fn arb_json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,12}".prop_map(Value::from),
        ]
    }

    /// Arbitrary JSON value, nested up to a few levels.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        arb_json_leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-c]", inner, 0..4)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    /// JSON object at the top level, the usual shape of a record value.
    pub fn arb_json_object() -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[a-c]", arb_json_value(), 0..4)
            .prop_map(|map| Value::Object(map.into_iter().collect()))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built stores and helpers for common testing scenarios.

    use super::*;
    use std::sync::Mutex;

    /// Lines captured by [`capturing_logger`].
    pub type LogLines = Arc<Mutex<Vec<String>>>;

    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs it.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Debug logger that records every line it receives.
    pub fn capturing_logger() -> (DebugLogger, LogLines) {
        let lines: LogLines = Arc::default();
        let sink = Arc::clone(&lines);
        let logger: DebugLogger = Arc::new(move |line: &str| {
            if let Ok(mut lines) = sink.lock() {
                lines.push(line.to_string());
            }
        });
        (logger, lines)
    }

    /// Options bound to a fresh, isolated in-memory connection.
    pub fn memory_options() -> DbOptions {
        DbOptions::default().with_connection(Connection::memory())
    }

    /// Uncached store over a fresh in-memory collection.
    pub fn memory_proxy() -> (StoreProxy, Arc<MemoryCollection>) {
        let collection = Arc::new(MemoryCollection::new("test"));
        (StoreProxy::new(collection.clone()), collection)
    }

    /// Cached store over a fresh in-memory collection.
    pub async fn memory_mirror() -> (MirrorCache, Arc<MemoryCollection>) {
        let collection = Arc::new(MemoryCollection::new("test"));
        let cache = MirrorCache::with_collection(collection.clone())
            .await
            .expect("empty in-memory collection should load");
        (cache, collection)
    }

    /// Cached store over a fault-injecting in-memory collection.
    pub async fn faulty_mirror() -> (MirrorCache, Arc<FaultyCollection>) {
        let collection = Arc::new(FaultyCollection::in_memory("faulty"));
        let cache = MirrorCache::with_collection(collection.clone())
            .await
            .expect("empty in-memory collection should load");
        (cache, collection)
    }

    /// Both variants over one shared collection.
    pub async fn shared_pair() -> (StoreProxy, MirrorCache, Arc<MemoryCollection>) {
        let collection = Arc::new(MemoryCollection::new("shared"));
        let proxy = StoreProxy::new(collection.clone());
        let cache = MirrorCache::with_collection(collection.clone())
            .await
            .expect("empty in-memory collection should load");
        (proxy, cache, collection)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for mirrordb results and mirror state.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &MirrorDbResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &MirrorDbResult<T>) {
        match result {
            Err(MirrorDbError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a result is an injected or real backend failure.
    #[track_caller]
    pub fn assert_backend_error<T: std::fmt::Debug>(result: &MirrorDbResult<T>) {
        match result {
            Err(MirrorDbError::Storage(StorageError::Backend { .. })) => {}
            other => panic!("Expected Backend error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_path_conflict<T: std::fmt::Debug>(result: &MirrorDbResult<T>) {
        match result {
            Err(MirrorDbError::Storage(StorageError::PathConflict { .. })) => {}
            other => panic!("Expected PathConflict error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &MirrorDbResult<T>) {
        match result {
            Err(MirrorDbError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that the mirror holds exactly what the backing collection holds.
    pub async fn assert_mirror_matches_store(cache: &MirrorCache) {
        let store = cache
            .proxy()
            .reduce()
            .await
            .expect("store reduce should succeed");
        assert_eq!(
            cache.reduce(),
            sort_entries(store),
            "mirror diverged from the backing store"
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_faulty_collection_injects_failures() {
        let collection = FaultyCollection::in_memory("c");
        collection
            .find_one_and_upsert("k", Update::set_value(json!(1)))
            .await
            .unwrap();

        collection.fail_writes(true);
        let result = collection
            .find_one_and_upsert("k", Update::set_value(json!(2)))
            .await;
        assertions::assert_backend_error(&result);
        assert!(collection.find_one("k").await.is_ok());

        collection.fail_reads(true);
        assertions::assert_backend_error(&collection.find_all().await);
        assert_eq!(collection.calls(), 4);
    }

    #[tokio::test]
    async fn test_capturing_logger_records_lines() {
        let (logger, lines) = fixtures::capturing_logger();
        let (proxy, _) = fixtures::memory_proxy();
        proxy.with_debug_logger(logger).save_log("hello", None);
        assert_eq!(*lines.lock().unwrap(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_memory_mirror_starts_empty() {
        let (cache, collection) = fixtures::memory_mirror().await;
        assert!(cache.is_empty());
        assert!(collection.is_empty());
        assertions::assert_mirror_matches_store(&cache).await;
    }

    #[tokio::test]
    async fn test_memory_options_are_isolated() {
        let first = StoreProxy::init(fixtures::memory_options()).await.unwrap();
        let second = StoreProxy::init(fixtures::memory_options()).await.unwrap();
        first.set("k", json!(1), false).await.unwrap();
        assert_eq!(second.get("k", None).await.unwrap(), None);
    }

    proptest! {
        #[test]
        fn test_generated_paths_parse(path in generators::arb_path()) {
            prop_assert!(FieldPath::parse(&path).is_ok());
        }

        #[test]
        fn test_generated_objects_are_objects(value in generators::arb_json_object()) {
            prop_assert!(value.is_object());
        }
    }
}
