//! In-memory document collections.
//!
//! Process-local stand-in for a document database, opened with a
//! `memory://` connection string. Collections obtained from the same
//! [`MemoryDatabase`] by the same name share their records, so several
//! stores can observe each other's writes the way they would against a real
//! server.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use mirrordb_core::{Entry, MirrorDbResult, StorageError, Value};

use crate::collection::{DocumentCollection, Update};

/// A named set of in-memory collections.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    name: String,
    collections: Arc<RwLock<HashMap<String, Arc<MemoryCollection>>>>,
}

impl MemoryDatabase {
    /// Create a new, empty database.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: Arc::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the collection called `name`, creating it on first use.
    pub fn collection(&self, name: &str) -> MirrorDbResult<Arc<MemoryCollection>> {
        if let Some(existing) = self
            .collections
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .get(name)
        {
            return Ok(Arc::clone(existing));
        }

        let mut collections = self
            .collections
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let collection = collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCollection::new(name)));
        Ok(Arc::clone(collection))
    }

    /// Names of all collections created so far.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

/// In-memory collection of `{key, value}` records.
///
/// Each upsert runs under the collection's write lock and is applied to a
/// copy of the record, so a rejected update leaves the record untouched.
#[derive(Debug, Default)]
pub struct MemoryCollection {
    name: String,
    records: RwLock<BTreeMap<String, Option<Value>>>,
}

impl MemoryCollection {
    /// Create a standalone collection not attached to any database.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every record.
    pub fn clear(&self) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, key: &str) -> MirrorDbResult<Option<Entry>> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(records
            .get(key)
            .map(|value| Entry::new(key, value.clone())))
    }

    async fn find_all(&self) -> MirrorDbResult<Vec<Entry>> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(records
            .iter()
            .map(|(key, value)| Entry::new(key.clone(), value.clone()))
            .collect())
    }

    async fn find_one_and_upsert(&self, key: &str, update: Update) -> MirrorDbResult<Entry> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;

        let mut value = records.get(key).cloned().flatten();
        update.apply(&mut value)?;
        records.insert(key.to_string(), value.clone());

        Ok(Entry::new(key, value))
    }

    async fn delete_one(&self, key: &str) -> MirrorDbResult<u64> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(u64::from(records.remove(key).is_some()))
    }
}
