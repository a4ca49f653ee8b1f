//! LMDB-backed document collections.
//!
//! Uses the heed crate (Rust bindings for LMDB) to persist collections in a
//! memory-mapped environment opened with an `lmdb://<dir>` connection string.
//!
//! # Layout
//!
//! Each collection is a named LMDB database inside one environment. Records
//! are keyed by their string key; the stored bytes are
//! `[tag: 1 byte][json value]` where tag `0` marks a record without a value
//! (and carries no payload) and tag `1` is followed by the JSON encoding of
//! the value. The tag keeps "no value" distinct from a stored JSON `null`.
//!
//! # Atomicity
//!
//! Every upsert is a read-modify-write inside a single LMDB write
//! transaction. LMDB serializes writers, so concurrent upserts to the same
//! key never interleave. A rejected update aborts the transaction.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use mirrordb_core::{Entry, MirrorDbError, StorageError, MirrorDbResult, Value};

use crate::collection::{DocumentCollection, Update};

/// Default map size for new environments.
pub const DEFAULT_MAP_SIZE_MB: usize = 256;

/// Map size in bytes for `mb` megabytes, or `None` if it does not fit in `usize`.
pub fn map_size_bytes(mb: usize) -> Option<usize> {
    mb.checked_mul(1024 * 1024)
}

/// Maximum number of collections per environment.
const MAX_COLLECTIONS: u32 = 128;

const TAG_NO_VALUE: u8 = 0;
const TAG_VALUE: u8 = 1;

/// Error type for LMDB collection operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCollectionError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored bytes could not be decoded.
    #[error("Corrupt record '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCollectionError> for MirrorDbError {
    fn from(e: LmdbCollectionError) -> Self {
        MirrorDbError::Storage(StorageError::Backend {
            reason: e.to_string(),
        })
    }
}

fn txn_err(e: heed::Error) -> LmdbCollectionError {
    LmdbCollectionError::Transaction(e.to_string())
}

/// An open LMDB environment holding any number of collections.
#[derive(Clone)]
pub struct LmdbDatabase {
    env: Env,
    path: PathBuf,
}

impl fmt::Debug for LmdbDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LmdbDatabase")
            .field("path", &self.path)
            .finish()
    }
}

impl LmdbDatabase {
    /// Open (or create) an LMDB environment.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the environment in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCollectionError> {
        let map_size = map_size_bytes(max_size_mb).ok_or_else(|| {
            LmdbCollectionError::EnvOpen(format!("map size of {max_size_mb} MB is too large"))
        })?;
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per connection and the
        // memory map is never modified outside of heed transactions.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(MAX_COLLECTIONS)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCollectionError::EnvOpen(e.to_string()))?;

        tracing::info!(path = %path.as_ref().display(), max_size_mb, "opened LMDB environment");

        Ok(Self {
            env,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the collection called `name`, creating it if needed.
    pub fn collection(&self, name: &str) -> Result<LmdbCollection, LmdbCollectionError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let db: Database<Str, Bytes> = self
            .env
            .create_database(&mut wtxn, Some(name))
            .map_err(|e| LmdbCollectionError::DbOpen(e.to_string()))?;

        wtxn.commit().map_err(txn_err)?;

        Ok(LmdbCollection {
            env: self.env.clone(),
            db,
            name: name.to_string(),
        })
    }
}

/// A persistent collection of `{key, value}` records.
pub struct LmdbCollection {
    env: Env,
    db: Database<Str, Bytes>,
    name: String,
}

impl LmdbCollection {
    fn decode(key: &str, bytes: &[u8]) -> Result<Option<Value>, LmdbCollectionError> {
        match bytes.split_first() {
            Some((&TAG_NO_VALUE, _)) => Ok(None),
            Some((&TAG_VALUE, json)) => {
                serde_json::from_slice(json)
                    .map(Some)
                    .map_err(|e| LmdbCollectionError::Corrupt {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })
            }
            Some((tag, _)) => Err(LmdbCollectionError::Corrupt {
                key: key.to_string(),
                reason: format!("unknown tag {tag}"),
            }),
            None => Err(LmdbCollectionError::Corrupt {
                key: key.to_string(),
                reason: "empty record".to_string(),
            }),
        }
    }

    fn encode(value: &Option<Value>) -> MirrorDbResult<Vec<u8>> {
        match value {
            None => Ok(vec![TAG_NO_VALUE]),
            Some(v) => {
                let json = serde_json::to_vec(v)?;
                let mut bytes = Vec::with_capacity(json.len() + 1);
                bytes.push(TAG_VALUE);
                bytes.extend_from_slice(&json);
                Ok(bytes)
            }
        }
    }
}

#[async_trait]
impl DocumentCollection for LmdbCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, key: &str) -> MirrorDbResult<Option<Entry>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;

        match self.db.get(&rtxn, key).map_err(txn_err)? {
            Some(bytes) => Ok(Some(Entry::new(key, Self::decode(key, bytes)?))),
            None => Ok(None),
        }
    }

    async fn find_all(&self) -> MirrorDbResult<Vec<Entry>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;

        let mut entries = Vec::new();
        for result in self.db.iter(&rtxn).map_err(txn_err)? {
            let (key, bytes) = result.map_err(txn_err)?;
            entries.push(Entry::new(key, Self::decode(key, bytes)?));
        }

        Ok(entries)
    }

    async fn find_one_and_upsert(&self, key: &str, update: Update) -> MirrorDbResult<Entry> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let mut value = match self.db.get(&wtxn, key).map_err(txn_err)? {
            Some(bytes) => Self::decode(key, bytes)?,
            None => None,
        };

        // Dropping the transaction on error aborts it.
        update.apply(&mut value)?;

        let bytes = Self::encode(&value)?;
        self.db.put(&mut wtxn, key, &bytes).map_err(txn_err)?;
        wtxn.commit().map_err(|e| {
            tracing::warn!(collection = %self.name, key, error = %e, "LMDB commit failed");
            txn_err(e)
        })?;

        Ok(Entry::new(key, value))
    }

    async fn delete_one(&self, key: &str) -> MirrorDbResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let deleted = self.db.delete(&mut wtxn, key).map_err(txn_err)?;

        wtxn.commit().map_err(txn_err)?;

        Ok(u64::from(deleted))
    }
}
