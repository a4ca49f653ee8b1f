//! Backing collection trait and its update model.
//!
//! A collection holds `{key, value}` records, one per logical database. This
//! module defines the narrow capability the store proxy needs from a
//! document database: find one, find all, an atomic upserting
//! find-one-and-update that returns the post-write record, and delete one.
//!
//! The update model mirrors the document-database operators the proxy
//! relies on (`$set`, `$unset`, `$push`, `$addToSet`, `$setOnInsert`).
//! Backends without a native query language apply it with
//! [`Update::apply`].

use async_trait::async_trait;
use mirrordb_core::{
    add_to_set_at, push_at, set_at, unset_at, Entry, FieldPath, MirrorDbResult, StorageError,
    Value,
};

/// A single update operator applied to a record's `value`.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Replace the whole value.
    SetValue(Value),
    /// Set the nested field at `path`.
    Set { path: FieldPath, value: Value },
    /// Remove the nested field at `path`.
    Unset { path: FieldPath },
    /// Append every value to the array at `path`.
    Push { path: FieldPath, values: Vec<Value> },
    /// Append each value not already present in the array at `path`.
    AddToSet { path: FieldPath, values: Vec<Value> },
}

/// An upserting update: one operator, plus whether the record key should be
/// written explicitly when the record is created.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub op: UpdateOp,
    pub set_key_on_insert: bool,
}

impl Update {
    pub fn new(op: UpdateOp) -> Self {
        Self {
            op,
            set_key_on_insert: false,
        }
    }

    pub fn set_value(value: Value) -> Self {
        Self::new(UpdateOp::SetValue(value))
    }

    pub fn set(path: FieldPath, value: Value) -> Self {
        Self::new(UpdateOp::Set { path, value })
    }

    pub fn unset(path: FieldPath) -> Self {
        Self::new(UpdateOp::Unset { path })
    }

    pub fn push(path: FieldPath, values: Vec<Value>) -> Self {
        Self::new(UpdateOp::Push { path, values })
    }

    pub fn add_to_set(path: FieldPath, values: Vec<Value>) -> Self {
        Self::new(UpdateOp::AddToSet { path, values })
    }

    /// Also write the record key when the update inserts a new record.
    pub fn with_key_on_insert(mut self) -> Self {
        self.set_key_on_insert = true;
        self
    }

    /// Apply this update to a record value in place.
    ///
    /// On error the value may be partially modified; callers apply to a copy
    /// and only commit on success.
    pub fn apply(self, value: &mut Option<Value>) -> Result<(), StorageError> {
        match self.op {
            UpdateOp::SetValue(v) => {
                *value = Some(v);
                Ok(())
            }
            UpdateOp::Set { path, value: v } => set_at(value, &path, v),
            UpdateOp::Unset { path } => {
                unset_at(value, &path);
                Ok(())
            }
            UpdateOp::Push { path, values } => push_at(value, &path, values),
            UpdateOp::AddToSet { path, values } => add_to_set_at(value, &path, values),
        }
    }
}

/// A single logical collection of `{key, value}` records.
///
/// Implementations must make [`DocumentCollection::find_one_and_upsert`]
/// atomic per record: the returned entry is exactly what was persisted.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    /// Name of the collection inside its database.
    fn name(&self) -> &str;

    /// Find the record stored under `key`.
    async fn find_one(&self, key: &str) -> MirrorDbResult<Option<Entry>>;

    /// Return every record in the collection.
    async fn find_all(&self) -> MirrorDbResult<Vec<Entry>>;

    /// Apply `update` to the record under `key`, creating it if absent, and
    /// return the record as it is after the write.
    async fn find_one_and_upsert(&self, key: &str, update: Update) -> MirrorDbResult<Entry>;

    /// Delete the record under `key`, returning the number of records removed.
    async fn delete_one(&self, key: &str) -> MirrorDbResult<u64>;
}
