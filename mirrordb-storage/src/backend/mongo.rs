//! MongoDB-backed document collections.
//!
//! Enabled with the `mongodb` feature. The update model maps one-to-one onto
//! MongoDB update operators against the `value` field, and every write goes
//! through `findOneAndUpdate` with `upsert` and return-after, so atomicity is
//! whatever the server guarantees for a single-document update.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use mirrordb_core::{ConfigError, Entry, MirrorDbError, MirrorDbResult, StorageError, Value};
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::{Client, Collection, Database};

use crate::collection::{DocumentCollection, Update, UpdateOp};

/// Database used when the connection string does not name one.
pub const DEFAULT_DATABASE: &str = "mirrordb";

fn backend_err(e: mongodb::error::Error) -> MirrorDbError {
    tracing::warn!(error = %e, "MongoDB operation failed");
    MirrorDbError::Storage(StorageError::Backend {
        reason: e.to_string(),
    })
}

/// Connect and resolve the database named in the connection string.
pub async fn connect(connection_string: &str) -> MirrorDbResult<Database> {
    let client = Client::with_uri_str(connection_string)
        .await
        .map_err(|e| ConfigError::InvalidValue {
            field: "connection_string".to_string(),
            value: connection_string.to_string(),
            reason: e.to_string(),
        })?;

    let database = client
        .default_database()
        .unwrap_or_else(|| client.database(DEFAULT_DATABASE));
    tracing::info!(database = %database.name(), "connected to MongoDB");
    Ok(database)
}

/// A `{key, value}` collection stored in MongoDB.
#[derive(Debug, Clone)]
pub struct MongoCollection {
    inner: Collection<Document>,
    name: String,
}

impl MongoCollection {
    pub fn new(database: &Database, name: &str) -> Self {
        Self {
            inner: database.collection::<Document>(name),
            name: name.to_string(),
        }
    }

    fn to_bson(value: &Value) -> MirrorDbResult<Bson> {
        mongodb::bson::to_bson(value).map_err(|e| {
            StorageError::Serialization {
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn values_to_bson(values: &[Value]) -> MirrorDbResult<Bson> {
        values
            .iter()
            .map(Self::to_bson)
            .collect::<MirrorDbResult<Vec<_>>>()
            .map(Bson::Array)
    }

    fn update_document(key: &str, update: &Update) -> MirrorDbResult<Document> {
        let (operator, field, operand) = match &update.op {
            UpdateOp::SetValue(value) => ("$set", "value".to_string(), Self::to_bson(value)?),
            UpdateOp::Set { path, value } => ("$set", format!("value.{path}"), Self::to_bson(value)?),
            UpdateOp::Unset { path } => ("$unset", format!("value.{path}"), Bson::String(String::new())),
            UpdateOp::Push { path, values } => {
                let each = Self::values_to_bson(values)?;
                ("$push", format!("value.{path}"), Bson::Document(doc! { "$each": each }))
            }
            UpdateOp::AddToSet { path, values } => {
                let each = Self::values_to_bson(values)?;
                ("$addToSet", format!("value.{path}"), Bson::Document(doc! { "$each": each }))
            }
        };

        let mut fields = Document::new();
        fields.insert(field, operand);

        let mut document = Document::new();
        document.insert(operator, fields);
        if update.set_key_on_insert {
            document.insert("$setOnInsert", doc! { "key": key });
        }
        Ok(document)
    }

    fn to_entry(document: Document) -> MirrorDbResult<Entry> {
        let key = document
            .get_str("key")
            .map_err(|e| StorageError::Serialization {
                reason: e.to_string(),
            })?
            .to_string();
        let value = document.get("value").cloned().map(Bson::into_relaxed_extjson);
        Ok(Entry::new(key, value))
    }
}

#[async_trait]
impl DocumentCollection for MongoCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, key: &str) -> MirrorDbResult<Option<Entry>> {
        self.inner
            .find_one(doc! { "key": key }, None)
            .await
            .map_err(backend_err)?
            .map(Self::to_entry)
            .transpose()
    }

    async fn find_all(&self) -> MirrorDbResult<Vec<Entry>> {
        let options = FindOptions::builder()
            .projection(doc! { "key": 1, "value": 1, "_id": 0 })
            .build();
        let mut cursor = self.inner.find(None, options).await.map_err(backend_err)?;

        let mut entries = Vec::new();
        while let Some(document) = cursor.try_next().await.map_err(backend_err)? {
            entries.push(Self::to_entry(document)?);
        }
        Ok(entries)
    }

    async fn find_one_and_upsert(&self, key: &str, update: Update) -> MirrorDbResult<Entry> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let update = Self::update_document(key, &update)?;

        let document = self
            .inner
            .find_one_and_update(doc! { "key": key }, update, options)
            .await
            .map_err(backend_err)?
            .ok_or_else(|| StorageError::Backend {
                reason: format!("upsert of '{key}' returned no document"),
            })?;
        Self::to_entry(document)
    }

    async fn delete_one(&self, key: &str) -> MirrorDbResult<u64> {
        let result = self
            .inner
            .delete_one(doc! { "key": key }, None)
            .await
            .map_err(backend_err)?;
        Ok(result.deleted_count)
    }
}
