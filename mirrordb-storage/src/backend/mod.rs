//! Backing collection implementations and connection handling.
//!
//! A [`Connection`] is opened once from a connection string and hands out
//! [`DocumentCollection`] handles by name. The scheme selects the backend:
//!
//! | scheme                          | backend                                 |
//! |---------------------------------|-----------------------------------------|
//! | `memory://[name]`               | [`MemoryDatabase`], process-local       |
//! | `lmdb://<dir>[?map_size_mb=N]`  | [`LmdbDatabase`], persistent via heed   |
//! | `mongodb://`, `mongodb+srv://`  | MongoDB (requires the `mongodb` feature) |
//!
//! Connections are cheap to clone. Stores built from clones of one
//! connection see the same data, which is how an already-open connection is
//! reused instead of dialing again.

pub mod lmdb;
pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;

use std::sync::Arc;

use mirrordb_core::{ConfigError, MirrorDbResult};

use crate::collection::DocumentCollection;

pub use lmdb::{
    map_size_bytes, LmdbCollection, LmdbCollectionError, LmdbDatabase, DEFAULT_MAP_SIZE_MB,
};
pub use memory::{MemoryCollection, MemoryDatabase};
#[cfg(feature = "mongodb")]
pub use mongo::MongoCollection;

/// An open connection to a backing document database.
#[derive(Debug, Clone)]
pub enum Connection {
    Memory(MemoryDatabase),
    Lmdb(LmdbDatabase),
    #[cfg(feature = "mongodb")]
    Mongo(mongodb::Database),
}

impl Connection {
    /// Open a connection from a connection string.
    pub async fn open(connection_string: &str) -> MirrorDbResult<Self> {
        let (scheme, rest) =
            connection_string
                .split_once("://")
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "connection_string".to_string(),
                    value: connection_string.to_string(),
                    reason: "expected <scheme>://...".to_string(),
                })?;

        match scheme {
            "memory" => Ok(Self::Memory(MemoryDatabase::new(rest))),
            "lmdb" => {
                let (path, map_size_mb) = parse_lmdb_target(rest)?;
                Ok(Self::Lmdb(LmdbDatabase::open(path, map_size_mb)?))
            }
            #[cfg(feature = "mongodb")]
            "mongodb" | "mongodb+srv" => Ok(Self::Mongo(mongo::connect(connection_string).await?)),
            other => Err(ConfigError::UnsupportedScheme {
                scheme: other.to_string(),
            }
            .into()),
        }
    }

    /// A fresh, unnamed in-memory connection.
    pub fn memory() -> Self {
        Self::Memory(MemoryDatabase::default())
    }

    /// Scheme this connection was opened with.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Lmdb(_) => "lmdb",
            #[cfg(feature = "mongodb")]
            Self::Mongo(_) => "mongodb",
        }
    }

    /// Get a handle to the collection called `name`.
    pub fn collection(&self, name: &str) -> MirrorDbResult<Arc<dyn DocumentCollection>> {
        let collection: Arc<dyn DocumentCollection> = match self {
            Self::Memory(db) => db.collection(name)?,
            Self::Lmdb(db) => Arc::new(db.collection(name)?),
            #[cfg(feature = "mongodb")]
            Self::Mongo(db) => Arc::new(mongo::MongoCollection::new(db, name)),
        };
        Ok(collection)
    }
}

/// Split `path[?map_size_mb=N]` into the directory and the map size.
fn parse_lmdb_target(target: &str) -> Result<(&str, usize), ConfigError> {
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };

    if path.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "connection_string".to_string(),
            value: format!("lmdb://{target}"),
            reason: "an LMDB directory is required".to_string(),
        });
    }

    let mut map_size_mb = DEFAULT_MAP_SIZE_MB;
    for pair in query.into_iter().flat_map(|q| q.split('&')) {
        match pair.split_once('=') {
            Some(("map_size_mb", raw)) => {
                map_size_mb = raw
                    .parse()
                    .ok()
                    .filter(|mb| *mb > 0 && map_size_bytes(*mb).is_some())
                    .ok_or_else(|| ConfigError::InvalidValue {
                        field: "map_size_mb".to_string(),
                        value: raw.to_string(),
                        reason: "expected a positive integer that fits in bytes".to_string(),
                    })?;
            }
            _ => {
                return Err(ConfigError::InvalidValue {
                    field: "connection_string".to_string(),
                    value: pair.to_string(),
                    reason: "unknown LMDB option".to_string(),
                })
            }
        }
    }

    Ok((path, map_size_mb))
}
