//! mirrordb Storage - Store Proxy and Mirror Cache
//!
//! Key/value access (`db` -> `key` -> nested `value`) over a document
//! collection of `{key, value}` records, in two variants:
//!
//! - [`StoreProxy`]: every call is a round trip to the backing collection.
//! - [`MirrorCache`]: wraps a `StoreProxy` and keeps the whole collection in
//!   memory. Reads never touch the store; writes go to the store first and
//!   the mirror is updated with the value the store returned.
//!
//! Both implement [`KeyValueStore`]. Backends are selected by connection
//! string, see [`backend`].
//!
//! ```ignore
//! let cache = MirrorCache::init(DbOptions::from_connection_string("memory://")).await?;
//! cache.set("guild", json!({"prefix": "!"}), false).await?;
//! assert_eq!(cache.get("guild", Some("prefix")), Some(json!("!")));
//! ```

pub mod backend;
pub mod collection;
pub mod mirror;
pub mod options;
pub mod proxy;
pub mod store;

pub use backend::{Connection, LmdbCollection, LmdbDatabase, MemoryCollection, MemoryDatabase};
pub use collection::{DocumentCollection, Update, UpdateOp};
pub use mirror::MirrorCache;
pub use options::{default_debug_logger, DbOptions, DebugLogger};
pub use proxy::StoreProxy;
pub use store::KeyValueStore;
