//! Store options: serializable [`DbConfig`] plus the runtime-only pieces.

use std::fmt;
use std::sync::Arc;

use mirrordb_core::DbConfig;

use crate::backend::Connection;

/// Sink for the store's debug log lines.
pub type DebugLogger = Arc<dyn Fn(&str) + Send + Sync>;

/// Logger that forwards every line to `tracing` at debug level.
pub fn default_debug_logger(collection: &str) -> DebugLogger {
    let collection = collection.to_string();
    Arc::new(move |line: &str| {
        tracing::debug!(target: "mirrordb", collection = %collection, "{line}");
    })
}

/// Everything needed to initialize a store.
///
/// When a [`Connection`] is supplied it is reused and the connection string
/// is ignored; otherwise one is opened from `config.connection_string`.
#[derive(Clone, Default)]
pub struct DbOptions {
    pub config: DbConfig,
    debug_logger: Option<DebugLogger>,
    connection: Option<Connection>,
}

impl DbOptions {
    pub fn new(config: DbConfig) -> Self {
        Self {
            config,
            debug_logger: None,
            connection: None,
        }
    }

    /// Options that open `connection_string` with default settings.
    pub fn from_connection_string(connection_string: impl Into<String>) -> Self {
        Self::new(DbConfig::new(connection_string))
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.config.collection = collection.into();
        self
    }

    /// Longest compact JSON rendering still appended to log lines; `0`
    /// disables value logging.
    pub fn with_value_logging_max_length(mut self, max: usize) -> Self {
        self.config.value_logging_max_length = max;
        self
    }

    pub fn with_debug_logger(mut self, logger: DebugLogger) -> Self {
        self.debug_logger = Some(logger);
        self
    }

    /// Reuse an already-open connection.
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn has_debug_logger(&self) -> bool {
        self.debug_logger.is_some()
    }

    pub(crate) fn into_parts(self) -> (DbConfig, Option<DebugLogger>, Option<Connection>) {
        (self.config, self.debug_logger, self.connection)
    }
}

impl fmt::Debug for DbOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbOptions")
            .field("config", &self.config)
            .field("debug_logger", &self.debug_logger.as_ref().map(|_| "<fn>"))
            .field("connection", &self.connection)
            .finish()
    }
}

impl From<DbConfig> for DbOptions {
    fn from(config: DbConfig) -> Self {
        Self::new(config)
    }
}
