//! Database engines for message records.
//!
//! The sensor talks to storage through the [`Engine`] trait. Which engine
//! backs it is chosen by [`Config::db_type`]:
//! - `Sqlite`: [`SqliteEngine`], one table per record type, with sync bookkeeping
//! - `Json`: [`JsonEngine`], one JSON-lines file per table
//! - `None`: no engine; records are only handed to the observer

pub mod json;
pub mod sqlite;

#[cfg(feature = "sync")]
pub mod sync;

pub use json::JsonEngine;
pub use sqlite::SqliteEngine;

use crate::config::{Config, DbType};
use crate::model::MessageData;
use std::sync::Arc;
use thiserror::Error;

/// Storage capability the sensor depends on.
pub trait Engine: Send {
    /// Persist one record under `table`.
    fn save(&mut self, data: &MessageData, table: &str) -> Result<(), StorageError>;

    /// Upload pending records of `table` to the configured host.
    /// Returns the number of records uploaded.
    fn start_sync(&mut self, table: &str) -> Result<usize, StorageError>;

    /// All records stored under `table`, oldest first.
    fn records(&mut self, table: &str) -> Result<Vec<MessageData>, StorageError>;

    /// Release the underlying resources. Later calls fail with [`StorageError::Closed`].
    fn close(&mut self) -> Result<(), StorageError>;
}

/// Opens the engine for a configuration. `Ok(None)` means "no engine".
pub type EngineFactory =
    Arc<dyn Fn(&Config) -> Result<Option<Box<dyn Engine>>, StorageError> + Send + Sync>;

/// Open the engine selected by `config.db_type`.
pub fn open_engine(config: &Config) -> Result<Option<Box<dyn Engine>>, StorageError> {
    let host = config.db_host.clone();

    Ok(match config.db_type {
        DbType::None => None,
        DbType::Sqlite => Some(Box::new(SqliteEngine::open(config.sqlite_path(), host)?)),
        DbType::Json => Some(Box::new(JsonEngine::open(config.database_path(), host)?)),
    })
}

/// The factory backed by [`open_engine`].
pub fn default_engine_factory() -> EngineFactory {
    Arc::new(open_engine)
}

/// Reject table names that cannot be used as a bare SQL identifier or file name.
pub(crate) fn validate_table(table: &str) -> Result<(), StorageError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidTable(table.to_string()))
    }
}

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    #[error("Engine is closed")]
    Closed,

    #[error("Sync is not supported by the {0} engine")]
    SyncUnsupported(&'static str),

    #[cfg(feature = "sync")]
    #[error(transparent)]
    Sync(#[from] sync::SyncError),
}
