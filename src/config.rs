//! Configuration for the AWARE messages sensor.
//!
//! A [`Config`] describes one sensor instance: who the device is, how
//! records are labelled, and where they are stored. The live configuration
//! is held in a [`ConfigSlot`], which the sensor host and the running
//! service share.

use crate::sensor::MessageObserver;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Default database name, relative to [`Config::data_path`].
pub const DEFAULT_DB_PATH: &str = "aware_messages";

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbType {
    /// Records are not persisted.
    None,
    /// SQLite database file.
    #[default]
    Sqlite,
    /// One JSON-lines file per table.
    Json,
}

impl DbType {
    /// Parse a backend name as accepted on the command line.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Some(DbType::None),
            "sqlite" | "room" => Some(DbType::Sqlite),
            "json" | "jsonl" => Some(DbType::Json),
            _ => None,
        }
    }
}

impl std::fmt::Display for DbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbType::None => write!(f, "none"),
            DbType::Sqlite => write!(f, "sqlite"),
            DbType::Json => write!(f, "json"),
        }
    }
}

/// Sensor configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Whether the sensor should run when a generic "sensors enabled" signal arrives
    pub enabled: bool,

    /// Emit debug-level logs
    pub debug: bool,

    /// Label copied onto every record
    pub label: String,

    /// Device identifier copied onto every record
    pub device_id: String,

    /// Storage backend
    pub db_type: DbType,

    /// Database name or path (relative paths resolve against `data_path`)
    pub db_path: String,

    /// Remote host that `sync` uploads to
    pub db_host: Option<String>,

    /// Directory for databases and statistics
    pub data_path: PathBuf,

    /// Callback invoked for every recorded message event
    #[serde(skip)]
    pub sensor_observer: Option<Arc<dyn MessageObserver>>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("aware-messages");

        Self {
            enabled: false,
            debug: false,
            label: String::new(),
            device_id: uuid::Uuid::new_v4().to_string(),
            db_type: DbType::default(),
            db_path: DEFAULT_DB_PATH.to_string(),
            db_host: None,
            data_path: data_dir,
            sensor_observer: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("enabled", &self.enabled)
            .field("debug", &self.debug)
            .field("label", &self.label)
            .field("device_id", &self.device_id)
            .field("db_type", &self.db_type)
            .field("db_path", &self.db_path)
            .field("db_host", &self.db_host)
            .field("data_path", &self.data_path)
            .field("sensor_observer", &self.sensor_observer.is_some())
            .finish()
    }
}

impl Config {
    /// Overlay every field of `config` onto this one, observer included.
    pub fn replace_with(&mut self, config: Config) {
        *self = config;
    }

    /// Set the observer callback.
    pub fn with_observer(mut self, observer: impl MessageObserver + 'static) -> Self {
        self.sensor_observer = Some(Arc::new(observer));
        self
    }

    /// Resolve the database location for the configured backend.
    pub fn database_path(&self) -> PathBuf {
        self.data_path.join(&self.db_path)
    }

    /// SQLite file for the configured location; `.db` is added only when
    /// `db_path` has no extension of its own.
    pub fn sqlite_path(&self) -> PathBuf {
        let location = self.database_path();
        if location.extension().is_some() {
            location
        } else {
            location.with_extension("db")
        }
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`. The observer is not persisted.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("aware-messages")
            .join("config.json")
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }
}

/// The single live configuration shared by a sensor host and its service.
///
/// Clones share the same slot. Access is scoped: callers get a reference for
/// the duration of a closure and never hold the lock across callbacks.
#[derive(Clone, Default)]
pub struct ConfigSlot {
    inner: Arc<RwLock<Config>>,
}

impl ConfigSlot {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Run `f` with shared access to the live configuration.
    pub fn read<R>(&self, f: impl FnOnce(&Config) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Run `f` with exclusive access to the live configuration.
    pub fn write<R>(&self, f: impl FnOnce(&mut Config) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Replace the live configuration wholesale.
    pub fn replace_with(&self, config: Config) {
        self.write(|live| live.replace_with(config));
    }

    /// Clone the live configuration.
    pub fn snapshot(&self) -> Config {
        self.read(Config::clone)
    }

    /// Whether two handles point at the same slot.
    pub fn same_slot(&self, other: &ConfigSlot) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ConfigSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.read(|config| f.debug_tuple("ConfigSlot").field(config).finish())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
