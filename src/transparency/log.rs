//! Privacy-preserving transparency log.
//!
//! Counts what the sensor has observed and stored without keeping any
//! message content, addresses or timestamps of individual events.

use crate::model::MessageKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Transparency statistics for the current session.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Inbox events observed
    messages_received: AtomicU64,
    /// Sent events observed
    messages_sent: AtomicU64,
    /// Events with any other type code
    messages_unclassified: AtomicU64,
    /// Records handed to the storage engine successfully
    records_stored: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_unclassified: AtomicU64::new(0),
            records_stored: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a transparency log backed by `path`, loading previous totals.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("Could not load previous transparency stats: {e}");
        }

        log
    }

    /// Record one observed message event.
    pub fn record_message(&self, kind: MessageKind) {
        let counter = match kind {
            MessageKind::Inbox => &self.messages_received,
            MessageKind::Sent => &self.messages_sent,
            MessageKind::Other(_) => &self.messages_unclassified,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self) {
        self.records_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_unclassified: self.messages_unclassified.load(Ordering::Relaxed),
            records_stored: self.records_stored.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Messages received: {}\n\
             - Messages sent: {}\n\
             - Other message events: {}\n\
             - Records stored: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Privacy Guarantee:\n\
             - No message bodies captured\n\
             - Only type, timestamp and address of each event retained",
            stats.messages_received,
            stats.messages_sent,
            stats.messages_unclassified,
            stats.records_stored,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk. No-op without a persistence path.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                messages_received: stats.messages_received,
                messages_sent: stats.messages_sent,
                messages_unclassified: stats.messages_unclassified,
                records_stored: stats.records_stored,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.messages_received
                    .store(persisted.messages_received, Ordering::Relaxed);
                self.messages_sent
                    .store(persisted.messages_sent, Ordering::Relaxed);
                self.messages_unclassified
                    .store(persisted.messages_unclassified, Ordering::Relaxed);
                self.records_stored
                    .store(persisted.records_stored, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.messages_received.store(0, Ordering::Relaxed);
        self.messages_sent.store(0, Ordering::Relaxed);
        self.messages_unclassified.store(0, Ordering::Relaxed);
        self.records_stored.store(0, Ordering::Relaxed);
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of transparency statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub messages_received: u64,
    pub messages_sent: u64,
    pub messages_unclassified: u64,
    pub records_stored: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    messages_received: u64,
    messages_sent: u64,
    #[serde(default)]
    messages_unclassified: u64,
    records_stored: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
