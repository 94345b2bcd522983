//! Message provider backed by an exported Android SMS database.
//!
//! Reads the `sms` table of an `mmssms.db` copy (columns `_id`, `type`,
//! `date`, `address`). While at least one observer is registered a
//! background thread polls the file and notifies observers after every
//! commit made by another connection.

use crate::platform::permissions::{Permission, PermissionChecker};
use crate::platform::provider::{
    ChangeCallback, MessageProvider, ObserverId, ObserverRegistry, ProviderError, ProviderRow,
    MESSAGES_CONTENT_URI,
};
use crate::sensor::TAG;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default interval between change checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

struct Watcher {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Watcher {
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            // The thread exits within one poll interval
            let _ = handle.join();
        }
    }
}

/// Provider over an `mmssms.db` file.
pub struct SmsDatabaseProvider {
    path: PathBuf,
    poll_interval: Duration,
    observers: Arc<ObserverRegistry>,
    watcher: Mutex<Option<Watcher>>,
}

impl SmsDatabaseProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_poll_interval(path, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
            observers: Arc::new(ObserverRegistry::new()),
            watcher: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Whether the background watcher thread is running.
    pub fn is_watching(&self) -> bool {
        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|w| w.running.load(Ordering::SeqCst))
    }

    fn ensure_watcher(&self) -> Result<(), ProviderError> {
        let mut slot = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }

        let running = Arc::new(AtomicBool::new(true));
        let path = self.path.clone();
        let interval = self.poll_interval;
        let observers = self.observers.clone();
        let flag = running.clone();

        // Baseline is taken before the thread starts so rows written right
        // after registration are reported
        let mut detector = ChangeDetector::new(path);
        if let Err(e) = detector.poll() {
            tracing::warn!(target: TAG, "Could not read SMS database {:?}: {e}", detector.path);
        }

        let handle = thread::Builder::new()
            .name("sms-db-watcher".into())
            .spawn(move || watch_loop(detector, interval, &observers, &flag))?;

        *slot = Some(Watcher {
            running,
            handle: Some(handle),
        });
        Ok(())
    }

    fn stop_watcher(&self) {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut watcher) = watcher {
            watcher.stop();
        }
    }
}

impl MessageProvider for SmsDatabaseProvider {
    fn query_latest(&self) -> Result<Option<ProviderRow>, ProviderError> {
        let conn = open_read_only(&self.path)?;
        let row = conn
            .query_row(
                "SELECT type, date, address FROM sms ORDER BY date DESC LIMIT 1",
                [],
                |row| {
                    Ok(ProviderRow {
                        message_type: row.get(0)?,
                        date: row.get(1)?,
                        address: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn register_observer(
        &self,
        uri: &str,
        notify_for_descendants: bool,
        callback: ChangeCallback,
    ) -> Result<ObserverId, ProviderError> {
        if !uri.starts_with(MESSAGES_CONTENT_URI) {
            return Err(ProviderError::UnknownUri(uri.to_string()));
        }
        let id = self
            .observers
            .register(uri, notify_for_descendants, callback);
        if let Err(e) = self.ensure_watcher() {
            self.observers.unregister(id);
            return Err(e);
        }
        Ok(id)
    }

    fn unregister_observer(&self, id: ObserverId) -> bool {
        let removed = self.observers.unregister(id);
        if self.observers.is_empty() {
            self.stop_watcher();
        }
        removed
    }
}

impl Drop for SmsDatabaseProvider {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

fn open_read_only(path: &Path) -> Result<Connection, rusqlite::Error> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

fn max_message_id(path: &Path) -> Result<i64, rusqlite::Error> {
    let conn = open_read_only(path)?;
    conn.query_row("SELECT COALESCE(MAX(_id), 0) FROM sms", [], |row| row.get(0))
}

/// Detects commits to the message store made by other connections.
///
/// `PRAGMA data_version` changes on every commit from another connection,
/// so updates in place (outbox row turning into a sent row) are seen as
/// well as inserts. Values are only comparable on the same connection.
struct ChangeDetector {
    path: PathBuf,
    conn: Option<Connection>,
    last_version: Option<i64>,
}

impl ChangeDetector {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            conn: None,
            last_version: None,
        }
    }

    /// Whether the database changed since the previous poll. The first
    /// successful poll after (re)opening only records a baseline.
    fn poll(&mut self) -> Result<bool, rusqlite::Error> {
        match self.read_version() {
            Ok(version) => Ok(self
                .last_version
                .replace(version)
                .is_some_and(|previous| previous != version)),
            Err(e) => {
                // Reopen next time; a new connection needs a new baseline
                self.conn = None;
                self.last_version = None;
                Err(e)
            }
        }
    }

    fn read_version(&mut self) -> Result<i64, rusqlite::Error> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => open_read_only(&self.path)?,
        };
        let version = conn.query_row("PRAGMA data_version", [], |row| row.get(0));
        self.conn = Some(conn);
        version
    }
}

fn watch_loop(
    mut detector: ChangeDetector,
    interval: Duration,
    observers: &ObserverRegistry,
    running: &AtomicBool,
) {
    while running.load(Ordering::SeqCst) {
        thread::sleep(interval);
        if !running.load(Ordering::SeqCst) {
            break;
        }

        match detector.poll() {
            Ok(true) => {
                observers.notify(MESSAGES_CONTENT_URI, false);
            }
            Ok(false) => {}
            Err(e) => tracing::debug!(target: TAG, "SMS database poll failed: {e}"),
        }
    }
}

/// Permission view of a desktop host reading an SMS database copy.
///
/// SMS access is granted when the file can be opened; contacts access has
/// no desktop counterpart and is always granted.
#[derive(Debug, Clone)]
pub struct SmsDatabasePermissions {
    path: PathBuf,
}

impl SmsDatabasePermissions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PermissionChecker for SmsDatabasePermissions {
    fn is_granted(&self, permission: Permission) -> bool {
        match permission {
            Permission::ReadContacts => true,
            Permission::ReadSms => max_message_id(&self.path).is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use rusqlite::params;

    fn create_sms_db(path: &Path) -> Connection {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE sms (
                _id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT,
                date INTEGER,
                type INTEGER,
                body TEXT
            );",
        )
        .unwrap();
        conn
    }

    fn insert(conn: &Connection, address: Option<&str>, date: i64, message_type: i32) {
        conn.execute(
            "INSERT INTO sms (address, date, type, body) VALUES (?1, ?2, ?3, 'hidden')",
            params![address, date, message_type],
        )
        .unwrap();
    }

    #[test]
    fn test_query_latest_orders_by_date() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mmssms.db");
        let conn = create_sms_db(&path);
        insert(&conn, Some("+100"), 2_000, 1);
        insert(&conn, Some("+200"), 1_000, 2);

        let provider = SmsDatabaseProvider::new(&path);
        let latest = provider.query_latest().unwrap().unwrap();
        assert_eq!(
            latest,
            ProviderRow {
                message_type: 1,
                date: 2_000,
                address: Some("+100".into()),
            }
        );
    }

    #[test]
    fn test_query_latest_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mmssms.db");
        create_sms_db(&path);

        let provider = SmsDatabaseProvider::new(&path);
        assert_eq!(provider.query_latest().unwrap(), None);
    }

    #[test]
    fn test_null_address() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mmssms.db");
        let conn = create_sms_db(&path);
        insert(&conn, None, 5, 3);

        let provider = SmsDatabaseProvider::new(&path);
        let latest = provider.query_latest().unwrap().unwrap();
        assert_eq!(latest.address, None);
        assert_eq!(latest.message_type, 3);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SmsDatabaseProvider::new(dir.path().join("absent.db"));
        assert!(provider.query_latest().is_err());
    }

    #[test]
    fn test_watcher_notifies_on_new_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mmssms.db");
        let conn = create_sms_db(&path);
        insert(&conn, Some("+100"), 1_000, 1);

        let provider = SmsDatabaseProvider::with_poll_interval(&path, Duration::from_millis(20));
        let (tx, rx) = unbounded();
        let id = provider
            .register_observer(
                MESSAGES_CONTENT_URI,
                true,
                Arc::new(move |self_change| {
                    let _ = tx.send(self_change);
                }),
            )
            .unwrap();
        assert!(provider.is_watching());

        insert(&conn, Some("+200"), 2_000, 2);

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(false));

        assert!(provider.unregister_observer(id));
        assert!(!provider.is_watching());
        assert_eq!(provider.observer_count(), 0);
    }

    fn watch(provider: &SmsDatabaseProvider) -> (ObserverId, crossbeam_channel::Receiver<bool>) {
        let (tx, rx) = unbounded();
        let id = provider
            .register_observer(
                MESSAGES_CONTENT_URI,
                true,
                Arc::new(move |self_change| {
                    let _ = tx.send(self_change);
                }),
            )
            .unwrap();
        (id, rx)
    }

    #[test]
    fn test_watcher_notifies_on_updated_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mmssms.db");
        let conn = create_sms_db(&path);

        let provider = SmsDatabaseProvider::with_poll_interval(&path, Duration::from_millis(20));
        let (id, rx) = watch(&provider);

        // Outbox row, then the same row once it has been sent
        insert(&conn, Some("+100"), 1_000, 4);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(false));
        assert_eq!(provider.query_latest().unwrap().unwrap().message_type, 4);

        conn.execute("UPDATE sms SET type = 2 WHERE type = 4", []).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(false));
        assert_eq!(provider.query_latest().unwrap().unwrap().message_type, 2);

        provider.unregister_observer(id);
    }

    #[test]
    fn test_watcher_without_baseline_stays_quiet_until_next_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mmssms.db");

        // No file yet, so no baseline can be read at registration
        let provider = SmsDatabaseProvider::with_poll_interval(&path, Duration::from_millis(20));
        let (id, rx) = watch(&provider);
        assert!(provider.is_watching());

        // The database appears complete with old history
        let staging = dir.path().join("staging.db");
        let conn = create_sms_db(&staging);
        insert(&conn, Some("+100"), 1_000, 1);
        drop(conn);
        std::fs::rename(&staging, &path).unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        let conn = Connection::open(&path).unwrap();
        insert(&conn, Some("+200"), 2_000, 2);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(false));

        provider.unregister_observer(id);
    }

    #[test]
    fn test_permissions_follow_file_access() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mmssms.db");

        let absent = SmsDatabasePermissions::new(&path);
        assert!(!absent.is_granted(Permission::ReadSms));
        assert!(absent.is_granted(Permission::ReadContacts));

        create_sms_db(&path);
        assert!(SmsDatabasePermissions::new(&path).is_granted(Permission::ReadSms));
    }
}
