//! The message content provider seam.

use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// URI of the SMS provider.
///
/// This is the unofficial, unsupported provider path; newer platform
/// versions may move it.
pub const MESSAGES_CONTENT_URI: &str = "content://sms";

/// The columns the sensor reads from one provider row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRow {
    /// `type` column: direction code
    pub message_type: i32,
    /// `date` column: ms since epoch
    pub date: i64,
    /// `address` column
    pub address: Option<String>,
}

/// Called with `self_change` whenever observed content changes.
pub type ChangeCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Handle returned by [`MessageProvider::register_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// A source of message rows that can notify observers of changes.
pub trait MessageProvider: Send + Sync {
    /// The single most recent row by date, if any.
    fn query_latest(&self) -> Result<Option<ProviderRow>, ProviderError>;

    /// Observe changes to `uri` (and its descendants when requested).
    fn register_observer(
        &self,
        uri: &str,
        notify_for_descendants: bool,
        callback: ChangeCallback,
    ) -> Result<ObserverId, ProviderError>;

    /// Stop observing. Returns false if `id` was not registered.
    fn unregister_observer(&self, id: ObserverId) -> bool;
}

/// Provider errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Unknown content URI: {0}")]
    UnknownUri(String),

    #[error("Provider database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to start provider watcher: {0}")]
    Watcher(#[from] std::io::Error),
}

struct Registration {
    id: ObserverId,
    uri: String,
    notify_for_descendants: bool,
    callback: ChangeCallback,
}

/// Bookkeeping for content observers, shared by the provider implementations.
#[derive(Default)]
pub struct ObserverRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    observers: Vec<Registration>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        uri: &str,
        notify_for_descendants: bool,
        callback: ChangeCallback,
    ) -> ObserverId {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_id += 1;
        let id = ObserverId(inner.next_id);
        inner.observers.push(Registration {
            id,
            uri: uri.to_string(),
            notify_for_descendants,
            callback,
        });
        id
    }

    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.observers.len();
        inner.observers.retain(|o| o.id != id);
        inner.observers.len() != before
    }

    /// Notify every observer interested in `changed_uri`. Returns the number notified.
    pub fn notify(&self, changed_uri: &str, self_change: bool) -> usize {
        let targets: Vec<ChangeCallback> = {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner
                .observers
                .iter()
                .filter(|o| uri_matches(&o.uri, o.notify_for_descendants, changed_uri))
                .map(|o| o.callback.clone())
                .collect()
        };

        for callback in &targets {
            callback(self_change);
        }
        targets.len()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observers
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn uri_matches(observed: &str, descendants: bool, changed: &str) -> bool {
    if observed == changed {
        return true;
    }
    descendants
        && changed
            .strip_prefix(observed)
            .is_some_and(|rest| rest.starts_with('/'))
}
