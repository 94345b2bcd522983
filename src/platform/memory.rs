//! In-memory message provider.
//!
//! Holds rows in a vector and notifies observers synchronously on insert.
//! Used by the tests and the demo; it needs no device and no files.

use crate::platform::provider::{
    ChangeCallback, MessageProvider, ObserverId, ObserverRegistry, ProviderError, ProviderRow,
    MESSAGES_CONTENT_URI,
};
use std::sync::{Mutex, PoisonError};

#[derive(Default)]
pub struct InMemoryProvider {
    rows: Mutex<Vec<ProviderRow>>,
    observers: ObserverRegistry,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row and notify observers of `content://sms/<id>`.
    pub fn insert(&self, row: ProviderRow) {
        let id = {
            let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
            rows.push(row);
            rows.len()
        };
        self.observers
            .notify(&format!("{MESSAGES_CONTENT_URI}/{id}"), false);
    }

    /// Notify observers without changing any row.
    pub fn notify_change(&self) -> usize {
        self.observers.notify(MESSAGES_CONTENT_URI, false)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl MessageProvider for InMemoryProvider {
    fn query_latest(&self) -> Result<Option<ProviderRow>, ProviderError> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        // max_by_key keeps the last of equal dates, i.e. the newest insert
        Ok(rows.iter().max_by_key(|r| r.date).cloned())
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
        Ok(self
            .observers
            .register(uri, notify_for_descendants, callback))
    }

    fn unregister_observer(&self, id: ObserverId) -> bool {
        self.observers.unregister(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn row(message_type: i32, date: i64) -> ProviderRow {
        ProviderRow {
            message_type,
            date,
            address: Some(format!("+1555{date}")),
        }
    }

    #[test]
    fn test_empty_provider_has_no_latest() {
        let provider = InMemoryProvider::new();
        assert_eq!(provider.query_latest().unwrap(), None);
    }

    #[test]
    fn test_latest_is_by_date_not_insert_order() {
        let provider = InMemoryProvider::new();
        provider.insert(row(1, 300));
        provider.insert(row(2, 100));

        let latest = provider.query_latest().unwrap().unwrap();
        assert_eq!(latest.date, 300);
        assert_eq!(latest.message_type, 1);
        assert_eq!(provider.row_count(), 2);
    }

    #[test]
    fn test_insert_notifies_descendant_observers_only() {
        let provider = InMemoryProvider::new();
        let recursive = Arc::new(AtomicUsize::new(0));
        let exact = Arc::new(AtomicUsize::new(0));

        let r = recursive.clone();
        provider
            .register_observer(
                MESSAGES_CONTENT_URI,
                true,
                Arc::new(move |_| {
                    r.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        let e = exact.clone();
        provider
            .register_observer(
                MESSAGES_CONTENT_URI,
                false,
                Arc::new(move |_| {
                    e.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        provider.insert(row(1, 10));
        assert_eq!(recursive.load(Ordering::SeqCst), 1);
        assert_eq!(exact.load(Ordering::SeqCst), 0);

        assert_eq!(provider.notify_change(), 2);
    }

    #[test]
    fn test_rejects_foreign_uri() {
        let provider = InMemoryProvider::new();
        let result = provider.register_observer("content://call_log", true, Arc::new(|_| {}));
        assert!(matches!(result, Err(ProviderError::UnknownUri(_))));
        assert_eq!(provider.observer_count(), 0);
    }
}
