//! Intents and broadcast delivery.
//!
//! A [`BroadcastBus`] delivers an [`Intent`] to every registered receiver
//! whose [`IntentFilter`] lists its action. Delivery is synchronous on the
//! sender's thread; receivers that need a different thread forward the
//! intent over a channel.

use crossbeam_channel::{unbounded, Receiver};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A named action with optional string extras.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    action: String,
    extras: HashMap<String, String>,
}

impl Intent {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            extras: HashMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn string_extra(&self, key: &str) -> Option<&str> {
        self.extras.get(key).map(String::as_str)
    }
}

/// Set of actions a receiver listens for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntentFilter {
    actions: Vec<String>,
}

impl IntentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_action(&mut self, action: impl Into<String>) {
        let action = action.into();
        if !self.actions.contains(&action) {
            self.actions.push(action);
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.add_action(action);
        self
    }

    pub fn matches(&self, intent: &Intent) -> bool {
        self.actions.iter().any(|a| a == intent.action())
    }
}

/// Callback run for each matching intent.
pub type ReceiverCallback = Arc<dyn Fn(&Intent) + Send + Sync>;

/// Handle returned by [`BroadcastBus::register_receiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiverId(u64);

struct Registration {
    id: ReceiverId,
    filter: IntentFilter,
    callback: ReceiverCallback,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    receivers: Vec<Registration>,
}

/// Process-local broadcast delivery. Clones share the same receivers.
#[derive(Clone, Default)]
pub struct BroadcastBus {
    inner: Arc<Mutex<BusInner>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for every intent matching `filter`.
    pub fn register_receiver(&self, filter: IntentFilter, callback: ReceiverCallback) -> ReceiverId {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_id += 1;
        let id = ReceiverId(inner.next_id);
        inner.receivers.push(Registration {
            id,
            filter,
            callback,
        });
        id
    }

    /// Remove a receiver. Returns false if it was not registered.
    pub fn unregister_receiver(&self, id: ReceiverId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.receivers.len();
        inner.receivers.retain(|r| r.id != id);
        inner.receivers.len() != before
    }

    /// Deliver `intent` to every matching receiver. Returns the number reached.
    pub fn send_broadcast(&self, intent: &Intent) -> usize {
        // Callbacks run without the lock held so they may register or
        // unregister receivers themselves.
        let targets: Vec<ReceiverCallback> = {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner
                .receivers
                .iter()
                .filter(|r| r.filter.matches(intent))
                .map(|r| r.callback.clone())
                .collect()
        };

        for callback in &targets {
            callback(intent);
        }
        targets.len()
    }

    /// Register a receiver that forwards matching intents to a channel.
    pub fn subscribe(&self, filter: IntentFilter) -> (ReceiverId, Receiver<Intent>) {
        let (sender, receiver) = unbounded();
        let id = self.register_receiver(
            filter,
            Arc::new(move |intent: &Intent| {
                let _ = sender.send(intent.clone());
            }),
        );
        (id, receiver)
    }

    /// Number of registered receivers.
    pub fn receiver_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .receivers
            .len()
    }
}

impl std::fmt::Debug for BroadcastBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastBus")
            .field("receivers", &self.receiver_count())
            .finish()
    }
}
