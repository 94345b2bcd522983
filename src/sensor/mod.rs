//! The messages sensor.
//!
//! - [`MessagesSensor`]: the lifecycle-bound service and its change handler
//! - [`SensorHost`]: start/stop entry points and the handler thread
//! - [`MessagesSensorBroadcastReceiver`]: maps start/stop intents onto a host

pub mod host;
pub mod receiver;
pub mod service;

pub use host::SensorHost;
pub use receiver::MessagesSensorBroadcastReceiver;
pub use service::{HandlerMessage, MessagesSensor, ServiceState};

use crate::config::{Config, ConfigSlot};
use crate::model::MessageData;
use crate::platform::{BroadcastBus, MessageProvider, PermissionChecker, ProviderError};
use crate::storage::{default_engine_factory, EngineFactory, StorageError};
use crate::transparency::SharedTransparencyLog;
use std::sync::Arc;
use thiserror::Error;

/// Log target for everything the sensor emits.
pub const TAG: &str = "AWARE::Messages";

/// Fired event: message received
pub const ACTION_AWARE_MESSAGE_RECEIVED: &str = "ACTION_AWARE_MESSAGE_RECEIVED";

/// Fired event: message sent
pub const ACTION_AWARE_MESSAGE_SENT: &str = "ACTION_AWARE_MESSAGE_SENT";

pub const ACTION_AWARE_MESSAGES_START: &str = "com.awareframework.android.sensor.messages.SENSOR_START";
pub const ACTION_AWARE_MESSAGES_STOP: &str = "com.awareframework.android.sensor.messages.SENSOR_STOP";
pub const ACTION_AWARE_MESSAGES_SET_LABEL: &str =
    "com.awareframework.android.sensor.messages.SET_LABEL";
pub const EXTRA_LABEL: &str = "label";
pub const ACTION_AWARE_MESSAGES_SYNC: &str = "com.awareframework.android.sensor.messages.SENSOR_SYNC";

/// Generic "sensors may start" signal shared by all AWARE sensors.
pub const SENSOR_START_ENABLED: &str = "com.awareframework.android.core.SENSOR_START_ENABLED";

/// Generic "stop every sensor" signal shared by all AWARE sensors.
pub const SENSOR_STOP_ALL: &str = "com.awareframework.android.core.SENSOR_STOP_ALL";

/// Callback for recorded message events.
pub trait MessageObserver: Send + Sync {
    /// Called after a message event has been recorded.
    fn on_message(&self, data: &MessageData);
}

impl<F> MessageObserver for F
where
    F: Fn(&MessageData) + Send + Sync,
{
    fn on_message(&self, data: &MessageData) {
        self(data)
    }
}

/// What the platform should do if the service dies after a start command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Restart automatically
    Sticky,
    /// Do not restart until explicitly started again
    NotSticky,
}

/// Everything a running sensor needs from its surroundings.
#[derive(Clone)]
pub struct SensorContext {
    pub provider: Arc<dyn MessageProvider>,
    pub permissions: Arc<dyn PermissionChecker>,
    pub bus: BroadcastBus,
    pub config: ConfigSlot,
    pub engine_factory: EngineFactory,
    pub stats: Option<SharedTransparencyLog>,
}

impl SensorContext {
    pub fn new(
        provider: Arc<dyn MessageProvider>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        Self {
            provider,
            permissions,
            bus: BroadcastBus::new(),
            config: ConfigSlot::new(Config::default()),
            engine_factory: default_engine_factory(),
            stats: None,
        }
    }

    pub fn with_bus(mut self, bus: BroadcastBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = ConfigSlot::new(config);
        self
    }

    pub fn with_engine_factory(mut self, factory: EngineFactory) -> Self {
        self.engine_factory = factory;
        self
    }

    pub fn with_stats(mut self, stats: SharedTransparencyLog) -> Self {
        self.stats = Some(stats);
        self
    }
}

/// Sensor errors.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Failed to spawn handler thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Handler thread exited unexpectedly")]
    HandlerGone,
}

/// Debug log, emitted only when the live configuration has `debug` set.
pub(crate) fn logd(config: &ConfigSlot, text: impl std::fmt::Display) {
    if config.read(|c| c.debug) {
        tracing::debug!(target: TAG, "{text}");
    }
}

/// Warning log, always emitted.
pub(crate) fn logw(text: impl std::fmt::Display) {
    tracing::warn!(target: TAG, "{text}");
}
