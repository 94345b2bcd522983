//! Companion broadcast receiver.
//!
//! Lives independently of the service: it maps the generic AWARE sensor
//! signals and the sensor's own start/stop actions onto a [`SensorHost`].

use crate::platform::{BroadcastBus, Intent, IntentFilter, ReceiverId};
use crate::sensor::{
    logd, SensorError, SensorHost, ACTION_AWARE_MESSAGES_START, ACTION_AWARE_MESSAGES_STOP,
    SENSOR_START_ENABLED, SENSOR_STOP_ALL, TAG,
};
use std::sync::{Arc, Mutex, PoisonError};

pub struct MessagesSensorBroadcastReceiver {
    host: Arc<Mutex<SensorHost>>,
}

impl MessagesSensorBroadcastReceiver {
    pub fn new(host: Arc<Mutex<SensorHost>>) -> Self {
        Self { host }
    }

    /// Actions this receiver reacts to.
    pub fn filter() -> IntentFilter {
        IntentFilter::new()
            .with_action(SENSOR_START_ENABLED)
            .with_action(SENSOR_STOP_ALL)
            .with_action(ACTION_AWARE_MESSAGES_START)
            .with_action(ACTION_AWARE_MESSAGES_STOP)
    }

    /// Register on `bus`. Failures inside the callback are logged.
    pub fn register(self: &Arc<Self>, bus: &BroadcastBus) -> ReceiverId {
        let receiver = Arc::clone(self);
        bus.register_receiver(
            Self::filter(),
            Arc::new(move |intent: &Intent| {
                if let Err(e) = receiver.on_receive(intent) {
                    tracing::warn!(target: TAG, "Could not handle {}: {e}", intent.action());
                }
            }),
        )
    }

    pub fn on_receive(&self, intent: &Intent) -> Result<(), SensorError> {
        let mut host = self.host.lock().unwrap_or_else(PoisonError::into_inner);
        let config = host.context().config.clone();

        logd(
            &config,
            format!("Sensor broadcast received. action: {}", intent.action()),
        );

        match intent.action() {
            SENSOR_START_ENABLED => {
                let enabled = config.read(|c| c.enabled);
                logd(&config, format!("Sensor enabled: {enabled}"));
                if enabled {
                    host.start(None)?;
                }
            }
            ACTION_AWARE_MESSAGES_STOP | SENSOR_STOP_ALL => {
                logd(&config, "Stopping sensor.");
                host.stop();
            }
            ACTION_AWARE_MESSAGES_START => {
                host.start(None)?;
            }
            _ => {}
        }
        Ok(())
    }
}
