//! Start/stop entry points and the handler thread.
//!
//! [`SensorHost::start`] creates the service on its own handler thread (if
//! it is not running yet) and issues a start command. Provider changes and
//! control intents are queued on a bounded channel and handled in order on
//! that thread, the way a platform handler's message loop would.

use crate::config::Config;
use crate::sensor::service::{HandlerMessage, MessagesSensor};
use crate::sensor::{logd, SensorContext, SensorError, StartMode};
use crossbeam_channel::{bounded, Sender};
use std::thread::{self, JoinHandle};

/// Capacity of the handler queue. Notifications beyond it are dropped.
pub const HANDLER_QUEUE_CAPACITY: usize = 1_024;

struct RunningService {
    handler: Sender<HandlerMessage>,
    thread: Option<JoinHandle<()>>,
}

/// Owns the live configuration and at most one running service.
pub struct SensorHost {
    ctx: SensorContext,
    running: Option<RunningService>,
}

impl SensorHost {
    pub fn new(ctx: SensorContext) -> Self {
        Self { ctx, running: None }
    }

    pub fn context(&self) -> &SensorContext {
        &self.ctx
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Merge `config` into the live configuration (if given), then start the service.
    pub fn start(&mut self, config: Option<Config>) -> Result<StartMode, SensorError> {
        if let Some(config) = config {
            self.ctx.config.replace_with(config);
        }

        if self.running.is_none() {
            self.running = Some(self.spawn()?);
        }

        let handler = match &self.running {
            Some(running) => running.handler.clone(),
            None => return Err(SensorError::HandlerGone),
        };

        let (reply_tx, reply_rx) = bounded(1);
        if handler.send(HandlerMessage::StartCommand(reply_tx)).is_err() {
            self.running = None;
            return Err(SensorError::HandlerGone);
        }
        reply_rx.recv().map_err(|_| SensorError::HandlerGone)
    }

    /// Destroy the running service. Returns false if nothing was running.
    pub fn stop(&mut self) -> bool {
        let Some(mut running) = self.running.take() else {
            return false;
        };

        // A closed channel means the loop already ended
        let _ = running.handler.send(HandlerMessage::Destroy);
        if let Some(thread) = running.thread.take() {
            let _ = thread.join();
        }
        logd(&self.ctx.config, "Messages service stopped.");
        true
    }

    /// Queue a control intent for the running service.
    pub fn post(&self, message: HandlerMessage) -> Result<(), SensorError> {
        let running = self.running.as_ref().ok_or(SensorError::HandlerGone)?;
        running
            .handler
            .send(message)
            .map_err(|_| SensorError::HandlerGone)
    }

    fn spawn(&self) -> Result<RunningService, SensorError> {
        let (tx, rx) = bounded(HANDLER_QUEUE_CAPACITY);
        let (ready_tx, ready_rx) = bounded::<Result<(), SensorError>>(1);

        let ctx = self.ctx.clone();
        let handler = tx.clone();
        let thread = thread::Builder::new()
            .name("aware-messages-handler".into())
            .spawn(move || {
                let mut sensor = match MessagesSensor::on_create(ctx, handler) {
                    Ok(sensor) => {
                        let _ = ready_tx.send(Ok(()));
                        sensor
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while let Ok(message) = rx.recv() {
                    if sensor.handle_message(message).is_break() {
                        break;
                    }
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(RunningService {
                handler: tx,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(SensorError::HandlerGone)
            }
        }
    }
}

impl Drop for SensorHost {
    fn drop(&mut self) {
        self.stop();
    }
}
