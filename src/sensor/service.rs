//! The lifecycle-bound messages service.
//!
//! A [`MessagesSensor`] goes `Created → Active → Destroyed`. Every callback
//! it registers (provider observer, control receiver) only posts a
//! [`HandlerMessage`] to the handler channel; the owner of that channel
//! feeds messages back through [`MessagesSensor::handle_message`], so all
//! work happens serially on one thread.

use crate::model::{MessageData, MessageKind, TABLE_NAME};
use crate::platform::{
    missing_permissions, Intent, IntentFilter, ObserverId, ReceiverId, MESSAGES_CONTENT_URI,
    REQUIRED_PERMISSIONS,
};
use crate::sensor::{
    logd, logw, SensorContext, SensorError, StartMode, ACTION_AWARE_MESSAGES_SET_LABEL,
    ACTION_AWARE_MESSAGES_SYNC, ACTION_AWARE_MESSAGE_RECEIVED, ACTION_AWARE_MESSAGE_SENT,
    EXTRA_LABEL,
};
use crate::storage::Engine;
use crossbeam_channel::{Sender, TrySendError};
use std::ops::ControlFlow;
use std::sync::Arc;

/// Work item for the service's handler thread.
#[derive(Debug)]
pub enum HandlerMessage {
    /// The message provider reported a change
    ProviderChanged { self_change: bool },
    /// A control intent arrived
    Intent(Intent),
    /// Start (or re-start) observing; the resulting mode is sent back
    StartCommand(Sender<StartMode>),
    /// Tear the service down and leave the handler loop
    Destroy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Active,
    Destroyed,
}

/// Broadcast action for a message direction, if it has one.
pub fn broadcast_action(kind: MessageKind) -> Option<&'static str> {
    match kind {
        MessageKind::Inbox => Some(ACTION_AWARE_MESSAGE_RECEIVED),
        MessageKind::Sent => Some(ACTION_AWARE_MESSAGE_SENT),
        MessageKind::Other(_) => None,
    }
}

pub struct MessagesSensor {
    ctx: SensorContext,
    handler: Sender<HandlerMessage>,
    engine: Option<Box<dyn Engine>>,
    state: ServiceState,
    observer_id: Option<ObserverId>,
    receiver_id: Option<ReceiverId>,
}

impl MessagesSensor {
    /// Open the database engine and register the control receiver.
    pub fn on_create(
        ctx: SensorContext,
        handler: Sender<HandlerMessage>,
    ) -> Result<Self, SensorError> {
        let engine = ctx.config.read(|config| (ctx.engine_factory)(config))?;

        let filter = IntentFilter::new()
            .with_action(ACTION_AWARE_MESSAGES_SET_LABEL)
            .with_action(ACTION_AWARE_MESSAGES_SYNC);
        let tx = handler.clone();
        let receiver_id = ctx.bus.register_receiver(
            filter,
            Arc::new(move |intent: &Intent| post(&tx, HandlerMessage::Intent(intent.clone()))),
        );

        logd(&ctx.config, "Messages service created!");

        Ok(Self {
            ctx,
            handler,
            engine,
            state: ServiceState::Created,
            observer_id: None,
            receiver_id: Some(receiver_id),
        })
    }

    /// Check permissions and begin observing the provider.
    pub fn on_start_command(&mut self) -> StartMode {
        if self.state == ServiceState::Destroyed {
            return StartMode::NotSticky;
        }

        let missing = missing_permissions(self.ctx.permissions.as_ref(), &REQUIRED_PERMISSIONS);
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|p| p.as_str()).collect();
            logw(format!("Missing permissions detected: {}", names.join(", ")));
            return StartMode::NotSticky;
        }

        if self.observer_id.is_none() {
            let tx = self.handler.clone();
            let registered = self.ctx.provider.register_observer(
                MESSAGES_CONTENT_URI,
                true,
                Arc::new(move |self_change| {
                    post(&tx, HandlerMessage::ProviderChanged { self_change })
                }),
            );
            match registered {
                Ok(id) => self.observer_id = Some(id),
                Err(e) => {
                    logw(format!("Could not observe {MESSAGES_CONTENT_URI}: {e}"));
                    return StartMode::NotSticky;
                }
            }
        }

        self.state = ServiceState::Active;
        logd(&self.ctx.config, "Messages service is active.");

        StartMode::Sticky
    }

    /// Record the most recent provider row.
    pub fn on_change(&mut self, _self_change: bool) {
        if self.state != ServiceState::Active {
            return;
        }

        let row = match self.ctx.provider.query_latest() {
            Ok(Some(row)) => row,
            Ok(None) => return,
            Err(e) => {
                logw(format!("Message provider query failed: {e}"));
                return;
            }
        };

        // Every notification is recorded; repeated notifications for the
        // same row produce repeated records. Record and observer come from
        // one configuration snapshot.
        let (data, observer) = self.ctx.config.read(|c| {
            (
                MessageData::from_row(&row, &c.device_id, &c.label),
                c.sensor_observer.clone(),
            )
        });

        if let Some(engine) = self.engine.as_mut() {
            if let Err(e) = engine.save(&data, TABLE_NAME) {
                logw(format!("Could not store message event: {e}"));
                return;
            }
            if let Some(stats) = &self.ctx.stats {
                stats.record_stored();
            }
        }

        if let Some(observer) = observer {
            observer.on_message(&data);
        }

        let kind = data.kind();
        if let Some(stats) = &self.ctx.stats {
            stats.record_message(kind);
        }

        if let Some(action) = broadcast_action(kind) {
            logd(&self.ctx.config, action);
            self.ctx.bus.send_broadcast(&Intent::new(action));
        }
    }

    /// Handle a control intent.
    pub fn on_receive(&mut self, intent: &Intent) {
        match intent.action() {
            ACTION_AWARE_MESSAGES_SET_LABEL => {
                if let Some(label) = intent.string_extra(EXTRA_LABEL) {
                    self.ctx.config.write(|c| c.label = label.to_string());
                }
            }
            ACTION_AWARE_MESSAGES_SYNC => self.on_sync(),
            _ => {}
        }
    }

    /// Ask the engine to sync the message table.
    pub fn on_sync(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        match engine.start_sync(TABLE_NAME) {
            Ok(count) => logd(&self.ctx.config, format!("Synced {count} records")),
            Err(e) => logw(format!("Sync failed: {e}")),
        }
    }

    /// Unregister everything and close the engine. Idempotent.
    pub fn on_destroy(&mut self) {
        if self.state == ServiceState::Destroyed {
            return;
        }

        if let Some(id) = self.observer_id.take() {
            self.ctx.provider.unregister_observer(id);
        }
        if let Some(id) = self.receiver_id.take() {
            self.ctx.bus.unregister_receiver(id);
        }
        if let Some(mut engine) = self.engine.take() {
            if let Err(e) = engine.close() {
                logw(format!("Could not close database engine: {e}"));
            }
        }

        self.state = ServiceState::Destroyed;
        logd(&self.ctx.config, "Messages service terminated.");
    }

    /// Dispatch one handler message. Breaks after [`HandlerMessage::Destroy`].
    pub fn handle_message(&mut self, message: HandlerMessage) -> ControlFlow<()> {
        match message {
            HandlerMessage::ProviderChanged { self_change } => self.on_change(self_change),
            HandlerMessage::Intent(intent) => self.on_receive(&intent),
            HandlerMessage::StartCommand(reply) => {
                let mode = self.on_start_command();
                let _ = reply.send(mode);
            }
            HandlerMessage::Destroy => {
                self.on_destroy();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn is_observing(&self) -> bool {
        self.observer_id.is_some()
    }
}

impl Drop for MessagesSensor {
    fn drop(&mut self) {
        self.on_destroy();
    }
}

/// Queue `message` without blocking the caller.
fn post(handler: &Sender<HandlerMessage>, message: HandlerMessage) {
    if let Err(TrySendError::Full(_)) = handler.try_send(message) {
        logw("Handler queue full; dropping notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigSlot};
    use crate::platform::{
        BroadcastBus, InMemoryProvider, Permission, ProviderRow, StaticPermissions,
    };
    use crate::storage::{EngineFactory, StorageError};
    use crate::transparency::create_shared_log;
    use crossbeam_channel::{bounded, Receiver};
    use std::sync::Mutex;

    type EngineResult = Result<Option<Box<dyn Engine>>, StorageError>;

    #[derive(Default)]
    struct Recorded {
        saved: Vec<MessageData>,
        syncs: usize,
        closes: usize,
    }

    struct RecordingEngine {
        state: Arc<Mutex<Recorded>>,
        fail_saves: bool,
    }

    impl Engine for RecordingEngine {
        fn save(&mut self, data: &MessageData, _table: &str) -> Result<(), StorageError> {
            if self.fail_saves {
                return Err(StorageError::Closed);
            }
            self.state.lock().unwrap().saved.push(data.clone());
            Ok(())
        }

        fn start_sync(&mut self, _table: &str) -> Result<usize, StorageError> {
            self.state.lock().unwrap().syncs += 1;
            Ok(0)
        }

        fn records(&mut self, _table: &str) -> Result<Vec<MessageData>, StorageError> {
            Ok(self.state.lock().unwrap().saved.clone())
        }

        fn close(&mut self) -> Result<(), StorageError> {
            self.state.lock().unwrap().closes += 1;
            Ok(())
        }
    }

    struct Fixture {
        provider: Arc<InMemoryProvider>,
        bus: BroadcastBus,
        config: ConfigSlot,
        recorded: Arc<Mutex<Recorded>>,
        rx: Receiver<HandlerMessage>,
        sensor: MessagesSensor,
    }

    impl Fixture {
        fn new(permissions: StaticPermissions) -> Self {
            Self::build(permissions, false)
        }

        fn build(permissions: StaticPermissions, fail_saves: bool) -> Self {
            let provider = Arc::new(InMemoryProvider::new());
            let recorded = Arc::new(Mutex::new(Recorded::default()));
            let state = recorded.clone();
            let factory: EngineFactory = Arc::new(move |_: &Config| -> EngineResult {
                Ok(Some(Box::new(RecordingEngine {
                    state: state.clone(),
                    fail_saves,
                }) as Box<dyn Engine>))
            });

            let ctx = SensorContext::new(provider.clone(), Arc::new(permissions))
                .with_config(Config {
                    device_id: "device-1".into(),
                    label: "initial".into(),
                    ..Config::default()
                })
                .with_engine_factory(factory)
                .with_stats(create_shared_log());
            let bus = ctx.bus.clone();
            let config = ctx.config.clone();

            let (tx, rx) = bounded(64);
            let sensor = MessagesSensor::on_create(ctx, tx).unwrap();

            Self {
                provider,
                bus,
                config,
                recorded,
                rx,
                sensor,
            }
        }

        fn pump(&mut self) {
            while let Ok(message) = self.rx.try_recv() {
                let _ = self.sensor.handle_message(message);
            }
        }

        fn insert(&mut self, message_type: i32, date: i64) {
            self.provider.insert(ProviderRow {
                message_type,
                date,
                address: Some("+358400000000".into()),
            });
            self.pump();
        }

        fn saved(&self) -> Vec<MessageData> {
            self.recorded.lock().unwrap().saved.clone()
        }
    }

    fn events(bus: &BroadcastBus) -> Receiver<Intent> {
        bus.subscribe(
            IntentFilter::new()
                .with_action(ACTION_AWARE_MESSAGE_RECEIVED)
                .with_action(ACTION_AWARE_MESSAGE_SENT),
        )
        .1
    }

    #[test]
    fn test_create_registers_control_receiver_only() {
        let f = Fixture::new(StaticPermissions::all_granted());
        assert_eq!(f.sensor.state(), ServiceState::Created);
        assert_eq!(f.bus.receiver_count(), 1);
        assert_eq!(f.provider.observer_count(), 0);
    }

    #[test]
    fn test_missing_permission_refuses_to_observe() {
        let mut f = Fixture::new(StaticPermissions::none().grant(Permission::ReadSms));
        assert_eq!(f.sensor.on_start_command(), StartMode::NotSticky);
        assert!(!f.sensor.is_observing());
        assert_eq!(f.provider.observer_count(), 0);
        assert_eq!(f.sensor.state(), ServiceState::Created);

        f.insert(1, 10);
        assert!(f.saved().is_empty());
    }

    #[test]
    fn test_repeated_start_registers_one_observer() {
        let mut f = Fixture::new(StaticPermissions::all_granted());
        assert_eq!(f.sensor.on_start_command(), StartMode::Sticky);
        assert_eq!(f.sensor.on_start_command(), StartMode::Sticky);
        assert_eq!(f.provider.observer_count(), 1);
        assert_eq!(f.sensor.state(), ServiceState::Active);
    }

    #[test]
    fn test_inbox_row_is_stored_observed_and_broadcast() {
        let mut f = Fixture::new(StaticPermissions::all_granted());
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        f.config.write(|c| {
            c.sensor_observer = Some(Arc::new(move |d: &MessageData| {
                sink.lock().unwrap().push(d.clone())
            }))
        });
        let events = events(&f.bus);
        f.sensor.on_start_command();

        f.insert(1, 1_000);

        let saved = f.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].message_type, 1);
        assert_eq!(saved[0].event_timestamp, 1_000);
        assert_eq!(saved[0].device_id, "device-1");
        assert_eq!(saved[0].label, "initial");
        assert_eq!(observed.lock().unwrap().as_slice(), saved.as_slice());
        assert_eq!(events.try_recv().unwrap().action(), ACTION_AWARE_MESSAGE_RECEIVED);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_sent_and_other_rows() {
        let mut f = Fixture::new(StaticPermissions::all_granted());
        let events = events(&f.bus);
        f.sensor.on_start_command();

        f.insert(2, 2_000);
        assert_eq!(events.try_recv().unwrap().action(), ACTION_AWARE_MESSAGE_SENT);

        f.insert(3, 3_000);
        assert!(events.try_recv().is_err());
        assert_eq!(f.saved().len(), 2);
        assert_eq!(f.saved()[1].message_type, 3);
    }

    #[test]
    fn test_duplicate_notifications_are_recorded_twice() {
        let mut f = Fixture::new(StaticPermissions::all_granted());
        f.sensor.on_start_command();

        f.insert(1, 1_000);
        f.provider.notify_change();
        f.pump();

        let saved = f.saved();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].event_timestamp, saved[1].event_timestamp);
    }

    #[test]
    fn test_empty_provider_records_nothing() {
        let mut f = Fixture::new(StaticPermissions::all_granted());
        f.sensor.on_start_command();
        f.provider.notify_change();
        f.pump();
        assert!(f.saved().is_empty());
    }

    #[test]
    fn test_failed_save_skips_callback_and_broadcast() {
        let mut f = Fixture::build(StaticPermissions::all_granted(), true);
        let called = Arc::new(Mutex::new(0));
        let c = called.clone();
        f.config.write(|cfg| {
            cfg.sensor_observer = Some(Arc::new(move |_: &MessageData| *c.lock().unwrap() += 1))
        });
        let events = events(&f.bus);
        f.sensor.on_start_command();

        f.insert(1, 1);
        assert_eq!(*called.lock().unwrap(), 0);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_set_label_applies_to_later_records() {
        let mut f = Fixture::new(StaticPermissions::all_granted());
        f.sensor.on_start_command();

        f.insert(1, 1);
        f.bus.send_broadcast(
            &Intent::new(ACTION_AWARE_MESSAGES_SET_LABEL).with_extra(EXTRA_LABEL, "x"),
        );
        f.pump();
        f.insert(2, 2);

        let saved = f.saved();
        assert_eq!(saved[0].label, "initial");
        assert_eq!(saved[1].label, "x");
        assert_eq!(f.config.read(|c| c.label.clone()), "x");
    }

    #[test]
    fn test_set_label_without_extra_is_ignored() {
        let mut f = Fixture::new(StaticPermissions::all_granted());
        f.sensor.on_receive(&Intent::new(ACTION_AWARE_MESSAGES_SET_LABEL));
        assert_eq!(f.config.read(|c| c.label.clone()), "initial");
    }

    #[test]
    fn test_sync_intent_reaches_engine() {
        let mut f = Fixture::new(StaticPermissions::all_granted());
        f.bus.send_broadcast(&Intent::new(ACTION_AWARE_MESSAGES_SYNC));
        f.pump();
        assert_eq!(f.recorded.lock().unwrap().syncs, 1);
    }

    #[test]
    fn test_destroy_releases_everything_once() {
        let mut f = Fixture::new(StaticPermissions::all_granted());
        f.sensor.on_start_command();

        f.sensor.on_destroy();
        f.sensor.on_destroy();

        assert_eq!(f.sensor.state(), ServiceState::Destroyed);
        assert_eq!(f.provider.observer_count(), 0);
        assert_eq!(f.bus.receiver_count(), 0);
        assert_eq!(f.recorded.lock().unwrap().closes, 1);
        assert_eq!(f.sensor.on_start_command(), StartMode::NotSticky);
    }

    struct ReconfiguringEngine {
        slot: ConfigSlot,
        next: Mutex<Option<Config>>,
    }

    impl Engine for ReconfiguringEngine {
        fn save(&mut self, _data: &MessageData, _table: &str) -> Result<(), StorageError> {
            // A new start lands while the record is being stored
            if let Some(next) = self.next.lock().unwrap().take() {
                self.slot.replace_with(next);
            }
            Ok(())
        }

        fn start_sync(&mut self, _table: &str) -> Result<usize, StorageError> {
            Ok(0)
        }

        fn records(&mut self, _table: &str) -> Result<Vec<MessageData>, StorageError> {
            Ok(Vec::new())
        }

        fn close(&mut self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn test_observer_matches_record_config_when_replaced_mid_change() {
        let provider = Arc::new(InMemoryProvider::new());
        let (old_tx, old_rx) = bounded(4);
        let (new_tx, new_rx) = bounded(4);
        let ctx = SensorContext::new(provider.clone(), Arc::new(StaticPermissions::all_granted()))
            .with_config(
                Config {
                    label: "old".into(),
                    ..Config::default()
                }
                .with_observer(move |data: &MessageData| {
                    let _ = old_tx.send(data.clone());
                }),
            );
        let slot = ctx.config.clone();
        let next = Config {
            label: "new".into(),
            ..Config::default()
        }
        .with_observer(move |data: &MessageData| {
            let _ = new_tx.send(data.clone());
        });
        let engine_slot = slot.clone();
        let next = Arc::new(Mutex::new(Some(next)));
        let ctx = ctx.with_engine_factory(Arc::new(move |_: &Config| -> EngineResult {
            Ok(Some(Box::new(ReconfiguringEngine {
                slot: engine_slot.clone(),
                next: Mutex::new(next.lock().unwrap().take()),
            }) as Box<dyn Engine>))
        }));

        let (tx, rx) = bounded(16);
        let mut sensor = MessagesSensor::on_create(ctx, tx).unwrap();
        sensor.on_start_command();
        provider.insert(ProviderRow {
            message_type: 1,
            date: 1,
            address: None,
        });
        while let Ok(message) = rx.try_recv() {
            let _ = sensor.handle_message(message);
        }

        assert_eq!(slot.read(|c| c.label.clone()), "new");
        let delivered = old_rx.try_recv().unwrap();
        assert_eq!(delivered.label, "old");
        assert!(new_rx.try_recv().is_err());
    }

    #[test]
    fn test_drop_destroys() {
        let f = Fixture::new(StaticPermissions::all_granted());
        let recorded = f.recorded.clone();
        let bus = f.bus.clone();
        drop(f);
        assert_eq!(recorded.lock().unwrap().closes, 1);
        assert_eq!(bus.receiver_count(), 0);
    }

    #[test]
    fn test_destroy_message_breaks_loop() {
        let mut f = Fixture::new(StaticPermissions::all_granted());
        assert!(f.sensor.handle_message(HandlerMessage::Destroy).is_break());
        assert_eq!(f.sensor.state(), ServiceState::Destroyed);
    }

    #[test]
    fn test_stats_count_by_kind() {
        let provider = Arc::new(InMemoryProvider::new());
        let stats = create_shared_log();
        let ctx = SensorContext::new(provider.clone(), Arc::new(StaticPermissions::all_granted()))
            .with_engine_factory(Arc::new(|_: &Config| -> EngineResult { Ok(None) }))
            .with_stats(stats.clone());
        let (tx, rx) = bounded(16);
        let mut sensor = MessagesSensor::on_create(ctx, tx).unwrap();
        sensor.on_start_command();

        for (message_type, date) in [(1, 1), (2, 2), (5, 3)] {
            provider.insert(ProviderRow {
                message_type,
                date,
                address: None,
            });
        }
        while let Ok(message) = rx.try_recv() {
            let _ = sensor.handle_message(message);
        }

        let s = stats.stats();
        assert_eq!(s.messages_received, 1);
        assert_eq!(s.messages_sent, 1);
        assert_eq!(s.messages_unclassified, 1);
        // No engine configured, so nothing was stored
        assert_eq!(s.records_stored, 0);
    }
}
