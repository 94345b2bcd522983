//! Demonstration of the AWARE messages sensor against a simulated inbox.
//!
//! This example shows how to:
//! 1. Build a sensor context around an in-memory message provider
//! 2. Start the sensor with an observer
//! 3. Listen for the received/sent broadcasts
//! 4. Change the label of a running sensor
//!
//! Run with: cargo run --example simulated_inbox

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use aware_sensor_messages::{
    config::{Config, DbType},
    model::MessageData,
    platform::{InMemoryProvider, Intent, IntentFilter, ProviderRow, StaticPermissions},
    sensor::{
        ACTION_AWARE_MESSAGES_SET_LABEL, ACTION_AWARE_MESSAGE_RECEIVED, ACTION_AWARE_MESSAGE_SENT,
        EXTRA_LABEL,
    },
    transparency::create_shared_log,
    SensorContext, SensorHost, PRIVACY_DECLARATION,
};

fn main() {
    println!("AWARE Messages Sensor - Simulated Inbox Demo");
    println!("============================================");
    println!();
    println!("{PRIVACY_DECLARATION}");

    let provider = Arc::new(InMemoryProvider::new());
    let stats = create_shared_log();
    let ctx = SensorContext::new(provider.clone(), Arc::new(StaticPermissions::all_granted()))
        .with_stats(stats.clone());
    let bus = ctx.bus.clone();

    let (_, events) = bus.subscribe(
        IntentFilter::new()
            .with_action(ACTION_AWARE_MESSAGE_RECEIVED)
            .with_action(ACTION_AWARE_MESSAGE_SENT),
    );

    let config = Config {
        label: "demo".into(),
        db_type: DbType::None,
        ..Config::default()
    }
    .with_observer(|data: &MessageData| {
        println!("  observer: {data}");
    });

    let mut host = SensorHost::new(ctx);
    if let Err(e) = host.start(Some(config)) {
        eprintln!("Error starting sensor: {e}");
        return;
    }

    let now = chrono::Utc::now().timestamp_millis();
    let script = [
        (1, "+15550100"),
        (2, "+15550101"),
        (1, "+15550102"),
    ];

    for (i, (message_type, address)) in script.iter().enumerate() {
        if i == 2 {
            println!("Switching label to 'evening'");
            bus.send_broadcast(
                &Intent::new(ACTION_AWARE_MESSAGES_SET_LABEL).with_extra(EXTRA_LABEL, "evening"),
            );
        }

        provider.insert(ProviderRow {
            message_type: *message_type,
            date: now + i as i64 * 1_000,
            address: Some(address.to_string()),
        });

        match events.recv_timeout(Duration::from_secs(2)) {
            Ok(intent) => println!("  broadcast: {}", intent.action()),
            Err(_) => eprintln!("  no broadcast received"),
        }
        thread::sleep(Duration::from_millis(200));
    }

    host.stop();

    println!();
    println!("{}", stats.summary());
}
