//! AWARE messages sensor CLI
//!
//! Records SMS activity from an exported Android message store.

use anyhow::{bail, Context, Result};
use aware_sensor_messages::{
    config::{Config, DbType},
    model::{MessageData, MessageKind, TABLE_NAME},
    platform::{
        missing_permissions, BroadcastBus, Intent, PermissionChecker, SmsDatabasePermissions,
        SmsDatabaseProvider, REQUIRED_PERMISSIONS,
    },
    sensor::{
        MessagesSensorBroadcastReceiver, SensorContext, SensorHost, ACTION_AWARE_MESSAGES_SET_LABEL,
        ACTION_AWARE_MESSAGES_STOP, EXTRA_LABEL, SENSOR_START_ENABLED, SENSOR_STOP_ALL,
    },
    storage::open_engine,
    transparency::create_shared_log_with_persistence,
    PRIVACY_DECLARATION, VERSION,
};
use chrono::{Local, TimeZone, Utc};
use clap::{Parser, Subcommand};
use crossbeam_channel::{unbounded, RecvTimeoutError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aware-messages")]
#[command(author = "AWARE Framework")]
#[command(version = VERSION)]
#[command(about = "Records SMS activity (type, time, address) for research", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sensor in the foreground until Ctrl+C
    Start {
        /// Path to the Android message store (mmssms.db)
        #[arg(long)]
        sms_db: PathBuf,

        /// Label attached to every record
        #[arg(long)]
        label: Option<String>,

        /// Device identifier attached to every record
        #[arg(long)]
        device_id: Option<String>,

        /// Storage backend (sqlite, json or none)
        #[arg(long)]
        db_type: Option<String>,

        /// Database name or path
        #[arg(long)]
        db_path: Option<String>,

        /// Remote host that `sync` uploads to
        #[arg(long)]
        db_host: Option<String>,

        /// How often the message store is checked for new rows
        #[arg(long, default_value = "1000")]
        poll_interval_ms: u64,
    },

    /// Change the label of a running or future session
    SetLabel {
        label: String,
    },

    /// Upload stored records to the configured database host
    Sync,

    /// Allow the sensor to record
    Enable,

    /// Stop recording without exiting a running session
    Disable,

    /// Show current sensor status
    Status {
        /// Message store to check access for
        #[arg(long)]
        sms_db: Option<PathBuf>,
    },

    /// Display privacy declaration
    Privacy,

    /// Export stored records
    Export {
        /// Output directory
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Export format (json or jsonl)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Show configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Commands::Start {
            sms_db,
            label,
            device_id,
            db_type,
            db_path,
            db_host,
            poll_interval_ms,
        } => {
            let mut config = Config::load().unwrap_or_default();
            config.debug = cli.debug;
            if let Some(label) = label {
                config.label = label;
            }
            if let Some(device_id) = device_id {
                config.device_id = device_id;
            }
            if let Some(db_type) = db_type {
                config.db_type = DbType::parse(&db_type)
                    .with_context(|| format!("Unknown database type '{db_type}'"))?;
            }
            if let Some(db_path) = db_path {
                config.db_path = db_path;
            }
            if db_host.is_some() {
                config.db_host = db_host;
            }
            cmd_start(config, sms_db, Duration::from_millis(poll_interval_ms))
        }
        Commands::SetLabel { label } => cmd_set_label(label),
        Commands::Sync => cmd_sync(),
        Commands::Enable => cmd_set_enabled(true),
        Commands::Disable => cmd_set_enabled(false),
        Commands::Status { sms_db } => cmd_status(sms_db),
        Commands::Privacy => {
            println!("{PRIVACY_DECLARATION}");
            Ok(())
        }
        Commands::Export { output, format } => cmd_export(output, &format),
        Commands::Config => cmd_config(),
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // A second init (tests, embedding) is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

fn cmd_start(config: Config, sms_db: PathBuf, poll_interval: Duration) -> Result<()> {
    println!("AWARE Messages Sensor v{VERSION}");
    println!();

    if !sms_db.exists() {
        bail!("Message store not found: {sms_db:?}");
    }

    // Persist the merged settings so set-label/enable/disable edit the same file
    config.save().context("Could not save configuration")?;
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let permissions = Arc::new(SmsDatabasePermissions::new(&sms_db));
    let missing = missing_permissions(permissions.as_ref(), &REQUIRED_PERMISSIONS);
    if !missing.is_empty() {
        eprintln!("Warning: Missing access: {missing:?}");
        eprintln!("The sensor will start but cannot observe messages.");
        eprintln!();
    }

    println!("Starting sensor...");
    println!("  Message store: {sms_db:?}");
    println!("  Device ID: {}", config.device_id);
    println!("  Label: {:?}", config.label);
    println!("  Storage: {} ({:?})", config.db_type, config.database_path());
    match &config.db_host {
        Some(host) => println!("  Sync host: {host}"),
        None => println!("  Sync host: none"),
    }
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let stats = create_shared_log_with_persistence(config.data_path.join("transparency.json"));

    // The observer hands records to this loop for display
    let (record_tx, record_rx) = unbounded::<MessageData>();
    let mut enabled = config.enabled;
    let mut label = config.label.clone();
    let live_config = config.with_observer(move |data: &MessageData| {
        let _ = record_tx.send(data.clone());
    });

    let provider = Arc::new(SmsDatabaseProvider::with_poll_interval(&sms_db, poll_interval));
    let bus = BroadcastBus::new();
    let ctx = SensorContext::new(provider, permissions)
        .with_bus(bus.clone())
        .with_config(live_config)
        .with_stats(stats.clone());
    let live = ctx.config.clone();

    let host = Arc::new(Mutex::new(SensorHost::new(ctx)));
    let receiver = Arc::new(MessagesSensorBroadcastReceiver::new(host.clone()));
    receiver.register(&bus);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")?;

    if enabled {
        bus.send_broadcast(&Intent::new(SENSOR_START_ENABLED));
    } else {
        println!("The sensor is currently disabled.");
        println!("Run `aware-messages enable` to start recording.");
        println!();
    }

    let mut last_config_check = Instant::now();

    while running.load(Ordering::SeqCst) {
        // Reload the config file so other invocations can steer this session
        if last_config_check.elapsed() >= Duration::from_secs(1) {
            if let Ok(cfg) = Config::load() {
                if cfg.label != label {
                    label = cfg.label;
                    println!("Label changed to {label:?}");
                    bus.send_broadcast(
                        &Intent::new(ACTION_AWARE_MESSAGES_SET_LABEL)
                            .with_extra(EXTRA_LABEL, label.clone()),
                    );
                }
                if cfg.enabled != enabled {
                    enabled = cfg.enabled;
                    live.write(|c| c.enabled = enabled);
                    if enabled {
                        println!("Resuming recording...");
                        bus.send_broadcast(&Intent::new(SENSOR_START_ENABLED));
                    } else {
                        println!("Pausing recording...");
                        bus.send_broadcast(&Intent::new(ACTION_AWARE_MESSAGES_STOP));
                    }
                }
            }
            last_config_check = Instant::now();
        }

        match record_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(data) => print_record(&data),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                eprintln!("Sensor observer disconnected unexpectedly");
                break;
            }
        }
    }

    println!();
    println!("Stopping sensor...");
    bus.send_broadcast(&Intent::new(SENSOR_STOP_ALL));

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save transparency log: {e}");
    }
    println!();
    println!("{}", stats.summary());

    Ok(())
}

fn print_record(data: &MessageData) {
    let when = Local
        .timestamp_millis_opt(data.event_timestamp)
        .single()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| data.event_timestamp.to_string());
    let kind = match data.kind() {
        MessageKind::Inbox => "received".to_string(),
        MessageKind::Sent => "sent".to_string(),
        MessageKind::Other(code) => format!("type {code}"),
    };
    println!(
        "[{when}] Message {kind}: {}",
        data.trace.as_deref().unwrap_or("unknown address")
    );
}

fn cmd_set_label(label: String) -> Result<()> {
    let mut config = Config::load().unwrap_or_default();
    config.label = label;
    config.save().context("Error saving config")?;
    println!("Label set to {:?}.", config.label);
    Ok(())
}

fn cmd_set_enabled(enabled: bool) -> Result<()> {
    let mut config = Config::load().unwrap_or_default();
    if config.enabled == enabled {
        println!(
            "Sensor is already {}.",
            if enabled { "enabled" } else { "disabled" }
        );
        return Ok(());
    }

    config.enabled = enabled;
    config.save().context("Error saving config")?;
    println!(
        "Sensor {}.",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

fn cmd_sync() -> Result<()> {
    let config = Config::load().context("Could not load configuration")?;
    if config.db_host.is_none() {
        println!("No database host configured. Nothing to sync.");
        return Ok(());
    }

    let Some(mut engine) = open_engine(&config)? else {
        println!("Storage is disabled (db_type = none). Nothing to sync.");
        return Ok(());
    };

    let result = engine.start_sync(TABLE_NAME);
    engine.close()?;
    let uploaded = result?;
    println!("Synced {uploaded} record(s) to {}", config.db_host.unwrap_or_default());
    Ok(())
}

fn cmd_status(sms_db: Option<PathBuf>) -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("AWARE Messages Sensor Status");
    println!("============================");
    println!();

    if let Some(sms_db) = sms_db {
        let permissions = SmsDatabasePermissions::new(&sms_db);
        println!("Message store access ({sms_db:?}):");
        for permission in REQUIRED_PERMISSIONS {
            println!(
                "  {permission}: {}",
                if permissions.is_granted(permission) {
                    "Granted ✓"
                } else {
                    "Not Granted ✗"
                }
            );
        }
        println!();
    }

    println!("Configuration:");
    println!("  Enabled: {}", config.enabled);
    println!("  Label: {:?}", config.label);
    println!("  Storage: {} ({:?})", config.db_type, config.database_path());
    println!();

    let stats_path = config.data_path.join("transparency.json");
    match std::fs::read_to_string(&stats_path) {
        Ok(content) => {
            let stats: serde_json::Value = serde_json::from_str(&content)
                .with_context(|| format!("Corrupt statistics file {stats_path:?}"))?;
            println!("Cumulative Statistics:");
            for (key, name) in [
                ("messages_received", "Messages received"),
                ("messages_sent", "Messages sent"),
                ("messages_unclassified", "Other message events"),
                ("records_stored", "Records stored"),
            ] {
                if let Some(value) = stats.get(key) {
                    println!("  {name}: {value}");
                }
            }
            if let Some(updated) = stats.get("last_updated") {
                println!("  Last updated: {updated}");
            }
        }
        Err(_) => println!("No previous session data found."),
    }

    Ok(())
}

fn cmd_export(output: Option<PathBuf>, format: &str) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let export_dir = output.unwrap_or_else(|| config.data_path.join("exports"));

    let Some(mut engine) = open_engine(&config)? else {
        println!("Storage is disabled (db_type = none). Nothing to export.");
        return Ok(());
    };
    let records = engine.records(TABLE_NAME);
    engine.close()?;
    let records = records?;

    if records.is_empty() {
        println!("No records found in {:?}", config.database_path());
        println!("Run 'aware-messages start' to begin recording.");
        return Ok(());
    }
    println!("Total records: {}", records.len());

    let jsonl = format == "jsonl";
    std::fs::create_dir_all(&export_dir)
        .with_context(|| format!("Could not create {export_dir:?}"))?;
    let output_path = export_dir.join(format!(
        "{TABLE_NAME}_{}.{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        if jsonl { "jsonl" } else { "json" }
    ));

    let content = if jsonl {
        records
            .iter()
            .map(serde_json::to_string)
            .collect::<serde_json::Result<Vec<_>>>()?
            .join("\n")
    } else {
        serde_json::to_string_pretty(&records)?
    };
    std::fs::write(&output_path, content)
        .with_context(|| format!("Error writing export to {output_path:?}"))?;

    println!("Exported to {output_path:?}");
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
