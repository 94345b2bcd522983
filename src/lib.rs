//! AWARE messages sensor.
//!
//! Watches the device's SMS store and records one event per change: the
//! type (received or sent), the time it happened and the counterpart
//! address. Events are stored through a pluggable engine, handed to an
//! optional observer and announced to other components as broadcasts.
//!
//! # Privacy Guarantees
//!
//! - **No message bodies**: only type, timestamp and address are read
//! - **Local first**: records stay in the local store unless a sync host is configured
//! - **Transparency**: every observed event is counted and auditable
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    AWARE Messages Sensor                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  change   ┌──────────────┐   ┌───────────┐  │
//! │  │  Provider   │─────────▶│ MessagesSensor│──▶│  Engine   │  │
//! │  │ (SMS store) │           │ (handler thr.)│   │ (storage) │  │
//! │  └─────────────┘           └──────────────┘   └───────────┘  │
//! │         ▲                     │        │                     │
//! │         │ query               ▼        ▼                     │
//! │         └──────────────  Observer   BroadcastBus             │
//! │                                     (RECEIVED / SENT)        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use aware_sensor_messages::{
//!     platform::{SmsDatabasePermissions, SmsDatabaseProvider},
//!     Config, SensorContext, SensorHost,
//! };
//!
//! let provider = Arc::new(SmsDatabaseProvider::new("mmssms.db"));
//! let permissions = Arc::new(SmsDatabasePermissions::new("mmssms.db"));
//! let mut host = SensorHost::new(SensorContext::new(provider, permissions));
//!
//! let config = Config::default().with_observer(|data: &aware_sensor_messages::MessageData| {
//!     println!("{data}");
//! });
//! host.start(Some(config)).expect("Failed to start sensor");
//! ```

pub mod config;
pub mod model;
pub mod platform;
pub mod sensor;
pub mod storage;
pub mod transparency;

pub use config::{Config, ConfigError, ConfigSlot, DbType};
pub use model::{MessageData, MessageKind, TABLE_NAME};
pub use sensor::{
    MessageObserver, MessagesSensor, MessagesSensorBroadcastReceiver, SensorContext, SensorError,
    SensorHost, StartMode,
};
pub use storage::{Engine, StorageError};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║           AWARE MESSAGES SENSOR - PRIVACY DECLARATION            ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This sensor records SMS activity metadata for research.         ║
║                                                                  ║
║  ✓ WHAT WE CAPTURE:                                              ║
║    • Whether a message was received or sent                      ║
║    • When it happened (timestamp only)                           ║
║    • The counterpart phone number                                ║
║                                                                  ║
║  ✗ WHAT WE NEVER CAPTURE:                                        ║
║    • Message bodies or subjects                                  ║
║    • Attachments or media                                        ║
║    • Your contact list                                           ║
║                                                                  ║
║  Records are stored locally. They leave the device only when     ║
║  a database host is configured and a sync is requested.          ║
║                                                                  ║
║  You can view collection statistics anytime with:                ║
║    aware-messages status                                         ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privacy_declaration_contents() {
        assert!(PRIVACY_DECLARATION.contains("PRIVACY"));
        assert!(PRIVACY_DECLARATION.contains("NEVER CAPTURE"));
        assert!(PRIVACY_DECLARATION.contains("Message bodies"));
    }
}
