//! Platform seams the sensor runs against.
//!
//! On a device these are the SMS content provider, runtime permissions and
//! the broadcast system. Here each one is a small trait or type with a
//! concrete implementation:
//! - [`InMemoryProvider`] for tests and demos
//! - [`SmsDatabaseProvider`] for an exported Android `mmssms.db`

pub mod intent;
pub mod memory;
pub mod permissions;
pub mod provider;
pub mod sms_db;

// Re-export commonly used types
pub use intent::{BroadcastBus, Intent, IntentFilter, ReceiverCallback, ReceiverId};
pub use memory::InMemoryProvider;
pub use permissions::{
    missing_permissions, Permission, PermissionChecker, StaticPermissions, REQUIRED_PERMISSIONS,
};
pub use provider::{
    ChangeCallback, MessageProvider, ObserverId, ObserverRegistry, ProviderError, ProviderRow,
    MESSAGES_CONTENT_URI,
};
pub use sms_db::{SmsDatabasePermissions, SmsDatabaseProvider};
