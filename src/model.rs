//! Message event records.
//!
//! Field names follow the AWARE JSON format so stored rows and sync
//! payloads are readable by the rest of the AWARE tooling.
//!
//! Privacy note: `trace` holds the counterpart's address in clear text.
//! Message bodies are never read.

use crate::platform::ProviderRow;
use chrono::{Local, Offset, Utc};
use serde::{Deserialize, Serialize};

/// Table that message events are stored under.
pub const TABLE_NAME: &str = "messageData";

/// Schema version of [`MessageData`].
pub const JSON_VERSION: i32 = 1;

/// Provider direction code for an inbox message.
pub const MESSAGE_INBOX: i32 = 1;

/// Provider direction code for a sent message.
pub const MESSAGE_SENT: i32 = 2;

/// Direction of a message as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Inbox,
    Sent,
    /// Drafts, outbox, failed and anything else the provider reports
    Other(i32),
}

impl MessageKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            MESSAGE_INBOX => MessageKind::Inbox,
            MESSAGE_SENT => MessageKind::Sent,
            other => MessageKind::Other(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            MessageKind::Inbox => MESSAGE_INBOX,
            MessageKind::Sent => MESSAGE_SENT,
            MessageKind::Other(code) => code,
        }
    }
}

/// One observed message event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageData {
    /// Record creation time (ms since epoch)
    pub timestamp: i64,
    pub device_id: String,
    pub label: String,
    /// Local UTC offset in hours at creation
    pub timezone: i32,
    pub os: String,
    pub json_version: i32,

    /// Provider timestamp of the message (ms since epoch)
    pub event_timestamp: i64,
    /// Provider direction code
    #[serde(rename = "type")]
    pub message_type: i32,
    /// Counterpart address
    pub trace: Option<String>,
}

impl Default for MessageData {
    fn default() -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            device_id: String::new(),
            label: String::new(),
            timezone: local_utc_offset_hours(),
            os: std::env::consts::OS.to_string(),
            json_version: JSON_VERSION,
            event_timestamp: 0,
            message_type: -1,
            trace: None,
        }
    }
}

impl MessageData {
    /// Build a record for a provider row, stamped now.
    pub fn from_row(row: &ProviderRow, device_id: &str, label: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            label: label.to_string(),
            event_timestamp: row.date,
            message_type: row.message_type,
            trace: row.address.clone(),
            ..Self::default()
        }
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::from_code(self.message_type)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl std::fmt::Display for MessageData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_json() {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(std::fmt::Error),
        }
    }
}

fn local_utc_offset_hours() -> i32 {
    Local::now().offset().fix().local_minus_utc() / 3600
}
