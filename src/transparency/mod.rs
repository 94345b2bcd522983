//! Transparency statistics.
//!
//! Tracks how many message events the sensor observed and stored so users
//! can see what is being collected.

pub mod log;

pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog,
    TransparencyStats,
};
