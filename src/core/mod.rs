// Core module - record types, time model, config, logging

pub mod config;
pub mod logger;
pub mod sc_time;
pub mod types;

// Re-export commonly used items for convenience
pub use config::{ConfigError, SyncConfig};
pub use logger::setup_logging;
pub use types::*;
