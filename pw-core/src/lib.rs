//! PulseWatch Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by all other PulseWatch crates:
//! - Application configuration (server address, reconnect policy, buffers)
//! - Global error type covering all error categories
//! - Structured logging with tracing
//! - Platform directory lookup
//! - Common constants

pub mod config;
pub mod error;
pub mod logging;
pub mod platform;
pub mod constants;

// Re-export commonly used items at the crate root
pub use config::AppConfig;
pub use error::{PulseError, PulseResult};
pub use logging::init_logging;
