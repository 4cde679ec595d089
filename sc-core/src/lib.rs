//! Stream Client Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by the other workspace crates:
//! - Application configuration (server address, credentials, socket tuning)
//! - Unified error type for configuration and I/O failures
//! - Structured logging with tracing
//! - Protocol and tuning constants

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;

// Re-export commonly used items at the crate root
pub use config::AppConfig;
pub use error::{ScError, ScResult};
pub use logging::init_logging;
