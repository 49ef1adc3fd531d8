//! tether-utils: Common utilities shared across tether crates
//!
//! This crate provides:
//! - Unified error types ([`TetherError`], [`Result`])
//! - Logging infrastructure ([`init_logging`], [`LogConfig`])
//! - XDG-compliant path utilities ([`paths`] module)
//! - Application port derivation ([`derive_port`])

pub mod error;
pub mod logging;
pub mod paths;
pub mod port;

// Re-export main types at crate root for convenience
pub use error::{Result, TetherError};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogOutput, LOG_ENV};
pub use paths::{config_dir, config_file, ensure_dir, log_dir, state_dir};
pub use port::{derive_port, DEFAULT_BEGIN_PORT, DEFAULT_END_PORT};
