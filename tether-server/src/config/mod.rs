//! Configuration management for the shell server
//!
//! Configuration is read once at startup from TOML; every section falls back
//! to defaults so an empty file is valid.

mod defaults;
mod loader;
mod schema;

pub use defaults::DEFAULT_CONFIG_TOML;
pub use loader::ConfigLoader;
pub use schema::*;
