//! Configuration schema structs

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_utils::{derive_port, LogConfig, LogOutput, Result, DEFAULT_BEGIN_PORT, DEFAULT_END_PORT};

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Hosting application name
    pub app_name: String,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            app_name: "tether".into(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ShellConfig {
    /// Port the server listens on
    ///
    /// A fixed `port` wins; otherwise the port is derived from `app_name`.
    pub fn listen_port(&self) -> Result<u16> {
        match self.server.port {
            Some(port) => Ok(port),
            None => derive_port(&self.app_name, self.server.begin_port, self.server.end_port),
        }
    }
}

/// Listener and admission settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind (default: 127.0.0.1)
    pub bind_addr: IpAddr,
    /// Fixed port; 0 asks the OS for an ephemeral port
    pub port: Option<u16>,
    /// First port of the derivation range (inclusive)
    pub begin_port: u16,
    /// End of the derivation range (exclusive)
    pub end_port: u16,
    /// Listen backlog
    pub backlog: u32,
    /// Maximum concurrent client connections
    pub max_clients: usize,
    /// Pause after each protocol loop iteration in milliseconds
    pub idle_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: None,
            begin_port: DEFAULT_BEGIN_PORT,
            end_port: DEFAULT_END_PORT,
            backlog: 16,
            max_clients: 2,
            idle_delay_ms: 100,
        }
    }
}

impl ServerConfig {
    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `TETHER_LOG`
    pub filter: String,
    /// "stderr", "file" or "both"
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            output: "stderr".into(),
        }
    }
}

impl LoggingConfig {
    /// Build the subscriber configuration
    pub fn to_log_config(&self) -> Result<LogConfig> {
        let output: LogOutput = self.output.parse()?;
        let mut config = LogConfig::server();
        config.output = output;
        if std::env::var(tether_utils::LOG_ENV).is_err() {
            config.filter = self.filter.clone();
        }
        Ok(config)
    }
}
