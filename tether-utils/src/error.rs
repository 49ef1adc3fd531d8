//! Error types for tether
//!
//! Provides a unified error type used across all tether crates.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Main error type for tether operations
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Connection Errors ===

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Connection timeout after {seconds}s")]
    ConnectionTimeout { seconds: u64 },

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    // === Protocol Errors ===

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    // === Dispatch Errors ===

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid arguments for '{command}': {message}")]
    InvalidArgument { command: String, message: String },

    #[error("Command '{command}' declares {count} context parameters, at most one is supported")]
    MultipleContextParameters { command: String, count: usize },

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("A command is already running and another is queued")]
    LaneBusy,

    // === Context Errors ===

    #[error("Context already completed")]
    ContextCompleted,

    // === Cache Errors ===

    #[error("Cache operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("Cache error: {0}")]
    Cache(String),

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TetherError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid argument error for a command
    pub fn invalid_argument(command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidArgument {
            command: command.into(),
            message: msg.into(),
        }
    }

    /// Create a command failure
    pub fn command_failed(command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            message: msg.into(),
        }
    }

    /// Create a cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error means the peer is gone
    ///
    /// Peer resets, broken pipes and end-of-stream are terminal for a
    /// connection; everything else can be reported back over it.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// Result type alias using TetherError
pub type Result<T> = std::result::Result<T, TetherError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Display Tests ====================

    #[test]
    fn test_error_display_unknown_command() {
        let err = TetherError::UnknownCommand("frobnicate".into());
        assert_eq!(err.to_string(), "Unknown command: frobnicate");
    }

    #[test]
    fn test_error_display_file_read() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied");
        let err = TetherError::FileRead {
            path: PathBuf::from("/etc/tether.toml"),
            source: io_err,
        };
        let msg = err.to_string();
        assert!(msg.contains("Failed to read file"));
        assert!(msg.contains("/etc/tether.toml"));
    }

    #[test]
    fn test_error_display_bind() {
        let err = TetherError::Bind {
            addr: "127.0.0.1:60100".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("127.0.0.1:60100"));
    }

    #[test]
    fn test_error_display_multiple_context_parameters() {
        let err = TetherError::MultipleContextParameters {
            command: "deploy".into(),
            count: 2,
        };
        assert_eq!(
            err.to_string(),
            "Command 'deploy' declares 2 context parameters, at most one is supported"
        );
    }

    #[test]
    fn test_error_display_invalid_argument() {
        let err = TetherError::invalid_argument("sum", "missing required argument 'a'");
        assert_eq!(
            err.to_string(),
            "Invalid arguments for 'sum': missing required argument 'a'"
        );
    }

    #[test]
    fn test_error_display_config_invalid() {
        let err = TetherError::ConfigInvalid {
            path: PathBuf::from("/home/user/.config/tether/config.toml"),
            message: "syntax error".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Invalid configuration"));
        assert!(msg.contains("config.toml"));
        assert!(msg.contains("syntax error"));
    }

    #[test]
    fn test_error_display_unsupported() {
        let err = TetherError::Unsupported("eval");
        assert_eq!(err.to_string(), "Cache operation not supported: eval");
    }

    // ==================== Disconnect Tests ====================

    #[test]
    fn test_disconnect_kinds() {
        for kind in [
            std::io::ErrorKind::ConnectionReset,
            std::io::ErrorKind::ConnectionAborted,
            std::io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::UnexpectedEof,
        ] {
            let err = TetherError::Io(std::io::Error::new(kind, "gone"));
            assert!(err.is_disconnect(), "Expected {:?} to be a disconnect", kind);
        }
        assert!(TetherError::ConnectionClosed.is_disconnect());
    }

    #[test]
    fn test_not_disconnect_errors() {
        let others = [
            TetherError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad")),
            TetherError::InvalidMessage("garbage".into()),
            TetherError::UnknownCommand("x".into()),
            TetherError::LaneBusy,
            TetherError::ContextCompleted,
        ];
        for err in others {
            assert!(!err.is_disconnect(), "Expected {:?} to NOT be a disconnect", err);
        }
    }

    // ==================== From Trait Tests ====================

    #[test]
    fn test_from_io_error_preserves_kind() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: TetherError = io_err.into();
        if let TetherError::Io(inner) = err {
            assert_eq!(inner.kind(), std::io::ErrorKind::PermissionDenied);
        } else {
            panic!("Expected Io variant");
        }
    }

    // ==================== Helper Function Tests ====================

    #[test]
    fn test_command_failed_helper() {
        let err = TetherError::command_failed("restart", "service busy");
        assert!(matches!(err, TetherError::CommandFailed { .. }));
        assert_eq!(err.to_string(), "Command 'restart' failed: service busy");
    }

    #[test]
    fn test_protocol_helper() {
        let err = TetherError::protocol("unexpected signal");
        assert_eq!(err.to_string(), "Protocol error: unexpected signal");
    }
}
