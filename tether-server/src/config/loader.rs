//! Configuration loader

use std::path::Path;

use tether_utils::{config_file, Result, TetherError};

use super::ShellConfig;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<ShellConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(ShellConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<ShellConfig> {
        if !path.exists() {
            return Err(TetherError::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| TetherError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<ShellConfig> {
        toml::from_str(content).map_err(|e| TetherError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &ShellConfig) -> Result<()> {
        if config.app_name.trim().is_empty() {
            return Err(TetherError::config("app_name must not be empty"));
        }

        if config.server.max_clients == 0 {
            return Err(TetherError::config("max_clients must be at least 1"));
        }

        if config.server.backlog == 0 {
            return Err(TetherError::config("backlog must be at least 1"));
        }

        if config.server.port.is_none() && config.server.begin_port >= config.server.end_port {
            return Err(TetherError::config(format!(
                "begin_port ({}) must be below end_port ({})",
                config.server.begin_port, config.server.end_port
            )));
        }

        Ok(())
    }

    /// Load from an explicit path (or the default location) and validate
    pub fn load_and_validate(path: Option<&Path>) -> Result<ShellConfig> {
        let config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::load()?,
        };
        Self::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CONFIG_TOML;
    use tempfile::tempdir;

    #[test]
    fn test_load_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(
            &path,
            r#"
            app_name = "billing"

            [server]
            port = 6500
            max_clients = 4
            "#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_path(&path).unwrap();
        assert_eq!(config.app_name, "billing");
        assert_eq!(config.server.port, Some(6500));
        assert_eq!(config.server.max_clients, 4);
        // Untouched fields keep defaults
        assert_eq!(config.server.backlog, 16);
    }

    #[test]
    fn test_load_missing_explicit_path() {
        let result = ConfigLoader::load_from_path(Path::new("/nonexistent/tether.toml"));
        assert!(matches!(result, Err(TetherError::ConfigNotFound(_))));
    }

    #[test]
    fn test_default_toml_matches_defaults() {
        let config = ConfigLoader::parse(DEFAULT_CONFIG_TOML, Path::new("default.toml")).unwrap();
        assert_eq!(config, ShellConfig::default());
    }

    #[test]
    fn test_invalid_bind_addr_rejected() {
        let result = ConfigLoader::parse(
            r#"
            [server]
            bind_addr = "not-an-address"
            "#,
            Path::new("test.toml"),
        );
        assert!(matches!(result, Err(TetherError::ConfigInvalid { .. })));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = ConfigLoader::parse("invalid { toml", Path::new("test.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_zero_clients() {
        let mut config = ShellConfig::default();
        config.server.max_clients = 0;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_inverted_range() {
        let mut config = ShellConfig::default();
        config.server.begin_port = 7000;
        config.server.end_port = 6000;
        assert!(ConfigLoader::validate(&config).is_err());

        // A fixed port makes the range irrelevant
        config.server.port = Some(6100);
        assert!(ConfigLoader::validate(&config).is_ok());
    }
}
