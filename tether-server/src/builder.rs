//! Fluent construction of a [`ShellServer`]

use std::sync::Arc;

use tether_utils::Result;

use crate::cache::{MemoryCache, ShellCache};
use crate::config::{ConfigLoader, ShellConfig};
use crate::registry::{Command, CommandRegistry};
use crate::server::ShellServer;

/// Builder for [`ShellServer`]
///
/// ```no_run
/// # use tether_server::{Command, ShellServerBuilder};
/// # fn main() -> tether_utils::Result<()> {
/// let server = ShellServerBuilder::new()
///     .app_name("billing")
///     .register(Command::builder("ping").handler(|_| async { Ok(Some("pong".into())) }))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ShellServerBuilder {
    app_name: Option<String>,
    config: ShellConfig,
    registry: Option<Arc<CommandRegistry>>,
    cache: Option<Arc<dyn ShellCache>>,
    commands: Vec<Command>,
}

impl ShellServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Application name; also selects the derived port. Wins over `config`.
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn config(mut self, config: ShellConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing registry instead of creating one
    pub fn registry(mut self, registry: Arc<CommandRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Storage backend; defaults to [`MemoryCache`]
    pub fn cache(mut self, cache: Arc<dyn ShellCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn register(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn register_all(mut self, commands: impl IntoIterator<Item = Command>) -> Self {
        self.commands.extend(commands);
        self
    }

    /// Validate the configuration and register the commands
    pub fn build(self) -> Result<ShellServer> {
        let mut config = self.config;
        if let Some(app_name) = self.app_name {
            config.app_name = app_name;
        }
        ConfigLoader::validate(&config)?;

        let registry = self.registry.unwrap_or_default();
        for command in self.commands {
            registry.register(command)?;
        }
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryCache::new()) as Arc<dyn ShellCache>);

        Ok(ShellServer::new(config, registry, cache))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_utils::TetherError;

    fn ping() -> Command {
        Command::builder("ping").handler(|_| async { Ok(Some("pong".to_string())) })
    }

    #[test]
    fn test_app_name_overrides_config() {
        let mut config = ShellConfig::default();
        config.app_name = "from-config".into();

        let server = ShellServerBuilder::new()
            .app_name("billing")
            .config(config)
            .build()
            .unwrap();
        assert_eq!(server.config().app_name, "billing");
    }

    #[test]
    fn test_registers_commands() {
        let server = ShellServerBuilder::new().register(ping()).build().unwrap();
        assert!(server.registry().get("ping").is_some());
    }

    #[test]
    fn test_duplicate_command_fails_build() {
        let result = ShellServerBuilder::new().register(ping()).register(ping()).build();
        assert!(matches!(result, Err(TetherError::Config(_))));
    }

    #[test]
    fn test_invalid_config_fails_build() {
        let mut config = ShellConfig::default();
        config.server.max_clients = 0;
        assert!(ShellServerBuilder::new().config(config).build().is_err());
    }

    #[test]
    fn test_shared_registry() {
        let registry = Arc::new(CommandRegistry::new());
        let server = ShellServerBuilder::new()
            .registry(Arc::clone(&registry))
            .register(ping())
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(server.registry(), &registry));
        assert_eq!(registry.len(), 1);
    }
}
