//! Default configuration values

/// Default configuration as TOML (for reference/documentation)
pub const DEFAULT_CONFIG_TOML: &str = r##"
# tether configuration

# Identifies the hosting application; also selects the listening port
# when no fixed port is set below.
app_name = "tether"

[server]
bind_addr = "127.0.0.1"
# port = 60123
begin_port = 60100
end_port = 60200
backlog = 16
max_clients = 2
# Pause after every protocol loop iteration, 0 disables it
idle_delay_ms = 100

[logging]
filter = "info"
output = "stderr"
"##;
