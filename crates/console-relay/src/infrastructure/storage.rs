//! TOML configuration file.
//!
//! ```toml
//! log_level = "info"
//!
//! [upstream]
//! endpoint = "ws://control.example.net/graphql"
//! token = "..."
//! ping_interval_secs = 30
//! connect_timeout_secs = 10
//!
//! [reconnect]
//! base_delay_ms = 2000
//! max_delay_ms = 60000
//! jitter_ms = 500
//!
//! [buffer]
//! capacity = 1000
//! announcement_cooldown_secs = 300
//!
//! [commands]
//! timeout_secs = 10
//! sweep_interval_secs = 30
//! grace_window_ms = 2000
//! server_info_markers = ["hostname", "maxplayers"]
//!
//! [commands.hints]
//! "oxide.reload" = ["reloaded"]
//!
//! [rate_limit]
//! window_ms = 1000
//! max_calls = 5
//! mode = "block"
//!
//! [[servers]]
//! id = 42
//! region = "EU"
//! name = "Main EU"
//! ```
//!
//! Every field has a serde default, so a partial file (or none at all) is a
//! valid configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use console_core::{BackoffPolicy, CorrelationConfig};

use crate::domain::{ConsoleConfig, RateLimitMode, RegisteredServer, StaticRegistry};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// On-disk shape of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub buffer: BufferSection,
    #[serde(default)]
    pub commands: CommandsSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub servers: Vec<RegisteredServer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamSection {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Empty string disables the sub-protocol header.
    #[serde(default = "default_subprotocol")]
    pub subprotocol: String,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectSection {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSection {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_announcement_cooldown_secs")]
    pub announcement_cooldown_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandsSection {
    #[serde(default = "default_command_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_grace_window_ms")]
    pub grace_window_ms: u64,
    /// Replaces the built-in marker list when non-empty.
    #[serde(default)]
    pub server_info_markers: Vec<String>,
    /// Merged over the built-in hints, per verb.
    #[serde(default)]
    pub hints: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_max_calls")]
    pub max_calls: usize,
    #[serde(default)]
    pub mode: RateLimitMode,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_endpoint() -> String {
    ConsoleConfig::default().endpoint
}
fn default_subprotocol() -> String {
    "graphql-ws".to_string()
}
fn default_ping_interval_secs() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_base_delay_ms() -> u64 {
    2_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_jitter_ms() -> u64 {
    500
}
fn default_capacity() -> usize {
    1_000
}
fn default_announcement_cooldown_secs() -> u64 {
    300
}
fn default_command_timeout_secs() -> u64 {
    10
}
fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_grace_window_ms() -> u64 {
    2_000
}
fn default_window_ms() -> u64 {
    1_000
}
fn default_max_calls() -> usize {
    5
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            upstream: UpstreamSection::default(),
            reconnect: ReconnectSection::default(),
            buffer: BufferSection::default(),
            commands: CommandsSection::default(),
            rate_limit: RateLimitSection::default(),
            servers: Vec::new(),
        }
    }
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: None,
            subprotocol: default_subprotocol(),
            ping_interval_secs: default_ping_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            announcement_cooldown_secs: default_announcement_cooldown_secs(),
        }
    }
}

impl Default for CommandsSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_command_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            grace_window_ms: default_grace_window_ms(),
            server_info_markers: Vec::new(),
            hints: HashMap::new(),
        }
    }
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_calls: default_max_calls(),
            mode: RateLimitMode::default(),
        }
    }
}

fn lowercase_all(items: &[String]) -> Vec<String> {
    items.iter().map(|s| s.to_lowercase()).collect()
}

impl ConfigFile {
    /// Runtime configuration described by this file.
    pub fn to_console_config(&self) -> ConsoleConfig {
        let mut correlation = CorrelationConfig {
            timeout: Duration::from_secs(self.commands.timeout_secs),
            grace_window: Duration::from_millis(self.commands.grace_window_ms),
            ..CorrelationConfig::default()
        };
        if !self.commands.server_info_markers.is_empty() {
            correlation.server_info_markers = lowercase_all(&self.commands.server_info_markers);
        }
        for (verb, needles) in &self.commands.hints {
            correlation
                .hints
                .insert(verb.to_lowercase(), lowercase_all(needles));
        }

        let subprotocol = Some(self.upstream.subprotocol.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        ConsoleConfig {
            endpoint: self.upstream.endpoint.clone(),
            token: self.upstream.token.clone(),
            subprotocol,
            backoff: BackoffPolicy {
                base: Duration::from_millis(self.reconnect.base_delay_ms),
                cap: Duration::from_millis(self.reconnect.max_delay_ms),
                jitter: Duration::from_millis(self.reconnect.jitter_ms),
            },
            connect_timeout: Duration::from_secs(self.upstream.connect_timeout_secs),
            ping_interval: Duration::from_secs(self.upstream.ping_interval_secs.max(1)),
            buffer_capacity: self.buffer.capacity,
            announcement_cooldown: Duration::from_secs(self.buffer.announcement_cooldown_secs),
            correlation,
            sweep_interval: Duration::from_secs(self.commands.sweep_interval_secs.max(1)),
            rate_limit_window: Duration::from_millis(self.rate_limit.window_ms),
            rate_limit_max_calls: self.rate_limit.max_calls.max(1),
            rate_limit_mode: self.rate_limit.mode,
            ..ConsoleConfig::default()
        }
    }

    /// Registry of the `[[servers]]` entries.
    pub fn registry(&self) -> StaticRegistry {
        self.servers.iter().cloned().collect()
    }
}

/// Loads the configuration at `path`, returning defaults if the file does
/// not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use console_core::Region;
    use uuid::Uuid;

    use super::*;
    use crate::domain::ServerRegistry;

    #[test]
    fn test_empty_file_yields_runtime_defaults() {
        // Arrange / Act
        let file: ConfigFile = toml::from_str("").unwrap();
        let cfg = file.to_console_config();
        let defaults = ConsoleConfig::default();

        // Assert
        assert_eq!(file, ConfigFile::default());
        assert_eq!(cfg.endpoint, defaults.endpoint);
        assert_eq!(cfg.backoff, defaults.backoff);
        assert_eq!(cfg.buffer_capacity, defaults.buffer_capacity);
        assert_eq!(cfg.correlation, defaults.correlation);
        assert_eq!(cfg.sweep_interval, defaults.sweep_interval);
        assert_eq!(cfg.subprotocol, defaults.subprotocol);
    }

    #[test]
    fn test_partial_sections_override_defaults() {
        let file: ConfigFile = toml::from_str(
            r#"
            [reconnect]
            base_delay_ms = 250

            [rate_limit]
            mode = "reject"
            max_calls = 2
            "#,
        )
        .unwrap();
        let cfg = file.to_console_config();

        assert_eq!(cfg.backoff.base, Duration::from_millis(250));
        assert_eq!(cfg.backoff.cap, Duration::from_secs(60));
        assert_eq!(cfg.rate_limit_mode, RateLimitMode::Reject);
        assert_eq!(cfg.rate_limit_max_calls, 2);
    }

    #[test]
    fn test_zero_max_calls_is_raised_to_one() {
        let file: ConfigFile = toml::from_str(
            r#"
            [rate_limit]
            max_calls = 0
            "#,
        )
        .unwrap();

        assert_eq!(file.to_console_config().rate_limit_max_calls, 1);
    }

    #[test]
    fn test_servers_populate_registry() {
        let file: ConfigFile = toml::from_str(
            r#"
            [[servers]]
            id = 42
            region = "EU"
            name = "Main"

            [[servers]]
            id = 7
            region = "AS"
            "#,
        )
        .unwrap();
        let registry = file.registry();

        assert_eq!(registry.server_ids(), vec![7, 42]);
        assert_eq!(registry.region_of(42), Some(Region::Eu));
        assert_eq!(registry.get(42).unwrap().name.as_deref(), Some("Main"));
    }

    #[test]
    fn test_hints_and_markers_are_lowercased() {
        let file: ConfigFile = toml::from_str(
            r#"
            [commands]
            server_info_markers = ["HostName"]

            [commands.hints]
            "Teleport" = ["Teleported"]
            "#,
        )
        .unwrap();
        let cfg = file.to_console_config();

        assert_eq!(cfg.correlation.server_info_markers, vec!["hostname"]);
        assert_eq!(cfg.correlation.hints["teleport"], vec!["teleported"]);
        assert!(cfg.correlation.hints.contains_key("kick"));
    }

    #[test]
    fn test_empty_subprotocol_disables_header() {
        let file: ConfigFile = toml::from_str("[upstream]\nsubprotocol = \"\"").unwrap();
        assert_eq!(file.to_console_config().subprotocol, None);
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let result = toml::from_str::<ConfigFile>("[upstream\nendpoint = 1");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/console-relay.toml");
        assert_eq!(load_config(&path).unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_save_and_load_round_trip_via_temp_dir() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("console_relay_test_{}", Uuid::new_v4()));
        let path = dir.join("console-relay.toml");
        let mut file = ConfigFile::default();
        file.upstream.token = Some("secret".to_string());
        file.servers.push(RegisteredServer {
            id: 3,
            region: Region::Us,
            name: None,
        });

        // Act
        save_config(&path, &file).unwrap();
        let loaded = load_config(&path).unwrap();

        // Assert
        assert_eq!(loaded, file);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }
}
