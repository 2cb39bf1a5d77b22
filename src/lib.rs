//! World Avatar MCP
//!
//! Exposes an avatar inside a live world server as MCP tools:
//! - Supervision of the world server process (spawn, readiness, teardown)
//! - A single persistent session driving the avatar
//! - An MCP dispatcher mapping tool calls onto session actions
//! - An orchestrator sequencing startup and graceful shutdown

pub mod events;
pub mod mcp;
pub mod orchestrator;
pub mod session;
pub mod supervisor;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: ServerYamlConfig,
    pub session: SessionYamlConfig,
}

/// World server section. Every field is optional; defaults are applied by
/// [`ServerConfig::try_from`].
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYamlConfig {
    pub path: Option<String>,
    pub memory: Option<String>,
    /// Kept wide so out-of-range values reach validation instead of failing parse
    pub port: Option<u32>,
    pub max_players: Option<u32>,
    pub java_runtime: Option<String>,
    /// Extra `server.properties` entries, applied after the derived ones
    pub properties: BTreeMap<String, String>,
}

/// Avatar session section
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYamlConfig {
    pub host: Option<String>,
    /// Session endpoint port; defaults to the server port
    pub port: Option<u16>,
    pub username: Option<String>,
    pub version: Option<String>,
    pub navigation: Option<bool>,
    /// Address of the world gateway bridging the avatar protocol
    pub gateway: Option<String>,
}

// ============================================================================
// Validated config (what the application actually uses)
// ============================================================================

pub const DEFAULT_MEMORY: &str = "2G";
pub const DEFAULT_PORT: u16 = 25565;
pub const DEFAULT_MAX_PLAYERS: u32 = 20;
pub const DEFAULT_USERNAME: &str = "MCPBot";
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.21";
pub const DEFAULT_JAVA_RUNTIME: &str = "java";
pub const DEFAULT_SESSION_HOST: &str = "localhost";
pub const DEFAULT_GATEWAY_ADDR: &str = "127.0.0.1:25580";

/// Configuration validation failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("server process path is required")]
    MissingProcessPath,

    #[error("invalid port number {0}: must be in 1..=65535")]
    InvalidPort(u32),
}

/// Immutable world server configuration, validated once at construction
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub process_path: PathBuf,
    pub memory_allocation: String,
    pub port: u16,
    pub max_players: u32,
    pub username: String,
    pub protocol_version: String,
    pub java_runtime: String,
    pub extra_properties: BTreeMap<String, String>,
}

impl ServerConfig {
    /// Build a config from a process path with every other field defaulted
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        Self::try_from(ServerYamlConfig {
            path: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        })
    }
}

impl TryFrom<ServerYamlConfig> for ServerConfig {
    type Error = ConfigError;

    fn try_from(raw: ServerYamlConfig) -> Result<Self, Self::Error> {
        let process_path = raw
            .path
            .filter(|p| !p.trim().is_empty())
            .ok_or(ConfigError::MissingProcessPath)?;

        let port = match raw.port {
            None => DEFAULT_PORT,
            Some(p) => u16::try_from(p)
                .ok()
                .filter(|p| *p >= 1)
                .ok_or(ConfigError::InvalidPort(p))?,
        };

        Ok(Self {
            process_path: PathBuf::from(process_path),
            memory_allocation: raw
                .memory
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| DEFAULT_MEMORY.into()),
            port,
            max_players: raw
                .max_players
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_PLAYERS),
            username: DEFAULT_USERNAME.into(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.into(),
            java_runtime: raw
                .java_runtime
                .unwrap_or_else(|| DEFAULT_JAVA_RUNTIME.into()),
            extra_properties: raw.properties,
        })
    }
}

/// Connection settings for the avatar session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub version: String,
    /// Load the navigation capability on connect
    pub navigation: bool,
    /// `host:port` of the world gateway
    pub gateway: String,
}

impl SessionSettings {
    /// Settings pointing at the local server described by `server`
    pub fn for_server(server: &ServerConfig) -> Self {
        Self {
            host: DEFAULT_SESSION_HOST.into(),
            port: server.port,
            username: server.username.clone(),
            version: server.protocol_version.clone(),
            navigation: true,
            gateway: DEFAULT_GATEWAY_ADDR.into(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionSettings,
}

impl Config {
    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// `cli_path` (the resolved `--server-jar` flag) wins over both when given.
    pub fn from_yaml_and_env(
        yaml_path: Option<&Path>,
        cli_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let yaml = Self::load_yaml(yaml_path);
        Self::from_yaml(yaml, cli_path)
    }

    fn from_yaml(yaml: YamlConfig, cli_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut raw = yaml.server;
        if let Ok(path) = std::env::var("WORLD_SERVER_PATH") {
            raw.path = Some(path);
        }
        if let Some(path) = cli_path {
            raw.path = Some(path.to_string_lossy().into_owned());
        }
        if let Ok(memory) = std::env::var("WORLD_SERVER_MEMORY") {
            raw.memory = Some(memory);
        }
        if let Some(port) = env_parse("WORLD_SERVER_PORT") {
            raw.port = Some(port);
        }
        if let Some(max) = env_parse("WORLD_MAX_PLAYERS") {
            raw.max_players = Some(max);
        }

        let mut server = ServerConfig::try_from(raw)?;
        let session_yaml = yaml.session;

        if let Some(username) = std::env::var("AVATAR_USERNAME")
            .ok()
            .or(session_yaml.username)
        {
            server.username = username;
        }
        if let Some(version) = std::env::var("AVATAR_PROTOCOL_VERSION")
            .ok()
            .or(session_yaml.version)
        {
            server.protocol_version = version;
        }

        let mut session = SessionSettings::for_server(&server);
        if let Some(host) = std::env::var("AVATAR_HOST").ok().or(session_yaml.host) {
            session.host = host;
        }
        if let Some(port) = session_yaml.port {
            session.port = port;
        }
        if let Some(navigation) = session_yaml.navigation {
            session.navigation = navigation;
        }
        if let Some(gateway) = std::env::var("AVATAR_GATEWAY").ok().or(session_yaml.gateway) {
            session.gateway = gateway;
        }

        Ok(Self { server, session })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|s| s.parse().ok())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_applied() {
        let config = ServerConfig::with_path("server.jar").unwrap();
        assert_eq!(config.process_path, PathBuf::from("server.jar"));
        assert_eq!(config.memory_allocation, "2G");
        assert_eq!(config.port, 25565);
        assert_eq!(config.max_players, 20);
        assert_eq!(config.username, "MCPBot");
        assert_eq!(config.protocol_version, "1.21");
        assert_eq!(config.java_runtime, "java");
    }

    #[test]
    fn test_path_required() {
        let err = ServerConfig::try_from(ServerYamlConfig::default()).unwrap_err();
        assert_eq!(err, ConfigError::MissingProcessPath);

        let err = ServerConfig::try_from(ServerYamlConfig {
            path: Some("   ".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingProcessPath);
    }

    #[test]
    fn test_port_bounds() {
        for (port, ok) in [(0, false), (1, true), (65535, true), (65536, false)] {
            let result = ServerConfig::try_from(ServerYamlConfig {
                path: Some("server.jar".into()),
                port: Some(port),
                ..Default::default()
            });
            assert_eq!(result.is_ok(), ok, "port {port}");
        }
    }

    #[test]
    fn test_yaml_sections() {
        let yaml = r#"
server:
  path: /srv/world/server.jar
  memory: 4G
  port: 25570
  max_players: 5
  properties:
    level-name: arena
session:
  host: 10.0.0.2
  port: 25600
  username: Scout
  navigation: false
  gateway: 10.0.0.2:4000
"#;
        let parsed: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        let config = Config::from_yaml(parsed, None).unwrap();

        assert_eq!(config.server.memory_allocation, "4G");
        assert_eq!(config.server.port, 25570);
        assert_eq!(config.server.max_players, 5);
        assert_eq!(
            config.server.extra_properties.get("level-name").map(String::as_str),
            Some("arena")
        );
        assert_eq!(config.session.host, "10.0.0.2");
        assert_eq!(config.session.port, 25600);
        assert_eq!(config.session.username, "Scout");
        assert!(!config.session.navigation);
        assert_eq!(config.session.gateway, "10.0.0.2:4000");
    }

    #[test]
    fn test_session_port_follows_server_port() {
        let yaml: YamlConfig = serde_yaml::from_str("server:\n  path: a.jar\n  port: 30000\n").unwrap();
        let config = Config::from_yaml(yaml, None).unwrap();
        assert_eq!(config.session.port, 30000);
        assert!(config.session.navigation);
    }

    #[test]
    fn test_cli_path_wins_and_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(b"server:\n  path: from-yaml.jar\n").unwrap();

        let config =
            Config::from_yaml_and_env(Some(&file_path), Some(Path::new("/opt/cli.jar"))).unwrap();
        assert_eq!(config.server.process_path, PathBuf::from("/opt/cli.jar"));

        let missing = dir.path().join("nope.yaml");
        let err = Config::from_yaml_and_env(Some(&missing), None);
        if std::env::var("WORLD_SERVER_PATH").is_err() {
            assert_eq!(err.unwrap_err(), ConfigError::MissingProcessPath);
        }
    }
}
