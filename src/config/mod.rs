//! Configuration module
//!
//! Handles loading and saving rcon client configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::network::SessionConfig;
use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Unknown server profile: {0}")]
    UnknownProfile(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Default server
    #[serde(default)]
    pub server: ServerConfig,

    /// Session settings
    #[serde(default)]
    pub session: SessionSettings,

    /// Named servers, selected with `--profile`
    #[serde(default)]
    pub profiles: HashMap<String, ServerConfig>,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

/// Server address and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host name or address
    #[serde(default = "default_host")]
    pub host: String,
    /// RCON port
    #[serde(default = "default_port")]
    pub port: u16,
    /// RCON password
    pub password: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: None,
        }
    }
}

/// Session tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Authentication timeout in ms
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_ms: u64,
    /// Command reply timeout in ms (unbounded if not set)
    pub command_timeout_ms: Option<u64>,
    /// Largest frame accepted from the server
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Event channel capacity
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Emit every frame as a trace event
    #[serde(default)]
    pub trace_frames: bool,
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_auth_timeout() -> u64 {
    10_000
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_event_buffer() -> usize {
    256
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            auth_timeout_ms: default_auth_timeout(),
            command_timeout_ms: None,
            max_frame_size: default_max_frame_size(),
            event_buffer: default_event_buffer(),
            trace_frames: false,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("rcon/config.toml")),
            Some(PathBuf::from("./rcon.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default server or a named profile
    pub fn server(&self, profile: Option<&str>) -> ConfigResult<ServerConfig> {
        match profile {
            Some(name) => self
                .profiles
                .get(name)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownProfile(name.to_string())),
            None => Ok(self.server.clone()),
        }
    }

    /// Build the session configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout_ms: self.session.connect_timeout_ms,
            auth_timeout_ms: self.session.auth_timeout_ms,
            command_timeout_ms: self.session.command_timeout_ms,
            max_frame_size: self.session.max_frame_size,
            event_buffer: self.session.event_buffer,
            trace_frames: self.session.trace_frames,
        }
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            password: Some("changeme".to_string()),
        },
        profiles: {
            let mut m = HashMap::new();
            m.insert(
                "arena".to_string(),
                ServerConfig {
                    host: "arena.example.net".to_string(),
                    port: 27016,
                    password: None,
                },
            );
            m
        },
        session: SessionSettings {
            command_timeout_ms: Some(30_000),
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}
