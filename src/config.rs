//! Configuration for the bytewire echo server binary.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "bytewire")]
#[command(author = "bytewire authors")]
#[command(version = "0.1.0")]
#[command(about = "A line-echo server over windowed async TCP", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on (e.g., 127.0.0.1:7000)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen backlog
    #[arg(short = 'b', long)]
    pub backlog: Option<u32>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrently serviced connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Per-connection window capacity in bytes
    #[arg(long)]
    pub window_capacity: Option<usize>,

    /// Stage I/O through page-aligned (direct) buffers
    #[arg(long)]
    pub direct_buffers: bool,

    /// Per-attempt I/O timeout in milliseconds (0 = unbounded)
    #[arg(short = 't', long)]
    pub timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum number of concurrently serviced connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            workers: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Connection I/O configuration
#[derive(Debug, Deserialize)]
pub struct IoConfig {
    /// Per-connection window capacity in bytes
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    /// Stage I/O through page-aligned (direct) buffers
    #[serde(default)]
    pub direct_buffers: bool,
    /// Per-attempt I/O timeout in milliseconds (0 = unbounded)
    #[serde(default)]
    pub timeout_ms: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            direct_buffers: false,
            timeout_ms: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:7000".to_string()
}

fn default_backlog() -> u32 {
    128
}

fn default_max_connections() -> usize {
    10_000
}

fn default_window_capacity() -> usize {
    16 * 1024 // 16 KiB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub backlog: u32,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub window_capacity: usize,
    pub direct_buffers: bool,
    pub timeout_ms: u64,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        // Merge CLI args with TOML config (CLI takes precedence)
        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            workers: cli.workers.or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            window_capacity: cli
                .window_capacity
                .unwrap_or(toml_config.io.window_capacity),
            direct_buffers: cli.direct_buffers || toml_config.io.direct_buffers,
            timeout_ms: cli.timeout_ms.unwrap_or(toml_config.io.timeout_ms),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// Per-attempt I/O timeout; `0` means unbounded.
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.timeout_ms))
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:7000");
        assert_eq!(config.server.backlog, 128);
        assert_eq!(config.server.max_connections, 10_000);
        assert_eq!(config.io.window_capacity, 16 * 1024);
        assert!(!config.io.direct_buffers);
        assert_eq!(config.io.timeout_ms, 0);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:7000"
            backlog = 512
            workers = 4
            max_connections = 256

            [io]
            window_capacity = 4096
            direct_buffers = true
            timeout_ms = 250

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:7000");
        assert_eq!(config.server.backlog, 512);
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.max_connections, 256);
        assert_eq!(config.io.window_capacity, 4096);
        assert!(config.io.direct_buffers);
        assert_eq!(config.io.timeout_ms, 250);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_timeout_helper() {
        let mut config = Config {
            listen: default_listen(),
            backlog: default_backlog(),
            workers: None,
            max_connections: default_max_connections(),
            window_capacity: default_window_capacity(),
            direct_buffers: false,
            timeout_ms: 0,
            log_level: default_log_level(),
        };
        assert_eq!(config.timeout(), None);

        config.timeout_ms = 250;
        assert_eq!(config.timeout(), Some(Duration::from_millis(250)));
    }
}
