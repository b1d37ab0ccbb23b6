//! Configuration module for the telemetry server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::error::ConfigError;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Default in-band terminator: NUL never appears in response text.
pub const DEFAULT_DELIMITER: u8 = 0;

/// Which counter the `METRICKS` command reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MetricksSource {
    /// Completed response writes.
    #[default]
    Sent,
    /// Dispatched requests.
    Requests,
}

/// Command-line arguments for the telemetry server
#[derive(Parser, Debug)]
#[command(name = "telemetry-server")]
#[command(author = "telemetry-server authors")]
#[command(version)]
#[command(about = "A TCP telemetry service with synthetic sensors and analytics", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:7878)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of worker threads (1 or unset runs a single event loop)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Path of the telemetry record file
    #[arg(short = 'r', long)]
    pub records: Option<PathBuf>,

    /// Terminator byte for requests and responses
    #[arg(short = 'd', long)]
    pub delimiter: Option<u8>,

    /// Counter reported by METRICKS
    #[arg(long, value_enum)]
    pub metricks: Option<MetricksSource>,

    /// Seed for the telemetry generator
    #[arg(long)]
    pub seed: Option<u64>,

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
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Terminator byte
    #[serde(default = "default_delimiter")]
    pub delimiter: u8,
    /// Counter reported by METRICKS
    #[serde(default)]
    pub metricks: MetricksSource,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
            delimiter: default_delimiter(),
            metricks: MetricksSource::default(),
        }
    }
}

/// Telemetry-related configuration
#[derive(Debug, Deserialize)]
pub struct TelemetryConfig {
    /// Record store file
    #[serde(default = "default_records")]
    pub records: PathBuf,
    /// Generator seed (random when unset)
    pub seed: Option<u64>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            records: default_records(),
            seed: None,
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
    "127.0.0.1:7878".to_string()
}

fn default_delimiter() -> u8 {
    DEFAULT_DELIMITER
}

fn default_records() -> PathBuf {
    PathBuf::from("telemetry.dat")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub workers: Option<usize>,
    pub records: PathBuf,
    pub delimiter: u8,
    pub metricks: MetricksSource,
    pub seed: Option<u64>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents =
                std::fs::read_to_string(config_path).map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen.clone()))?;

        Ok(Config {
            listen,
            workers: cli.workers.or(toml_config.server.workers),
            records: cli.records.unwrap_or(toml_config.telemetry.records),
            delimiter: cli.delimiter.unwrap_or(toml_config.server.delimiter),
            metricks: cli.metricks.unwrap_or(toml_config.server.metricks),
            seed: cli.seed.or(toml_config.telemetry.seed),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:7878");
        assert_eq!(config.server.delimiter, 0);
        assert_eq!(config.server.metricks, MetricksSource::Sent);
        assert_eq!(config.telemetry.records, PathBuf::from("telemetry.dat"));
        assert!(config.telemetry.seed.is_none());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9000"
            workers = 4
            delimiter = 37
            metricks = "requests"

            [telemetry]
            records = "/tmp/readings.dat"
            seed = 7

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.delimiter, b'%');
        assert_eq!(config.server.metricks, MetricksSource::Requests);
        assert_eq!(config.telemetry.records, PathBuf::from("/tmp/readings.dat"));
        assert_eq!(config.telemetry.seed, Some(7));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nlisten = \"127.0.0.1:9000\"\nworkers = 2\n[logging]\nlevel = \"warn\""
        )
        .unwrap();

        let cli = CliArgs::parse_from([
            "telemetry-server",
            "--config",
            file.path().to_str().unwrap(),
            "--listen",
            "127.0.0.1:9100",
            "--metricks",
            "requests",
        ]);
        let config = Config::from_args(cli).unwrap();

        assert_eq!(config.listen, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.workers, Some(2));
        assert_eq!(config.metricks, MetricksSource::Requests);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_invalid_listen() {
        let cli = CliArgs::parse_from(["telemetry-server", "--listen", "not-an-address"]);
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::InvalidListen(_))
        ));
    }
}
