// Configuration management for pod-route-sync
// Supports CLI arguments, config file (TOML), and environment variables

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

use crate::error::RetryConfig;

/// pod-route-sync - keep host routes to pod CIDR blocks in sync with their nodes
#[derive(Parser, Debug, Clone)]
#[command(name = "pod-route-sync")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Desired state file (pools, nodes, blocks)
    #[arg(short, long, env = "PRS_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Seconds between sync passes
    #[arg(long, env = "PRS_SYNC_INTERVAL")]
    pub sync_interval: Option<u64>,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(short, long, env = "PRS_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Path to configuration file
    #[arg(short, long, env = "PRS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Serve the read-only status API on this port
    #[arg(long, env = "PRS_STATUS_PORT")]
    pub status_port: Option<u16>,

    /// Leave managed routes in place on shutdown
    #[arg(long, env = "PRS_NO_TEARDOWN")]
    pub no_teardown: bool,

    /// Delete every route within this CIDR and exit
    #[arg(long, value_name = "CIDR")]
    pub cleanup: Option<String>,
}

/// Configuration file structure (TOML format)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Desired state file
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Seconds between sync passes
    #[serde(default = "default_sync_interval")]
    pub interval_seconds: u64,

    /// Remove managed routes on shutdown
    #[serde(default = "default_true")]
    pub teardown: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_status_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_state_file() -> PathBuf {
    PathBuf::from("/etc/pod-route-sync/desired.toml")
}
fn default_sync_interval() -> u64 {
    30
}
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_status_port() -> u16 {
    9464
}
fn default_max_attempts() -> u32 {
    RetryConfig::default().max_attempts
}
fn default_initial_delay_ms() -> u64 {
    RetryConfig::default().initial_delay_ms
}
fn default_max_delay_ms() -> u64 {
    RetryConfig::default().max_delay_ms
}
fn default_backoff_multiplier() -> f64 {
    RetryConfig::default().backoff_multiplier
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            state_file: default_state_file(),
            interval_seconds: default_sync_interval(),
            teardown: default_true(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        StatusConfig {
            enabled: false,
            bind_address: default_bind_address(),
            port: default_status_port(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

/// Merged configuration from all sources
#[derive(Debug, Clone)]
pub struct Config {
    pub state_file: PathBuf,
    pub sync_interval: Duration,
    pub teardown: bool,
    pub log_level: Level,
    pub status_addr: Option<SocketAddr>,
    pub retry: RetryConfig,
    pub cleanup: Option<String>,
    /// Config file that was read, if any
    pub config_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from all sources (CLI args, config file, defaults)
    /// Priority: CLI args > Environment variables > Config file > Defaults
    pub fn load() -> anyhow::Result<Self> {
        let cli_args = CliArgs::parse();
        let (config_file, config_path) = load_config_file(cli_args.config.as_deref())?;
        let mut config = Self::merge(cli_args, config_file)?;
        config.config_path = config_path;
        Ok(config)
    }

    fn merge(cli_args: CliArgs, config_file: ConfigFile) -> anyhow::Result<Self> {
        let state_file = cli_args.state_file.unwrap_or(config_file.sync.state_file);

        let interval_seconds = cli_args.sync_interval.unwrap_or(config_file.sync.interval_seconds);
        if interval_seconds == 0 {
            anyhow::bail!("sync interval must be at least one second");
        }

        let teardown = !cli_args.no_teardown && config_file.sync.teardown;

        let log_level = parse_log_level(cli_args.log_level.as_deref().unwrap_or(&config_file.logging.level))?;

        let status_addr = match (cli_args.status_port, config_file.status.enabled) {
            (Some(port), _) => Some(parse_bind(&config_file.status.bind_address, port)?),
            (None, true) => Some(parse_bind(&config_file.status.bind_address, config_file.status.port)?),
            (None, false) => None,
        };

        let retry = RetryConfig {
            max_attempts: config_file.retry.max_attempts.max(1),
            initial_delay_ms: config_file.retry.initial_delay_ms,
            max_delay_ms: config_file.retry.max_delay_ms,
            backoff_multiplier: config_file.retry.backoff_multiplier,
        };

        Ok(Config {
            state_file,
            sync_interval: Duration::from_secs(interval_seconds),
            teardown,
            log_level,
            status_addr,
            retry,
            cleanup: cli_args.cleanup,
            config_path: None,
        })
    }
}

/// Read the explicit config file, or the first default location that exists.
/// Runs before logging is set up, so the chosen path is returned for the
/// caller to report.
fn load_config_file(explicit: Option<&Path>) -> anyhow::Result<(ConfigFile, Option<PathBuf>)> {
    if let Some(config_path) = explicit {
        let config_content = std::fs::read_to_string(config_path)?;
        return Ok((toml::from_str::<ConfigFile>(&config_content)?, Some(config_path.to_path_buf())));
    }

    // Try loading from default locations
    let default_paths = [PathBuf::from("config.toml"), PathBuf::from("pod-route-sync.toml")];
    for path in default_paths {
        if path.exists() {
            let config_content = std::fs::read_to_string(&path)?;
            return Ok((toml::from_str::<ConfigFile>(&config_content)?, Some(path)));
        }
    }

    Ok((ConfigFile::default(), None))
}

fn parse_bind(address: &str, port: u16) -> anyhow::Result<SocketAddr> {
    format!("{}:{}", address, port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid status bind address {}: {}", address, e))
}

fn parse_log_level(level_str: &str) -> anyhow::Result<Level> {
    match level_str.to_lowercase().as_str() {
        "error" => Ok(Level::ERROR),
        "warn" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        _ => Err(anyhow::anyhow!("Invalid log level: {}", level_str)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["pod-route-sync"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default();
        assert_eq!(config.sync.interval_seconds, 30);
        assert!(config.sync.teardown);
        assert!(!config.status.enabled);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("info"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("DEBUG"), Ok(Level::DEBUG)));
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: ConfigFile = toml::from_str(
            r#"
[sync]
state_file = "/srv/state.toml"
interval_seconds = 120

[status]
enabled = true
bind_address = "0.0.0.0"

[logging]
level = "warn"
"#,
        )
        .unwrap();

        let config = Config::merge(args(&["--sync-interval", "5", "--no-teardown", "--status-port", "8081"]), file).unwrap();

        assert_eq!(config.state_file, PathBuf::from("/srv/state.toml"));
        assert_eq!(config.sync_interval, Duration::from_secs(5));
        assert!(!config.teardown);
        assert_eq!(config.log_level, Level::WARN);
        assert_eq!(config.status_addr, Some("0.0.0.0:8081".parse().unwrap()));
    }

    #[test]
    fn test_status_disabled_by_default() {
        let config = Config::merge(args(&[]), ConfigFile::default()).unwrap();
        assert_eq!(config.status_addr, None);
        assert!(config.teardown);
        assert!(config.cleanup.is_none());
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(Config::merge(args(&["--sync-interval", "0"]), ConfigFile::default()).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retry]\nmax_attempts = 7\ninitial_delay_ms = 50").unwrap();

        let (loaded, path) = load_config_file(Some(file.path())).unwrap();
        assert_eq!(path.as_deref(), Some(file.path()));
        assert_eq!(loaded.retry.max_attempts, 7);
        assert_eq!(loaded.retry.initial_delay_ms, 50);
        assert_eq!(loaded.retry.max_delay_ms, 5000);
    }
}
