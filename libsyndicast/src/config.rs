//! Configuration management for Syndicast

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::dispatch::DispatchPolicy;
use crate::error::{ConfigError, Result};
use crate::health::SuppressionPolicy;
use crate::ledger::WorkerLimits;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub suppression: SuppressionConfig,
    pub transport: Option<TransportConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Concurrent transport calls across all cycles.
    #[serde(default = "default_fanout_limit")]
    pub fanout_limit: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            fanout_limit: default_fanout_limit(),
        }
    }
}

/// Rate, cooldown and retry settings. Each field falls back to its default
/// individually, so a config file only needs the overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_hourly_limit")]
    pub hourly_per_worker: u32,
    #[serde(default = "default_daily_limit")]
    pub daily_per_worker: u32,
    #[serde(default = "default_reuse_cooldown_min")]
    pub reuse_cooldown_min_secs: u64,
    #[serde(default = "default_reuse_cooldown_max")]
    pub reuse_cooldown_max_secs: u64,
    #[serde(default = "default_transient_cooldown")]
    pub transient_cooldown_secs: u64,
    #[serde(default = "default_ban_quarantine")]
    pub ban_quarantine_secs: u64,
    #[serde(default = "default_max_transient_retries")]
    pub max_transient_retries: u32,
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_transport_timeout")]
    pub transport_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            hourly_per_worker: default_hourly_limit(),
            daily_per_worker: default_daily_limit(),
            reuse_cooldown_min_secs: default_reuse_cooldown_min(),
            reuse_cooldown_max_secs: default_reuse_cooldown_max(),
            transient_cooldown_secs: default_transient_cooldown(),
            ban_quarantine_secs: default_ban_quarantine(),
            max_transient_retries: default_max_transient_retries(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
            retry_backoff_secs: default_retry_backoff(),
            transport_timeout_secs: default_transport_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionConfig {
    #[serde(default = "default_suppression_threshold")]
    pub threshold: u32,
    #[serde(default = "default_suppression_windows")]
    pub windows_secs: Vec<i64>,
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            threshold: default_suppression_threshold(),
            windows_secs: default_suppression_windows(),
            min_success_rate: default_min_success_rate(),
            min_samples: default_min_samples(),
        }
    }
}

/// External delivery command. Required for the daemon, absent in setups
/// that only inspect state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_poll_interval() -> u64 {
    60
}
fn default_fanout_limit() -> usize {
    8
}
fn default_hourly_limit() -> u32 {
    15
}
fn default_daily_limit() -> u32 {
    150
}
fn default_reuse_cooldown_min() -> u64 {
    30
}
fn default_reuse_cooldown_max() -> u64 {
    90
}
fn default_transient_cooldown() -> u64 {
    300
}
fn default_ban_quarantine() -> u64 {
    86400
}
fn default_max_transient_retries() -> u32 {
    2
}
fn default_max_rate_limit_retries() -> u32 {
    2
}
fn default_retry_backoff() -> u64 {
    1
}
fn default_transport_timeout() -> u64 {
    30
}
fn default_suppression_threshold() -> u32 {
    3
}
fn default_suppression_windows() -> Vec<i64> {
    vec![3600, 21600, 86400]
}
fn default_min_success_rate() -> f64 {
    0.5
}
fn default_min_samples() -> u64 {
    10
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/syndicast/syndicast.db".to_string(),
            },
            scheduler: SchedulerSettings::default(),
            limits: LimitsConfig::default(),
            suppression: SuppressionConfig::default(),
            transport: None,
        }
    }

    pub fn worker_limits(&self) -> WorkerLimits {
        WorkerLimits {
            hourly: self.limits.hourly_per_worker,
            daily: self.limits.daily_per_worker,
        }
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            max_transient_retries: self.limits.max_transient_retries,
            max_rate_limit_retries: self.limits.max_rate_limit_retries,
            retry_backoff_secs: self.limits.retry_backoff_secs,
            reuse_cooldown_min_secs: self.limits.reuse_cooldown_min_secs,
            reuse_cooldown_max_secs: self.limits.reuse_cooldown_max_secs,
            transient_cooldown_secs: self.limits.transient_cooldown_secs,
            ban_quarantine_secs: self.limits.ban_quarantine_secs,
            transport_timeout_secs: self.limits.transport_timeout_secs,
        }
    }

    pub fn suppression_policy(&self) -> SuppressionPolicy {
        SuppressionPolicy {
            threshold: self.suppression.threshold,
            windows_secs: self.suppression.windows_secs.clone(),
            min_success_rate: self.suppression.min_success_rate,
            min_samples: self.suppression.min_samples,
            ..SuppressionPolicy::default()
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SYNDICAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("syndicast").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("syndicast"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[database]\npath = \"/tmp/test.db\"").unwrap();

        let config = Config::load_from_path(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.database.path, "/tmp/test.db");
        assert_eq!(config.scheduler.poll_interval_secs, 60);
        assert_eq!(config.scheduler.fanout_limit, 8);
        assert_eq!(config.limits.hourly_per_worker, 15);
        assert_eq!(config.limits.daily_per_worker, 150);
        assert_eq!(config.suppression.threshold, 3);
        assert_eq!(config.suppression.windows_secs, vec![3600, 21600, 86400]);
        assert!(config.transport.is_none());
    }

    #[test]
    fn test_full_config_parsing() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[database]
path = "~/syndicast.db"

[scheduler]
poll_interval_secs = 30
fanout_limit = 4

[limits]
hourly_per_worker = 5
daily_per_worker = 40
transient_cooldown_secs = 120

[suppression]
threshold = 2
windows_secs = [600, 1200]

[transport]
command = "syndicast-deliver"
args = ["--profile", "default"]
"#
        )
        .unwrap();

        let config = Config::load_from_path(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.scheduler.poll_interval_secs, 30);
        assert_eq!(config.limits.hourly_per_worker, 5);
        // Unspecified limits keep their defaults.
        assert_eq!(config.limits.reuse_cooldown_min_secs, 30);
        assert_eq!(config.suppression.threshold, 2);
        assert_eq!(config.suppression.windows_secs, vec![600, 1200]);

        let transport = config.transport.as_ref().unwrap();
        assert_eq!(transport.command, "syndicast-deliver");
        assert_eq!(transport.args, vec!["--profile", "default"]);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid toml [[[").unwrap();
        let result = Config::load_from_path(&file.path().to_path_buf());
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = Config::load_from_path(&PathBuf::from("/nonexistent/syndicast.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_policy_conversions() {
        let config = Config::default_config();

        let limits = config.worker_limits();
        assert_eq!(limits.hourly, 15);
        assert_eq!(limits.daily, 150);

        let policy = config.dispatch_policy();
        assert_eq!(policy.max_transient_retries, 2);
        assert_eq!(policy.transient_cooldown_secs, 300);
        assert_eq!(policy.ban_quarantine_secs, 86400);

        let suppression = config.suppression_policy();
        assert_eq!(suppression.threshold, 3);
        assert_eq!(suppression.windows_secs, vec![3600, 21600, 86400]);
    }

    #[test]
    #[serial]
    fn test_config_path_from_env() {
        std::env::set_var("SYNDICAST_CONFIG", "/tmp/custom-config.toml");
        let path = resolve_config_path().unwrap();
        assert_eq!(path, PathBuf::from("/tmp/custom-config.toml"));
        std::env::remove_var("SYNDICAST_CONFIG");
    }

    #[test]
    #[serial]
    fn test_config_path_default_location() {
        std::env::remove_var("SYNDICAST_CONFIG");
        let path = resolve_config_path().unwrap();
        assert!(path.ends_with("syndicast/config.toml"));
    }
}
