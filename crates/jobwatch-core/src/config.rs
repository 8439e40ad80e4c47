//! JobWatch configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{JobWatchError, Result};
use crate::types::AlertSeverity;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobWatchConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl JobWatchConfig {
    /// Load config from `$JOBWATCH_CONFIG` or the default path
    /// (~/.jobwatch/config.toml), falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let path = std::env::var("JOBWATCH_CONFIG")
            .map(|p| PathBuf::from(shellexpand::tilde(&p).to_string()))
            .unwrap_or_else(|_| Self::default_path());
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| JobWatchError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| JobWatchError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides for secrets that should not live in the file.
    pub fn apply_env(&mut self) {
        if let Ok(password) = std::env::var("JOBWATCH_SOURCE_PASSWORD") {
            self.source.password = password;
        }
        if let Ok(url) = std::env::var("JOBWATCH_BUS_URL") {
            self.bus.url = url;
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.monitor.poll_interval_secs == 0 {
            return Err(JobWatchError::Config("monitor.poll_interval_secs must be > 0".into()));
        }
        if self.source.hostname.trim().is_empty() {
            return Err(JobWatchError::Config("source.hostname must not be empty".into()));
        }
        match self.bus.backend.as_str() {
            "memory" | "redis" => {}
            other => {
                return Err(JobWatchError::Config(format!(
                    "Unknown bus backend '{other}' (expected 'memory' or 'redis')"
                )));
            }
        }
        if self.bus.resubscribe_backoff_secs == 0 {
            return Err(JobWatchError::Config("bus.resubscribe_backoff_secs must be > 0".into()));
        }
        for rule in &self.monitor.alert_rules {
            glob::Pattern::new(&rule.job_name_pattern).map_err(|e| {
                JobWatchError::Config(format!(
                    "Alert rule '{}': invalid job_name_pattern '{}': {e}",
                    rule.name, rule.job_name_pattern
                ))
            })?;
        }
        if self.gateway.queue_capacity == 0 {
            return Err(JobWatchError::Config("gateway.queue_capacity must be > 0".into()));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the JobWatch home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".jobwatch")
    }
}

fn bool_true() -> bool { true }

/// Workload source (HWA REST API) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_host")]
    pub hostname: String,
    #[serde(default = "default_source_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub verify_ssl: bool,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
    /// Value of the `How-Many` header on plan queries.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Extra attempts when the connection cannot be established.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
}

fn default_source_host() -> String { "localhost".into() }
fn default_source_port() -> u16 { 31116 }
fn default_source_timeout() -> u64 { 30 }
fn default_page_size() -> u32 { 500 }
fn default_connect_retries() -> u32 { 3 }

impl SourceConfig {
    /// Base URL of the REST API, e.g. `https://host:31116/twsd/v1`.
    pub fn base_url(&self) -> String {
        format!("https://{}:{}/twsd/v1", self.hostname, self.port)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            hostname: default_source_host(),
            port: default_source_port(),
            username: String::new(),
            password: String::new(),
            verify_ssl: false,
            timeout_secs: default_source_timeout(),
            page_size: default_page_size(),
            connect_retries: default_connect_retries(),
        }
    }
}

/// Poller and alerting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_critical_statuses")]
    pub critical_statuses: Vec<String>,
    /// Alert when a job is first seen already in a critical status.
    #[serde(default = "bool_true")]
    pub alert_on_first_sight: bool,
    /// Emit `→ REMOVED` events for jobs that disappear from the source.
    #[serde(default)]
    pub report_removed: bool,
    #[serde(default)]
    pub alert_rules: Vec<AlertRuleConfig>,
}

fn default_poll_interval() -> u64 { 30 }
fn default_critical_statuses() -> Vec<String> {
    vec!["ABEND", "ERROR", "FAIL"]
        .into_iter().map(String::from).collect()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            critical_statuses: default_critical_statuses(),
            alert_on_first_sight: true,
            report_removed: false,
            alert_rules: Vec::new(),
        }
    }
}

/// One alert rule. The first enabled matching rule decides title and severity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleConfig {
    pub name: String,
    /// Glob over job names (`*`, `?`, `[...]`), e.g. `PAYROLL_*`.
    #[serde(default = "default_pattern")]
    pub job_name_pattern: String,
    /// Restrict to these critical statuses; empty means any critical status.
    #[serde(default)]
    pub statuses: Vec<String>,
    #[serde(default)]
    pub severity: AlertSeverity,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

fn default_pattern() -> String { "*".into() }

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// `memory` (single process) or `redis`.
    #[serde(default = "default_bus_backend")]
    pub backend: String,
    #[serde(default = "default_bus_url")]
    pub url: String,
    /// Per-channel buffer for the in-process backend.
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
    #[serde(default = "default_resubscribe_backoff")]
    pub resubscribe_backoff_secs: u64,
}

fn default_bus_backend() -> String { "memory".into() }
fn default_bus_url() -> String { "redis://127.0.0.1:6379".into() }
fn default_bus_capacity() -> usize { 256 }
fn default_resubscribe_backoff() -> u64 { 5 }

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: default_bus_backend(),
            url: default_bus_url(),
            capacity: default_bus_capacity(),
            resubscribe_backoff_secs: default_resubscribe_backoff(),
        }
    }
}

/// History sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_history_path")]
    pub path: String,
}

fn default_history_path() -> String { "~/.jobwatch/history.db".into() }

impl HistoryConfig {
    /// Database path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_history_path(),
        }
    }
}

/// Gateway (viewer WebSocket server) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Outbound queue length per viewer connection.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// A connection that cannot accept a message within this time is dropped.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
}

fn default_port() -> u16 { 63136 }
fn default_host() -> String { "127.0.0.1".into() }
fn default_queue_capacity() -> usize { 64 }
fn default_send_timeout() -> u64 { 2000 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            queue_capacity: default_queue_capacity(),
            send_timeout_ms: default_send_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = JobWatchConfig::default();
        assert_eq!(config.monitor.poll_interval_secs, 30);
        assert_eq!(config.monitor.critical_statuses, vec!["ABEND", "ERROR", "FAIL"]);
        assert!(config.monitor.alert_on_first_sight);
        assert!(!config.monitor.report_removed);
        assert_eq!(config.bus.backend, "memory");
        assert_eq!(config.source.page_size, 500);
        assert_eq!(config.source.connect_retries, 3);
        assert_eq!(config.bus.resubscribe_backoff_secs, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config = JobWatchConfig::from_toml(
            r#"
            [source]
            hostname = "hwa.example.com"
            port = 9443
            username = "ops"

            [monitor]
            poll_interval_secs = 10
            critical_statuses = ["ABEND"]

            [[monitor.alert_rules]]
            name = "Payroll"
            job_name_pattern = "PAYROLL_*"
            severity = "CRITICAL"

            [bus]
            backend = "redis"
            url = "redis://bus:6379"
            "#,
        )
        .unwrap();
        assert_eq!(config.source.base_url(), "https://hwa.example.com:9443/twsd/v1");
        assert_eq!(config.monitor.poll_interval_secs, 10);
        assert_eq!(config.monitor.alert_rules.len(), 1);
        assert_eq!(config.monitor.alert_rules[0].severity, AlertSeverity::Critical);
        assert!(config.monitor.alert_rules[0].enabled);
        assert!(config.monitor.alert_rules[0].statuses.is_empty());
        assert_eq!(config.bus.backend, "redis");
        assert_eq!(config.gateway.port, 63136);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(JobWatchConfig::from_toml("[monitor]\npoll_interval_secs = 0").is_err());
        assert!(JobWatchConfig::from_toml("[bus]\nbackend = \"kafka\"").is_err());
        assert!(JobWatchConfig::from_toml("[source]\nhostname = \"\"").is_err());
        assert!(JobWatchConfig::from_toml("[bus]\nresubscribe_backoff_secs = 0").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_rule_pattern() {
        let err = JobWatchConfig::from_toml(
            r#"
            [[monitor.alert_rules]]
            name = "Broken"
            job_name_pattern = "JOB_[AB"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Broken"), "got {err}");

        let ok = JobWatchConfig::from_toml(
            r#"
            [[monitor.alert_rules]]
            name = "Pair"
            job_name_pattern = "JOB_[AB]"
            "#,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_password_not_serialized() {
        let mut config = JobWatchConfig::default();
        config.source.password = "s3cret".into();
        let text = toml::to_string(&config).unwrap();
        assert!(!text.contains("s3cret"));
    }
}
