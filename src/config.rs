//! Agent configuration.
//!
//! The container entrypoint passes configuration either as a JSON file
//! (`--config`) or as JSON in the `EXECUTION_AGENT_CONFIG` environment
//! variable. It is loaded once at startup and never re-read.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Environment variable holding the JSON configuration.
pub const CONFIG_ENV: &str = "EXECUTION_AGENT_CONFIG";

/// Environment variable that overrides the configured agent id.
pub const AGENT_ID_ENV: &str = "AGENT_ID";

/// Top-level configuration for the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Agent identifier (usually the container id).
    #[serde(default)]
    pub id: String,

    /// Version announced to the backend at startup.
    #[serde(default = "default_version")]
    pub version: String,

    /// Backend that persists execution results.
    pub backend: BackendConfig,

    /// Base URL of the orchestrator (heartbeats and execution logs).
    pub orchestrator_url: String,

    /// Heartbeat cadence.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Upper bound for every network request, in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_millis: u64,

    /// Retry policy for backend uploads.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Shell command that invokes the test tool; job arguments are appended.
    pub cli_command: String,

    /// File that receives the tool's combined stdout/stderr.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// JSON report written by the tool on successful completion.
    #[serde(default = "default_report_file")]
    pub report_file: PathBuf,

    /// Verbose logging.
    #[serde(default)]
    pub debug: bool,
}

/// Backend endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend.
    pub url: String,

    /// Endpoint receiving the agent version at startup.
    #[serde(default = "default_additional_data_endpoint")]
    pub additional_data_endpoint: String,

    /// Endpoint receiving per-test execution results.
    #[serde(default = "default_execution_data_endpoint")]
    pub execution_data_endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub interval_millis: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_millis: default_heartbeat_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts per upload, including the first one.
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,

    /// Sleep after the first failed attempt; doubles after every failure.
    #[serde(default = "default_initial_retry")]
    pub initial_retry_millis: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            initial_retry_millis: default_initial_retry(),
        }
    }
}

impl AgentConfig {
    /// Load from a JSON file if given, otherwise from [`CONFIG_ENV`].
    ///
    /// The [`AGENT_ID_ENV`] override and validation are applied either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_env()?,
        };
        config.apply_env_overrides();
        config.validate()?;
        debug!(agent_id = %config.id, "Configuration loaded");
        Ok(config)
    }

    /// Parse a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&json)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Parse the JSON held in [`CONFIG_ENV`].
    pub fn from_env() -> Result<Self> {
        let json = std::env::var(CONFIG_ENV)
            .with_context(|| format!("{CONFIG_ENV} not set and no --config given"))?;
        Self::from_json(&json).with_context(|| format!("Failed to parse {CONFIG_ENV}"))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Invalid agent configuration")?;
        Ok(config)
    }

    /// Take the agent id from the environment when available.
    ///
    /// `AGENT_ID` always wins; `HOSTNAME` (the container id under docker)
    /// only fills an id that was left empty.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var(AGENT_ID_ENV) {
            if !id.is_empty() {
                self.id = id;
                return;
            }
        }
        if self.id.is_empty() {
            if let Ok(host) = std::env::var("HOSTNAME") {
                self.id = host;
            }
        }
    }

    /// Reject configurations the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.id.is_empty(), "Agent id is empty (set `id` or {AGENT_ID_ENV})");
        anyhow::ensure!(!self.backend.url.is_empty(), "backend.url is empty");
        anyhow::ensure!(!self.orchestrator_url.is_empty(), "orchestrator_url is empty");
        anyhow::ensure!(!self.cli_command.trim().is_empty(), "cli_command is empty");
        anyhow::ensure!(self.retry.attempts > 0, "retry.attempts must be at least 1");
        anyhow::ensure!(
            self.heartbeat.interval_millis > 0,
            "heartbeat.interval_millis must be positive"
        );
        anyhow::ensure!(
            self.request_timeout_millis > 0,
            "request_timeout_millis must be positive"
        );
        Ok(())
    }

    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_millis)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_millis)
    }

    pub const fn initial_retry(&self) -> Duration {
        Duration::from_millis(self.retry.initial_retry_millis)
    }

    /// `{orchestrator_url}/heartbeat`
    pub fn heartbeat_url(&self) -> String {
        join_url(&self.orchestrator_url, "heartbeat")
    }

    /// `{orchestrator_url}/executionLogs`
    pub fn execution_logs_url(&self) -> String {
        join_url(&self.orchestrator_url, "executionLogs")
    }

    /// `{backend.url}/{additional_data_endpoint}`
    pub fn additional_data_url(&self) -> String {
        join_url(&self.backend.url, &self.backend.additional_data_endpoint)
    }

    /// `{backend.url}/{execution_data_endpoint}`
    pub fn execution_data_url(&self) -> String {
        join_url(&self.backend.url, &self.backend.execution_data_endpoint)
    }
}

fn join_url(base: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

fn default_additional_data_endpoint() -> String {
    "internal/saveAgentVersion".into()
}

fn default_execution_data_endpoint() -> String {
    "internal/saveTestResult".into()
}

fn default_log_file() -> PathBuf {
    "logs.txt".into()
}

fn default_report_file() -> PathBuf {
    "save.out.json".into()
}

const fn default_heartbeat_interval() -> u64 {
    15_000
}

const fn default_request_timeout() -> u64 {
    60_000
}

const fn default_retry_attempts() -> u32 {
    5
}

const fn default_initial_retry() -> u64 {
    2_000
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "id": "agent-1",
        "backend": { "url": "http://backend:5800" },
        "orchestrator_url": "http://orchestrator:5100",
        "cli_command": "./save-cli"
    }"#;

    #[test]
    fn parse_minimal_applies_defaults() {
        let config = AgentConfig::from_json(MINIMAL).unwrap();

        assert_eq!(config.id, "agent-1");
        assert_eq!(config.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.initial_retry(), Duration::from_secs(2));
        assert_eq!(config.log_file, PathBuf::from("logs.txt"));
        assert_eq!(config.report_file, PathBuf::from("save.out.json"));
        assert!(!config.debug);
        config.validate().unwrap();
    }

    #[test]
    fn parse_full() {
        let json = r#"{
            "id": "agent-2",
            "version": "1.2.3",
            "backend": {
                "url": "http://backend/",
                "additional_data_endpoint": "/agents/version",
                "execution_data_endpoint": "results"
            },
            "orchestrator_url": "http://orchestrator/",
            "heartbeat": { "interval_millis": 500 },
            "request_timeout_millis": 1000,
            "retry": { "attempts": 3, "initial_retry_millis": 1000 },
            "cli_command": "sh run.sh",
            "log_file": "/tmp/out.log",
            "report_file": "/tmp/report.json",
            "debug": true
        }"#;
        let config = AgentConfig::from_json(json).unwrap();

        assert_eq!(config.version, "1.2.3");
        assert_eq!(config.heartbeat_url(), "http://orchestrator/heartbeat");
        assert_eq!(config.execution_logs_url(), "http://orchestrator/executionLogs");
        assert_eq!(config.additional_data_url(), "http://backend/agents/version");
        assert_eq!(config.execution_data_url(), "http://backend/results");
        assert_eq!(config.retry.attempts, 3);
        assert!(config.debug);
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let json = r#"{ "id": "a", "backend": { "url": "http://b" } }"#;
        assert!(AgentConfig::from_json(json).is_err());
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut config = AgentConfig::from_json(MINIMAL).unwrap();
        config.retry.attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_id() {
        let mut config = AgentConfig::from_json(MINIMAL).unwrap();
        config.id.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = AgentConfig::from_file(&path).unwrap();
        assert_eq!(config.cli_command, "./save-cli");
    }

    #[test]
    fn from_file_missing() {
        let err = AgentConfig::from_file(Path::new("/nonexistent/agent.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
