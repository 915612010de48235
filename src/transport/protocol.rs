//! Wire messages exchanged with the orchestrator and the backend.
//!
//! All bodies are JSON with camelCase keys.

use serde::{Deserialize, Serialize};

use crate::report::{TestOutcome, TestResultStatus};
use crate::state::AgentState;

/// Liveness/status message sent to the orchestrator every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub agent_id: String,
    pub state: AgentState,
    pub execution_progress: ExecutionProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionProgress {
    /// Percent, 0..=100.
    pub progress: u8,
}

impl Heartbeat {
    pub fn new(agent_id: impl Into<String>, state: AgentState, progress: u8) -> Self {
        Self {
            agent_id: agent_id.into(),
            state,
            execution_progress: ExecutionProgress {
                progress: progress.min(100),
            },
        }
    }
}

/// Directive returned by the orchestrator for a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HeartbeatResponse {
    /// Run the tool with these arguments.
    #[serde(rename = "NewJobResponse", rename_all = "camelCase")]
    NewJob { cli_args: String },
    /// Nothing to do; go idle.
    #[serde(rename = "WaitResponse")]
    Wait,
    /// Keep doing whatever the agent is doing.
    #[serde(rename = "ContinueResponse")]
    Continue,
}

/// Version announcement sent once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentVersion {
    pub agent_id: String,
    pub version: String,
}

/// Raw tool output for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogs {
    pub agent_id: String,
    pub cli_logs: Vec<String>,
}

/// One test result as the backend stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestExecutionDto {
    pub file_path: String,
    pub plugin_name: String,
    pub agent_id: String,
    pub status: TestResultStatus,
    pub start_time_seconds: i64,
    pub end_time_seconds: i64,
    pub unmatched: Option<u64>,
    pub matched: Option<u64>,
    pub expected: Option<u64>,
    pub unexpected: Option<u64>,
}

impl TestExecutionDto {
    pub fn from_outcome(agent_id: &str, outcome: &TestOutcome) -> Self {
        let counts = outcome.counts.unwrap_or_default();
        Self {
            file_path: outcome.test_path.clone(),
            plugin_name: outcome.plugin.clone(),
            agent_id: agent_id.to_string(),
            status: outcome.status,
            start_time_seconds: outcome.start_time,
            end_time_seconds: outcome.end_time,
            unmatched: counts.unmatched,
            matched: counts.matched,
            expected: counts.expected,
            unexpected: counts.unexpected,
        }
    }
}
