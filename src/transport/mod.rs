//! Network seam between the agent and its collaborators.
//!
//! Everything the agent sends is a JSON `POST`. The `Transport` trait hides
//! the HTTP client so heartbeat and upload logic can be exercised against a
//! scripted transport.

pub mod http;
pub mod protocol;

pub use http::HttpTransport;
pub use protocol::{
    AgentVersion, ExecutionLogs, ExecutionProgress, Heartbeat, HeartbeatResponse,
    TestExecutionDto,
};

use async_trait::async_trait;
use thiserror::Error;

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// The request never produced a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
}

/// JSON-over-HTTP client.
///
/// Implementations bound each call by the configured request timeout and
/// report a timeout as [`TransportError::Timeout`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<Reply, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AgentState;

    #[test]
    fn success_is_2xx() {
        assert!(Reply::new(200, "").is_success());
        assert!(Reply::new(204, "").is_success());
        assert!(!Reply::new(199, "").is_success());
        assert!(!Reply::new(302, "").is_success());
        assert!(!Reply::new(500, "").is_success());
    }

    #[test]
    fn heartbeat_serializes_as_expected() {
        let hb = Heartbeat::new("agent-1", AgentState::Busy, 0);
        let json = serde_json::to_value(&hb).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "agentId": "agent-1",
                "state": "BUSY",
                "executionProgress": { "progress": 0 }
            })
        );
    }

    #[test]
    fn heartbeat_progress_is_capped() {
        let hb = Heartbeat::new("a", AgentState::Finished, 250);
        assert_eq!(hb.execution_progress.progress, 100);
    }

    #[test]
    fn deserialize_response_variants() {
        let resp: HeartbeatResponse =
            serde_json::from_str(r#"{"type":"NewJobResponse","cliArgs":"--config x"}"#).unwrap();
        assert_eq!(
            resp,
            HeartbeatResponse::NewJob {
                cli_args: "--config x".to_string()
            }
        );

        let resp: HeartbeatResponse = serde_json::from_str(r#"{"type":"WaitResponse"}"#).unwrap();
        assert_eq!(resp, HeartbeatResponse::Wait);

        let resp: HeartbeatResponse =
            serde_json::from_str(r#"{"type":"ContinueResponse"}"#).unwrap();
        assert_eq!(resp, HeartbeatResponse::Continue);
    }

    #[test]
    fn reject_unknown_response_shapes() {
        for body in [
            r#"{"type":"TerminateResponse"}"#,
            r#"{"type":"NewJobResponse"}"#,
            r#"{"cliArgs":"x"}"#,
            r#"[]"#,
            "not json",
        ] {
            assert!(
                serde_json::from_str::<HeartbeatResponse>(body).is_err(),
                "accepted {body}"
            );
        }
    }

    #[test]
    fn logs_serialize_camel_case() {
        let logs = ExecutionLogs {
            agent_id: "a".to_string(),
            cli_logs: vec!["line".to_string()],
        };
        let json = serde_json::to_string(&logs).unwrap();
        assert_eq!(json, r#"{"agentId":"a","cliLogs":["line"]}"#);
    }
}
