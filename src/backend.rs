//! Result and log uploads.
//!
//! Each call is a single attempt. Retrying is left to
//! [`ResilientReporter`](crate::retry::ResilientReporter), so every upload
//! shares one backoff policy.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::config::AgentConfig;
use crate::report::TestOutcome;
use crate::transport::{AgentVersion, ExecutionLogs, TestExecutionDto, Transport};

/// Outcome of one upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Success,
    /// The server answered with a non-2xx status.
    WrongStatus(u16),
    /// No response (connection failure or timeout).
    TransportError(String),
}

/// Client for the backend and orchestrator upload endpoints.
#[derive(Clone)]
pub struct BackendClient {
    transport: Arc<dyn Transport>,
    agent_id: String,
    additional_data_url: String,
    execution_data_url: String,
    execution_logs_url: String,
}

impl BackendClient {
    pub fn new(config: &AgentConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            agent_id: config.id.clone(),
            additional_data_url: config.additional_data_url(),
            execution_data_url: config.execution_data_url(),
            execution_logs_url: config.execution_logs_url(),
        }
    }

    /// Announce the agent version.
    pub async fn post_version(&self, version: &str) -> UploadOutcome {
        let body = AgentVersion {
            agent_id: self.agent_id.clone(),
            version: version.to_string(),
        };
        self.post(&self.additional_data_url, &body).await
    }

    /// Upload the results of one job.
    pub async fn post_execution_data(&self, outcomes: &[TestOutcome]) -> UploadOutcome {
        let body: Vec<TestExecutionDto> = outcomes
            .iter()
            .map(|outcome| TestExecutionDto::from_outcome(&self.agent_id, outcome))
            .collect();
        self.post(&self.execution_data_url, &body).await
    }

    /// Upload the raw tool output of one job.
    pub async fn post_logs(&self, logs: &ExecutionLogs) -> UploadOutcome {
        self.post(&self.execution_logs_url, logs).await
    }

    async fn post<T: Serialize + Sync>(&self, url: &str, body: &T) -> UploadOutcome {
        let json = match serde_json::to_value(body) {
            Ok(json) => json,
            // Plain structs of strings and numbers; serialization cannot fail.
            Err(e) => return UploadOutcome::TransportError(format!("encoding failed: {e}")),
        };

        match self.transport.post_json(url, &json).await {
            Ok(reply) if reply.is_success() => UploadOutcome::Success,
            Ok(reply) => {
                debug!(url, status = reply.status, body = %reply.body, "Upload rejected");
                UploadOutcome::WrongStatus(reply.status)
            }
            Err(e) => UploadOutcome::TransportError(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::TestResultStatus;
    use crate::transport::{Reply, TransportError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedTransport {
        reply: Result<Reply, TransportError>,
        seen: Mutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn post_json(
            &self,
            url: &str,
            body: &serde_json::Value,
        ) -> Result<Reply, TransportError> {
            self.seen
                .lock()
                .unwrap()
                .push((url.to_string(), body.clone()));
            self.reply.clone()
        }
    }

    fn client(reply: Result<Reply, TransportError>) -> (BackendClient, Arc<FixedTransport>) {
        let config = AgentConfig::from_json(
            r#"{
                "id": "agent-7",
                "backend": { "url": "http://backend" },
                "orchestrator_url": "http://orchestrator",
                "cli_command": "true"
            }"#,
        )
        .unwrap();
        let transport = Arc::new(FixedTransport {
            reply,
            seen: Mutex::new(Vec::new()),
        });
        (BackendClient::new(&config, transport.clone()), transport)
    }

    #[tokio::test]
    async fn version_goes_to_additional_data_endpoint() {
        let (client, transport) = client(Ok(Reply::new(200, "")));

        assert_eq!(client.post_version("1.0").await, UploadOutcome::Success);

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].0, "http://backend/internal/saveAgentVersion");
        assert_eq!(
            seen[0].1,
            serde_json::json!({ "agentId": "agent-7", "version": "1.0" })
        );
    }

    #[tokio::test]
    async fn execution_data_is_sent_as_dtos() {
        let (client, transport) = client(Ok(Reply::new(201, "")));
        let outcome = TestOutcome {
            test_path: "a/Test.kt".to_string(),
            plugin: "WarnPlugin".to_string(),
            status: TestResultStatus::Failed,
            start_time: 100,
            end_time: 160,
            counts: None,
        };

        assert_eq!(
            client.post_execution_data(&[outcome]).await,
            UploadOutcome::Success
        );

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].0, "http://backend/internal/saveTestResult");
        assert_eq!(
            seen[0].1,
            serde_json::json!([{
                "filePath": "a/Test.kt",
                "pluginName": "WarnPlugin",
                "agentId": "agent-7",
                "status": "FAILED",
                "startTimeSeconds": 100,
                "endTimeSeconds": 160,
                "unmatched": null,
                "matched": null,
                "expected": null,
                "unexpected": null
            }])
        );
    }

    #[tokio::test]
    async fn logs_go_to_orchestrator() {
        let (client, transport) = client(Ok(Reply::new(200, "")));
        let logs = ExecutionLogs {
            agent_id: "agent-7".to_string(),
            cli_logs: vec!["hello".to_string()],
        };

        client.post_logs(&logs).await;

        assert_eq!(
            transport.seen.lock().unwrap()[0].0,
            "http://orchestrator/executionLogs"
        );
    }

    #[tokio::test]
    async fn non_success_status_is_wrong_status() {
        let (client, _) = client(Ok(Reply::new(503, "down")));
        assert_eq!(
            client.post_version("1.0").await,
            UploadOutcome::WrongStatus(503)
        );
    }

    #[tokio::test]
    async fn transport_failure_is_transport_error() {
        let (client, _) = client(Err(TransportError::Timeout {
            url: "http://backend".to_string(),
        }));
        assert!(matches!(
            client.post_version("1.0").await,
            UploadOutcome::TransportError(_)
        ));
    }
}
