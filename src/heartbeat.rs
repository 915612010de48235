//! Heartbeat exchange with the orchestrator.
//!
//! A heartbeat is a single time-boxed request. Failures are returned, not
//! retried: the next tick is the retry.

use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use crate::config::AgentConfig;
use crate::transport::{Heartbeat, HeartbeatResponse, Transport, TransportError};

#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("heartbeat could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("orchestrator answered heartbeat with status {status}")]
    Status { status: u16 },
    #[error("unrecognized heartbeat response {body:?}: {source}")]
    Protocol {
        body: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Sends heartbeats and decodes the orchestrator's directive.
#[derive(Clone)]
pub struct HeartbeatClient {
    transport: Arc<dyn Transport>,
    url: String,
}

impl HeartbeatClient {
    pub fn new(config: &AgentConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            url: config.heartbeat_url(),
        }
    }

    pub async fn send(&self, heartbeat: &Heartbeat) -> Result<HeartbeatResponse, HeartbeatError> {
        let body = serde_json::to_value(heartbeat).map_err(HeartbeatError::Encode)?;

        let reply = self.transport.post_json(&self.url, &body).await?;
        if !reply.is_success() {
            return Err(HeartbeatError::Status {
                status: reply.status,
            });
        }

        let response = decode(&reply.body)?;
        trace!(state = %heartbeat.state, response = ?response, "Heartbeat acknowledged");
        Ok(response)
    }
}

/// Decode a response body into one of the three directives.
pub fn decode(body: &str) -> Result<HeartbeatResponse, HeartbeatError> {
    serde_json::from_str(body).map_err(|source| HeartbeatError::Protocol {
        body: body.to_string(),
        source,
    })
}
