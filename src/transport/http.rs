//! reqwest-backed transport.

use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use super::{Reply, Transport, TransportError};

/// HTTP transport with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

fn classify(url: &str, err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else {
        TransportError::Request {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<Reply, TransportError> {
        trace!(url, "POST");

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| classify(url, &e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| classify(url, &e))?;

        trace!(url, status, "Response received");
        Ok(Reply { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let transport = HttpTransport::new(Duration::from_millis(500)).unwrap();

        // Port 9 (discard) is not expected to accept HTTP on a test host.
        let result = transport
            .post_json("http://127.0.0.1:9/heartbeat", &serde_json::json!({}))
            .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("127.0.0.1:9"));
    }
}
