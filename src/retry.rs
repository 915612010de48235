//! Send-with-retry for backend uploads.
//!
//! One policy for every upload: attempt, and on failure sleep for the
//! current interval, double it, and try again until the attempt budget is
//! spent. The reporter never touches agent state itself; it hands the last
//! failure back and the controller decides the transition.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::UploadOutcome;
use crate::config::AgentConfig;
use crate::state::AgentState;

/// An upload that still failed after the last attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadFailure {
    #[error("{what} rejected with status {status} after {attempts} attempts")]
    Rejected {
        what: String,
        status: u16,
        attempts: u32,
    },
    #[error("{what} unreachable after {attempts} attempts: {cause}")]
    Unreachable {
        what: String,
        cause: String,
        attempts: u32,
    },
}

impl UploadFailure {
    /// State the agent should move to for this failure.
    pub const fn agent_state(&self) -> AgentState {
        match self {
            Self::Rejected { .. } => AgentState::BackendFailure,
            Self::Unreachable { .. } => AgentState::BackendUnreachable,
        }
    }
}

/// Retries an upload with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResilientReporter {
    attempts: u32,
    initial_backoff: Duration,
}

impl ResilientReporter {
    /// `attempts` counts the first try; values below 1 are treated as 1.
    pub fn new(attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_backoff,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.retry.attempts, config.initial_retry())
    }

    /// Sleep taken after the `n`th failed attempt (1-based).
    pub fn backoff(&self, n: u32) -> Duration {
        let factor = 2u32.checked_pow(n.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor)
    }

    /// Run `operation` until it succeeds or the attempts run out.
    ///
    /// `what` names the upload in logs and in the returned failure. No sleep
    /// follows the final attempt.
    pub async fn send<F, Fut>(&self, what: &str, mut operation: F) -> Result<(), UploadFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = UploadOutcome>,
    {
        let mut attempt = 1;
        loop {
            let outcome = operation().await;
            let failure = match &outcome {
                UploadOutcome::Success => {
                    debug!(what, attempt, "Upload succeeded");
                    return Ok(());
                }
                UploadOutcome::WrongStatus(status) => UploadFailure::Rejected {
                    what: what.to_string(),
                    status: *status,
                    attempts: attempt,
                },
                UploadOutcome::TransportError(cause) => UploadFailure::Unreachable {
                    what: what.to_string(),
                    cause: cause.clone(),
                    attempts: attempt,
                },
            };

            if attempt >= self.attempts {
                warn!(what, attempt, outcome = ?outcome, "Upload failed, giving up");
                return Err(failure);
            }

            let delay = self.backoff(attempt);
            warn!(
                what,
                attempt,
                max_attempts = self.attempts,
                retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                outcome = ?outcome,
                "Upload failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
