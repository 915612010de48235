//! Agent controller: the heartbeat loop and the job it may be running.
//!
//! The heartbeat loop and each job are separate tokio tasks. They share
//! only the atomic state cell and the progress counter; the job's inputs
//! and results move by value. All state changes go through
//! [`AgentController::set_state`].

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::backend::BackendClient;
use crate::config::AgentConfig;
use crate::heartbeat::{HeartbeatClient, HeartbeatError};
use crate::report;
use crate::retry::{ResilientReporter, UploadFailure};
use crate::runner::CommandRunner;
use crate::state::{AgentState, StateCell};
use crate::transport::{ExecutionLogs, Heartbeat, HeartbeatResponse, Transport};

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Results for `tests` test cases were stored by the backend.
    Finished { tests: usize },
    /// The tool could not be run, exited non-zero, or left no usable report.
    CliFailed { reason: String },
    /// The results never reached the backend.
    UploadFailed(UploadFailure),
}

/// Handle to the job task, if one was started.
pub type JobSlot = Option<JoinHandle<JobOutcome>>;

/// Owns the agent's state and drives heartbeats and jobs.
pub struct AgentController {
    config: Arc<AgentConfig>,
    state: StateCell,
    /// Coarse percent complete of the current job.
    progress: AtomicU8,
    heartbeat: HeartbeatClient,
    backend: BackendClient,
    reporter: ResilientReporter,
    runner: Arc<dyn CommandRunner>,
    /// Fire-and-forget uploads, drained before exit.
    uploads: Mutex<JoinSet<()>>,
}

impl AgentController {
    pub fn new(
        config: AgentConfig,
        transport: Arc<dyn Transport>,
        runner: Arc<dyn CommandRunner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            heartbeat: HeartbeatClient::new(&config, Arc::clone(&transport)),
            backend: BackendClient::new(&config, transport),
            reporter: ResilientReporter::from_config(&config),
            config: Arc::new(config),
            state: StateCell::default(),
            progress: AtomicU8::new(0),
            runner,
            uploads: Mutex::new(JoinSet::new()),
        })
    }

    pub fn state(&self) -> AgentState {
        self.state.get()
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Relaxed)
    }

    /// Apply a transition, logging refusals. Returns whether it happened.
    fn set_state(&self, to: AgentState) -> bool {
        match self.state.transition(to) {
            Ok(from) => {
                info!(agent_id = %self.config.id, %from, %to, "State changed");
                true
            }
            Err(e) => {
                warn!(agent_id = %self.config.id, error = %e, "State change refused");
                false
            }
        }
    }

    /// Run until `shutdown` resolves.
    ///
    /// Announces the agent version in the background, then heartbeats every
    /// interval. On shutdown, pending uploads are awaited; a running job is
    /// left alone.
    pub async fn run<F>(self: Arc<Self>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            agent_id = %self.config.id,
            version = %self.config.version,
            orchestrator = %self.config.orchestrator_url,
            "Agent starting"
        );
        self.announce_version().await;

        let interval = self.config.heartbeat_interval();
        let mut job: JobSlot = None;
        tokio::pin!(shutdown);

        loop {
            self.tick(&mut job).await;
            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        if job.as_ref().is_some_and(|handle| !handle.is_finished()) {
            warn!(agent_id = %self.config.id, "Shutting down while a job is still running");
        }
        self.wait_for_uploads().await;
        info!(agent_id = %self.config.id, state = %self.state(), "Agent stopped");
    }

    /// Send one heartbeat and act on the directive.
    ///
    /// Failures are logged and otherwise ignored; the next tick retries.
    pub async fn tick(self: &Arc<Self>, job: &mut JobSlot) {
        self.reap_job(job).await;
        let heartbeat = Heartbeat::new(&self.config.id, self.state(), self.progress());

        match self.heartbeat.send(&heartbeat).await {
            Ok(response) => self.dispatch(response, job),
            Err(e @ HeartbeatError::Protocol { .. }) => {
                error!(agent_id = %self.config.id, error = %e, "Malformed heartbeat response");
            }
            Err(e) => {
                warn!(agent_id = %self.config.id, error = %e, "Heartbeat failed");
            }
        }
    }

    fn dispatch(self: &Arc<Self>, response: HeartbeatResponse, job: &mut JobSlot) {
        if self.state() == AgentState::Starting {
            self.set_state(AgentState::Idle);
        }

        match response {
            HeartbeatResponse::NewJob { cli_args } => self.start_job(cli_args, job),
            HeartbeatResponse::Wait => match self.state() {
                AgentState::Starting | AgentState::Finished | AgentState::CliFailed => {
                    self.set_state(AgentState::Idle);
                }
                AgentState::Busy => debug!("Wait received while busy, job keeps running"),
                AgentState::Idle
                | AgentState::BackendFailure
                | AgentState::BackendUnreachable => {}
            },
            HeartbeatResponse::Continue => {}
        }
    }

    /// Collect a job task that has ended.
    ///
    /// A panicked job never reached a terminal state, so it is recorded as
    /// a tool failure and the agent can take work again.
    async fn reap_job(&self, job: &mut JobSlot) {
        if !job.as_ref().is_some_and(JoinHandle::is_finished) {
            return;
        }
        let Some(handle) = job.take() else {
            return;
        };
        match handle.await {
            Ok(outcome) => debug!(outcome = ?outcome, "Job task collected"),
            Err(e) => {
                error!(agent_id = %self.config.id, error = %e, "Job task did not complete");
                if self.state() == AgentState::Busy {
                    self.cli_failed(format!("job task aborted: {e}"));
                }
            }
        }
    }

    /// Start a job task unless one is already in flight.
    fn start_job(self: &Arc<Self>, cli_args: String, job: &mut JobSlot) {
        if job.as_ref().is_some_and(|handle| !handle.is_finished()) {
            warn!(
                agent_id = %self.config.id,
                cli_args = %cli_args,
                "Job already running, ignoring new job"
            );
            return;
        }
        let state = self.state();
        if !state.accepts_job() {
            warn!(
                agent_id = %self.config.id,
                cli_args = %cli_args,
                state = %state,
                "Cannot accept a job in this state"
            );
            return;
        }
        if !self.set_state(AgentState::Busy) {
            return;
        }

        self.progress.store(0, Ordering::Relaxed);
        *job = Some(tokio::spawn(Arc::clone(self).run_job(cli_args)));
    }

    /// Execute one job to completion. The agent must already be `BUSY`.
    pub async fn run_job(self: Arc<Self>, cli_args: String) -> JobOutcome {
        info!(agent_id = %self.config.id, cli_args = %cli_args, "Starting job");
        let started_at = Utc::now().timestamp();

        let outcome = self.execute(&cli_args, started_at).await;
        match &outcome {
            JobOutcome::Finished { tests } => {
                info!(agent_id = %self.config.id, cli_args = %cli_args, tests, "Job finished");
            }
            JobOutcome::CliFailed { reason } => {
                warn!(agent_id = %self.config.id, cli_args = %cli_args, reason = %reason, "Job failed");
            }
            JobOutcome::UploadFailed(failure) => {
                error!(agent_id = %self.config.id, cli_args = %cli_args, error = %failure, "Job results lost");
            }
        }
        outcome
    }

    async fn execute(self: &Arc<Self>, cli_args: &str, started_at: i64) -> JobOutcome {
        remove_stale(&self.config.report_file).await;
        remove_stale(&self.config.log_file).await;

        let result = self
            .runner
            .run(&self.config.cli_command, cli_args, &self.config.log_file)
            .await;

        self.upload_logs().await;

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                error!(agent_id = %self.config.id, error = %e, "Test tool could not be run");
                return self.cli_failed(e.to_string());
            }
        };
        if !result.succeeded() {
            return self.cli_failed(format!("test tool exited with code {}", result.exit_code));
        }

        let finished_at = Utc::now().timestamp();
        let outcomes = match report::read(&self.config.report_file, started_at, finished_at).await {
            Ok(outcomes) => outcomes,
            Err(e) if e.is_empty_report() => {
                return self.cli_failed("test tool exited with code 0 but ran no tests".to_string());
            }
            Err(e) => {
                error!(agent_id = %self.config.id, error = ?e, "Report could not be read");
                return self.cli_failed(e.to_string());
            }
        };

        let upload = self
            .reporter
            .send("execution data", || self.backend.post_execution_data(&outcomes))
            .await;

        match upload {
            Ok(()) => {
                self.progress.store(100, Ordering::Relaxed);
                self.set_state(AgentState::Finished);
                JobOutcome::Finished {
                    tests: outcomes.len(),
                }
            }
            Err(failure) => {
                self.set_state(failure.agent_state());
                JobOutcome::UploadFailed(failure)
            }
        }
    }

    fn cli_failed(&self, reason: String) -> JobOutcome {
        self.progress.store(100, Ordering::Relaxed);
        self.set_state(AgentState::CliFailed);
        JobOutcome::CliFailed { reason }
    }

    /// Announce the agent version in the background.
    pub async fn announce_version(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.track_upload(async move {
            let version = this.config.version.clone();
            let sent = this
                .reporter
                .send("agent version", || this.backend.post_version(&version))
                .await;
            match sent {
                Ok(()) => debug!(agent_id = %this.config.id, version = %version, "Version announced"),
                Err(failure) => {
                    error!(agent_id = %this.config.id, error = %failure, "Version announcement failed");
                    this.set_state(failure.agent_state());
                }
            }
        })
        .await;
    }

    /// Upload the tool output in the background.
    async fn upload_logs(self: &Arc<Self>) {
        let logs = ExecutionLogs {
            agent_id: self.config.id.clone(),
            cli_logs: read_log_lines(&self.config.log_file).await,
        };
        let this = Arc::clone(self);
        self.track_upload(async move {
            let sent = this
                .reporter
                .send("execution logs", || this.backend.post_logs(&logs))
                .await;
            if let Err(failure) = sent {
                error!(agent_id = %this.config.id, error = %failure, "Execution logs lost");
                this.set_state(failure.agent_state());
            }
        })
        .await;
    }

    /// Spawn a background upload, first collecting the ones that are done.
    async fn track_upload<F>(&self, upload: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut uploads = self.uploads.lock().await;
        while let Some(joined) = uploads.try_join_next() {
            if let Err(e) = joined {
                warn!(error = %e, "Upload task panicked or was cancelled");
            }
        }
        uploads.spawn(upload);
    }

    /// Wait for every background upload started so far.
    pub async fn wait_for_uploads(&self) {
        let mut uploads = std::mem::take(&mut *self.uploads.lock().await);
        while let Some(joined) = uploads.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Upload task panicked or was cancelled");
            }
        }
    }
}

/// Delete output left behind by a previous job.
async fn remove_stale(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed previous job output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Previous job output not removed"),
    }
}

async fn read_log_lines(path: &Path) -> Vec<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_owned)
            .collect(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Tool log not readable, sending no lines");
            Vec::new()
        }
    }
}
