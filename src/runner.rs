//! Test tool invocation.
//!
//! A runner launches the configured command with the job's arguments,
//! sends everything it prints to a log file and reports the raw exit code.
//! Interpreting that code is the controller's business.

mod shell;

pub use shell::ShellRunner;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code of the process (0 = success, -1 = killed by a signal).
    pub exit_code: i32,
    /// File holding the combined stdout/stderr.
    pub log_file: PathBuf,
}

impl ExecutionResult {
    pub const fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// The tool could not be run at all. A non-zero exit is not an error.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to create log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Something that can run the test tool.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` with `args` appended, writing output to `log_file`,
    /// and wait for it to exit.
    async fn run(
        &self,
        command: &str,
        args: &str,
        log_file: &Path,
    ) -> Result<ExecutionResult, RunnerError>;
}
