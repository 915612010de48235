//! `sh -c` runner.
//!
//! The command line is handed to the shell verbatim, so job arguments may
//! carry quoting and globs exactly as the orchestrator wrote them.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{CommandRunner, ExecutionResult, RunnerError};

/// Runner that executes the tool through `sh -c`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellRunner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// Use a different shell binary (it must understand `-c`).
    #[must_use]
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

fn command_line(command: &str, args: &str) -> String {
    let args = args.trim();
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{command} {args}")
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    #[instrument(skip(self), fields(shell = %self.shell))]
    async fn run(
        &self,
        command: &str,
        args: &str,
        log_file: &Path,
    ) -> Result<ExecutionResult, RunnerError> {
        let line = command_line(command, args);
        debug!(command = %line, "Launching test tool");

        let log_err = |source| RunnerError::LogFile {
            path: log_file.to_path_buf(),
            source,
        };
        let stdout = File::create(log_file).await.map_err(log_err)?.into_std().await;
        let stderr = stdout.try_clone().map_err(log_err)?;

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&line)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|source| RunnerError::Launch {
                command: line.clone(),
                source,
            })?;

        let status = child.wait().await.map_err(|source| RunnerError::Wait {
            command: line.clone(),
            source,
        })?;

        let result = ExecutionResult {
            exit_code: status.code().unwrap_or(-1),
            log_file: log_file.to_path_buf(),
        };

        debug!(exit_code = result.exit_code, "Test tool exited");

        Ok(result)
    }
}
