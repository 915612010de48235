//! Test tool JSON report.
//!
//! The report is a list of test-suite executions, each holding plugin
//! executions, each holding per-test results. [`read`] flattens the three
//! levels into one list of [`TestOutcome`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Normalized result of one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestResultStatus {
    Passed,
    Failed,
    Ignored,
    TestError,
}

/// Warning counters attached to a test result, when the plugin reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DiagnosticCounts {
    #[serde(default)]
    pub unmatched: Option<u64>,
    #[serde(default)]
    pub matched: Option<u64>,
    #[serde(default)]
    pub expected: Option<u64>,
    #[serde(default)]
    pub unexpected: Option<u64>,
}

/// One test case from the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    /// Path of the test resource.
    pub test_path: String,
    pub plugin: String,
    pub status: TestResultStatus,
    /// Unix seconds.
    pub start_time: i64,
    /// Unix seconds.
    pub end_time: i64,
    pub counts: Option<DiagnosticCounts>,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report {} could not be read: {source}", path.display())]
    Missing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("report {} is malformed: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// The tool exited cleanly but reported no tests.
    #[error("report {} contains no test results", path.display())]
    Empty { path: PathBuf },
}

impl ReportError {
    /// Whether the tool itself misbehaved (ran but produced no tests).
    pub const fn is_empty_report(&self) -> bool {
        matches!(self, Self::Empty { .. })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuiteExecution {
    #[serde(default)]
    plugin_executions: Vec<PluginExecution>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PluginExecution {
    plugin: String,
    #[serde(default)]
    test_results: Vec<RawTestResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTestResult {
    resources: TestResources,
    status: RawStatus,
    #[serde(default)]
    debug_info: Option<DebugInfo>,
}

#[derive(Debug, Deserialize)]
struct TestResources {
    test: String,
}

/// Result kinds as the tool writes them. Unknown kinds fail to parse.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawStatus {
    Pass {},
    Fail {},
    Ignored {},
    Crash {},
}

impl RawStatus {
    const fn normalize(&self) -> TestResultStatus {
        match self {
            Self::Pass { .. } => TestResultStatus::Passed,
            Self::Fail { .. } => TestResultStatus::Failed,
            Self::Ignored { .. } => TestResultStatus::Ignored,
            Self::Crash { .. } => TestResultStatus::TestError,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugInfo {
    #[serde(default)]
    count_warnings: Option<DiagnosticCounts>,
}

/// Read and flatten the report at `path`.
///
/// `start_time`/`end_time` (unix seconds) are stamped on every outcome.
/// Reading the same file with the same window always yields the same list.
pub async fn read(
    path: &Path,
    start_time: i64,
    end_time: i64,
) -> Result<Vec<TestOutcome>, ReportError> {
    let json = tokio::fs::read_to_string(path).await.map_err(|source| ReportError::Missing {
        path: path.to_path_buf(),
        source,
    })?;
    let suites: Vec<SuiteExecution> =
        serde_json::from_str(&json).map_err(|source| ReportError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;

    let outcomes: Vec<TestOutcome> = suites
        .into_iter()
        .flat_map(|suite| suite.plugin_executions)
        .flat_map(|plugin| {
            let name = plugin.plugin;
            plugin
                .test_results
                .into_iter()
                .map(move |result| TestOutcome {
                    test_path: result.resources.test,
                    plugin: name.clone(),
                    status: result.status.normalize(),
                    start_time,
                    end_time,
                    counts: result.debug_info.and_then(|info| info.count_warnings),
                })
        })
        .collect();

    if outcomes.is_empty() {
        return Err(ReportError::Empty {
            path: path.to_path_buf(),
        });
    }

    debug!(path = %path.display(), tests = outcomes.len(), "Report read");
    Ok(outcomes)
}
