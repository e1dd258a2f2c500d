//! Local execution of instrumented workflows.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Act                                │
//! │                                                              │
//! │  workflow ──► sh -c "timeout N act ... -W <workflow>"        │
//! │                     │                                        │
//! │                     ├── stdout/stderr (streamed, buffered)   │
//! │                     └── exit code                            │
//! │                                                              │
//! │  JUnit XML ──► TestCaseRecords ──► FailureStrategy ──► failed│
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`Act`]: builds and runs the act command line for one workflow
//! - [`FailureStrategy`]: decides whether a finished run failed
//! - [`DockerRuntime`]: runner image checks and container cleanup
//! - [`ExecutionResult`]: everything observed about one run

pub mod act;
pub mod docker;
pub mod strategy;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::cache::CacheError;
use crate::report::TestCaseRecord;
use crate::workflow::{Workflow, WorkflowError};

pub use act::Act;
pub use docker::DockerRuntime;
pub use strategy::{ExitCodeFailureStrategy, FailureStrategy, TestsFailureStrategy};

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;

/// Errors that prevent a workflow from being run.
///
/// A run that starts and exits non-zero is not an error; it produces an
/// [`ExecutionResult`] that the [`FailureStrategy`] classifies.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("act is not installed or not working: {0}")]
    ActNotInstalled(String),

    #[error("Runner image {0} does not exist")]
    ImageMissing(String),

    #[error("Failed to execute act: {0}")]
    ExecFailed(String),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Workflow identification in an [`ExecutionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowInfo {
    pub path: PathBuf,
    /// Build tool label.
    #[serde(rename = "type")]
    pub build_tool: String,
}

impl WorkflowInfo {
    pub fn from_workflow(workflow: &Workflow) -> Self {
        Self {
            path: workflow.path().to_path_buf(),
            build_tool: workflow.build_tool(),
        }
    }
}

/// Outcome of running one workflow with act.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Set by the [`FailureStrategy`] after the run.
    pub failed: bool,
    pub tests: Vec<TestCaseRecord>,
    pub stdout: String,
    pub stderr: String,
    pub workflow: WorkflowInfo,
    pub workflow_name: String,
    pub build_tool: String,
    #[serde(rename = "elapsed_time", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub default_actions: bool,
    pub return_code: i32,
}

impl ExecutionResult {
    /// Tests that failed an assertion.
    pub fn failed_tests(&self) -> Vec<&TestCaseRecord> {
        self.tests.iter().filter(|t| t.is_failed()).collect()
    }

    /// Tests that raised an error.
    pub fn erroring_tests(&self) -> Vec<&TestCaseRecord> {
        self.tests.iter().filter(|t| t.is_error()).collect()
    }
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::report::{OutcomeKind, TestOutcome};

    pub(crate) fn result(return_code: i32, tests: Vec<TestCaseRecord>) -> ExecutionResult {
        ExecutionResult {
            failed: false,
            tests,
            stdout: String::new(),
            stderr: String::new(),
            workflow: WorkflowInfo {
                path: PathBuf::from(".github/workflows/ci-replay.yml"),
                build_tool: "maven".to_string(),
            },
            workflow_name: "CI".to_string(),
            build_tool: "maven".to_string(),
            elapsed: Duration::from_millis(1500),
            default_actions: false,
            return_code,
        }
    }

    #[test]
    fn test_failed_and_erroring_tests() {
        let run = result(
            1,
            vec![
                TestCaseRecord::new("a", "ok"),
                TestCaseRecord::new("a", "bad").with_outcome(TestOutcome::new(OutcomeKind::Failure)),
                TestCaseRecord::new("a", "err").with_outcome(TestOutcome::new(OutcomeKind::Error)),
                TestCaseRecord::new("a", "skip").with_outcome(TestOutcome::new(OutcomeKind::Skipped)),
            ],
        );

        let failed: Vec<_> = run.failed_tests().into_iter().map(|t| t.name.as_str()).collect();
        let erroring: Vec<_> = run.erroring_tests().into_iter().map(|t| t.name.as_str()).collect();
        assert_eq!(failed, vec!["bad"]);
        assert_eq!(erroring, vec!["err"]);
    }

    #[test]
    fn test_serialized_shape() {
        let run = result(0, vec![TestCaseRecord::new("pkg.Test", "works")]);
        let json = serde_json::to_value(&run).unwrap();

        assert_eq!(json["failed"], false);
        assert_eq!(json["workflow"]["path"], ".github/workflows/ci-replay.yml");
        assert_eq!(json["workflow"]["type"], "maven");
        assert_eq!(json["workflow_name"], "CI");
        assert_eq!(json["elapsed_time"], 1.5);
        assert_eq!(json["default_actions"], false);
        assert_eq!(json["return_code"], 0);
        assert_eq!(json["tests"][0]["results"][0]["result"], "Passed");
    }
}
