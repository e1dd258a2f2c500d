//! Test report parsing and result summaries.
//!
//! Workflows instrumented by replayci leave JUnit XML reports behind in the
//! repository checkout. This module turns those reports into
//! [`TestCaseRecord`]s and prints console summaries of whole workflow sets.

pub mod junit;

use std::time::Duration;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

pub use junit::{parse_junit_str, parse_test_results};

use crate::orchestrator::WorkflowSetReport;

/// Kind of a single outcome entry attached to a test case.
///
/// The names match the element names of JUnit XML (`<failure>`, `<error>`,
/// `<skipped>`); `Passed` is synthesized for test cases without children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutcomeKind {
    Passed,
    Failure,
    Error,
    Skipped,
}

/// One `<failure>`, `<error>` or `<skipped>` entry of a test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub kind: OutcomeKind,
    pub message: String,
    pub r#type: String,
    /// Body text of the element (usually a stack trace).
    pub text: String,
}

impl TestOutcome {
    pub fn new(kind: OutcomeKind) -> Self {
        Self {
            kind,
            message: String::new(),
            r#type: String::new(),
            text: String::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_type(mut self, r#type: impl Into<String>) -> Self {
        self.r#type = r#type.into();
        self
    }
}

impl Serialize for TestOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TestOutcome", 3)?;
        state.serialize_field("result", &self.kind)?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("type", &self.r#type)?;
        state.end()
    }
}

/// A single `<testcase>` parsed from a JUnit XML report.
///
/// Records are produced only by the parser in [`junit`]. A record with no
/// outcome entries is a passed test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestCaseRecord {
    pub classname: String,
    pub name: String,
    #[serde(rename = "time", serialize_with = "serialize_secs")]
    pub duration: Duration,
    #[serde(rename = "results", serialize_with = "serialize_outcomes")]
    pub outcomes: Vec<TestOutcome>,
    pub stdout: String,
    pub stderr: String,
}

impl TestCaseRecord {
    pub fn new(classname: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            classname: classname.into(),
            name: name.into(),
            duration: Duration::ZERO,
            outcomes: Vec::new(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn with_outcome(mut self, outcome: TestOutcome) -> Self {
        self.outcomes.push(outcome);
        self
    }

    /// Returns `true` if no failure, error or skip was recorded.
    pub fn is_passed(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.kind == OutcomeKind::Passed)
    }

    pub fn is_skipped(&self) -> bool {
        self.outcomes.iter().any(|o| o.kind == OutcomeKind::Skipped)
    }

    pub fn is_error(&self) -> bool {
        self.outcomes.iter().any(|o| o.kind == OutcomeKind::Error)
    }

    /// Returns `true` for a test that ran and failed an assertion.
    ///
    /// Skipped and erroring tests are not counted as failed.
    pub fn is_failed(&self) -> bool {
        !self.is_passed() && !self.is_skipped() && !self.is_error()
    }
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

fn serialize_outcomes<S: Serializer>(
    outcomes: &[TestOutcome],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    if outcomes.is_empty() {
        [TestOutcome::new(OutcomeKind::Passed)].serialize(serializer)
    } else {
        outcomes.serialize(serializer)
    }
}

/// Prints a summary of a workflow set run to the console.
pub fn print_summary(repository: &str, report: &WorkflowSetReport) {
    println!();
    println!("{}", console::style(repository).bold());
    println!("  Workflows:      {}", report.num_workflows);
    println!("  Test workflows: {}", report.num_test_workflows);

    for run in &report.runs {
        let status = if run.failed {
            console::style("FAILED").red().bold()
        } else {
            console::style("OK").green().bold()
        };
        println!(
            "  {} {} ({}) tests={} failing={} erroring={} rc={} in {:.1}s",
            status,
            run.workflow.path.display(),
            run.build_tool,
            run.tests.len(),
            run.failed_tests().len(),
            run.erroring_tests().len(),
            run.return_code,
            run.elapsed.as_secs_f64(),
        );
    }

    for error in &report.errors {
        println!("  {} {}", console::style("ERROR").red().bold(), error);
    }

    if report.num_test_workflows == 0 {
        println!(
            "{}",
            console::style("  No workflow with a recognizable test step.").dim()
        );
    }
}
