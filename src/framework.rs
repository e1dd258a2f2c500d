//! Build tool variants.
//!
//! A workflow's test steps are rewritten differently for every build
//! ecosystem: Maven already writes surefire XML and only needs skip flags
//! removed, pytest needs `--junitxml`, cargo needs its JSON output piped
//! through `cargo2junit`, and so on. Each ecosystem is one implementation
//! of the [`BuildTool`] trait.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            BuildTool                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  is_test_command(run) ──────► does this step run the tests?      │
//! │                                                                  │
//! │  instrument_test_steps(doc) ─► report flags on test commands     │
//! │  instrument_offline(doc)  ┐                                      │
//! │  instrument_online(doc)   ┴──► exactly one, after test steps     │
//! │                                                                  │
//! │  report_location() ─────────► where the JUnit XML ends up        │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Built-in Build Tools
//!
//! | Implementation | Test command | Report |
//! |----------------|--------------|--------|
//! | [`maven::MavenTool`] | `mvn test` | `target/surefire-reports` |
//! | [`gradle::GradleTool`] | `gradle test` | `build/test-results/test` |
//! | [`pytest::PytestTool`] | `pytest` | `report.xml` |
//! | [`unittest::UnittestTool`] | `python -m unittest` | `report.xml` |
//! | [`go::GoTool`] | `go test` | `report.xml` |
//! | [`cargo::CargoTool`] | `cargo test` | `results.xml` |
//! | [`package::PackageTool`] | `npm test`, `yarn test`, `pnpm test` | `junit.xml` |
//! | [`unknown::UnknownTool`] | never | none |
//!
//! The variant is chosen once, by
//! [`WorkflowFactory`](crate::workflow::factory::WorkflowFactory), from the
//! repository language and the classified build tool.

pub mod cargo;
pub mod go;
pub mod gradle;
pub mod maven;
pub mod package;
pub mod pytest;
pub mod unittest;
pub mod unknown;

use std::fmt;
use std::path::{Path, PathBuf};

use serde_yaml::Value;

use crate::report::{TestCaseRecord, parse_test_results};
use crate::workflow::WorkflowResult;
use crate::workflow::document::{WorkflowDocument, new_step, step_name, step_run};

/// Build tools recognised by the classifier, in tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildToolKind {
    Maven,
    Gradle,
    Pytest,
    Unittest,
    Go,
    Npm,
    Yarn,
    Pnpm,
    Cargo,
}

impl BuildToolKind {
    /// Registration order. The first tool reaching the top score wins.
    pub const ALL: [BuildToolKind; 9] = [
        BuildToolKind::Maven,
        BuildToolKind::Gradle,
        BuildToolKind::Pytest,
        BuildToolKind::Unittest,
        BuildToolKind::Go,
        BuildToolKind::Npm,
        BuildToolKind::Yarn,
        BuildToolKind::Pnpm,
        BuildToolKind::Cargo,
    ];

    /// Tokens of a `run` command that count towards this tool.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            BuildToolKind::Maven => &["maven", "mvn", "mavenw", "mvnw", "./mvnw"],
            BuildToolKind::Gradle => &["gradle", "./gradlew", "gradlew"],
            BuildToolKind::Pytest => &["pytest"],
            BuildToolKind::Unittest => &["unittest"],
            BuildToolKind::Go => &["go"],
            BuildToolKind::Npm => &["npm"],
            BuildToolKind::Yarn => &["yarn"],
            BuildToolKind::Pnpm => &["pnpm"],
            BuildToolKind::Cargo => &["cargo"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildToolKind::Maven => "maven",
            BuildToolKind::Gradle => "gradle",
            BuildToolKind::Pytest => "pytest",
            BuildToolKind::Unittest => "unittest",
            BuildToolKind::Go => "go",
            BuildToolKind::Npm => "npm",
            BuildToolKind::Yarn => "yarn",
            BuildToolKind::Pnpm => "pnpm",
            BuildToolKind::Cargo => "cargo",
        }
    }
}

impl fmt::Display for BuildToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ecosystem-specific workflow instrumentation.
///
/// Implementations only touch the steps they recognise as test steps (plus
/// the helper steps they insert), and every pass is safe to repeat: a second
/// call leaves the document unchanged.
pub trait BuildTool: Send + Sync + fmt::Debug {
    /// Stable label reported in run results (`maven`, `npm, jest`, ...).
    fn label(&self) -> String;

    /// Returns `true` if a `run` command executes this tool's tests.
    fn is_test_command(&self, command: &str) -> bool;

    /// Rewrites test commands so they produce JUnit XML.
    ///
    /// `repo_root` is the checkout the workflow belongs to; variants that
    /// rewrite repository files (such as `package.json`) resolve them there.
    fn instrument_test_steps(
        &mut self,
        _doc: &mut WorkflowDocument,
        _repo_root: &Path,
    ) -> WorkflowResult<()> {
        Ok(())
    }

    /// Adjusts the workflow for a sandbox without network access.
    fn instrument_offline(&self, _doc: &mut WorkflowDocument) {}

    /// Adds the steps that install the report tooling.
    fn instrument_online(&self, _doc: &mut WorkflowDocument) {}

    /// Path of the JUnit XML output, relative to the repository root.
    fn report_location(&self) -> &str;

    /// Parses the reports produced by a run of this workflow.
    fn test_results(&self, repo_root: &Path) -> Vec<TestCaseRecord> {
        parse_test_results(&repo_root.join(self.report_location()))
    }

    /// Repository files modified as a side effect of instrumentation.
    fn additional_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn clone_box(&self) -> Box<dyn BuildTool>;
}

impl Clone for Box<dyn BuildTool> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Rewrites every test line of every test step.
///
/// Multi-line `run` blocks are handled line by line: only lines matching
/// `is_test` are passed to `rewrite` (trimmed), the others are kept as is.
pub(crate) fn rewrite_test_steps(
    doc: &mut WorkflowDocument,
    is_test: impl Fn(&str) -> bool,
    rewrite: impl Fn(&str) -> String,
) {
    for step in doc.steps_mut() {
        let Some(run) = step_run(step) else {
            continue;
        };
        if !is_test(run) {
            continue;
        }

        let rewritten = run
            .lines()
            .map(|line| {
                if is_test(line) {
                    rewrite(line.trim())
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();
        step.insert(Value::from("run"), Value::from(rewritten));
    }
}

/// Inserts `steps` (`(name, run)` pairs) right before the first test step
/// of the first job that has one.
///
/// Steps whose name already appears in that job are skipped.
pub(crate) fn insert_before_first_test_step(
    doc: &mut WorkflowDocument,
    is_test: impl Fn(&str) -> bool,
    steps: &[(&str, &str)],
) {
    let Some(jobs) = doc.jobs_mut() else {
        return;
    };

    for (_, job) in jobs.iter_mut() {
        let Some(job_steps) = job.get_mut("steps").and_then(Value::as_sequence_mut) else {
            continue;
        };
        let Some(index) = job_steps
            .iter()
            .position(|s| s.as_mapping().and_then(step_run).is_some_and(&is_test))
        else {
            continue;
        };

        let missing: Vec<Value> = steps
            .iter()
            .filter(|(name, _)| !has_step_named(job_steps, name))
            .map(|(name, run)| new_step(name, run))
            .collect();
        for (offset, step) in missing.into_iter().enumerate() {
            job_steps.insert(index + offset, step);
        }
        return;
    }
}

/// Appends a step to the first job that has a test step.
pub(crate) fn append_to_first_test_job(
    doc: &mut WorkflowDocument,
    is_test: impl Fn(&str) -> bool,
    name: &str,
    run: &str,
) {
    let Some(jobs) = doc.jobs_mut() else {
        return;
    };

    for (_, job) in jobs.iter_mut() {
        let Some(job_steps) = job.get_mut("steps").and_then(Value::as_sequence_mut) else {
            continue;
        };
        let has_test = job_steps
            .iter()
            .any(|s| s.as_mapping().and_then(step_run).is_some_and(&is_test));
        if !has_test {
            continue;
        }
        if !has_step_named(job_steps, name) {
            job_steps.push(new_step(name, run));
        }
        return;
    }
}

fn has_step_named(steps: &[Value], name: &str) -> bool {
    steps
        .iter()
        .filter_map(Value::as_mapping)
        .any(|s| step_name(s) == Some(name))
}

/// Appends `flag` to `line` unless it is already one of its tokens.
pub(crate) fn ensure_flag(line: &str, flag: &str) -> String {
    if line.split_whitespace().any(|token| token == flag) {
        line.to_string()
    } else {
        format!("{} {}", line, flag)
    }
}

pub(crate) fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}
