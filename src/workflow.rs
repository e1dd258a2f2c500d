//! GitHub Actions workflows and their instrumentation.
//!
//! A [`Workflow`] pairs a parsed [`WorkflowDocument`] with the
//! [`BuildTool`] variant chosen for it. Instrumentation turns a hosted CI
//! workflow into one that act can run locally and that leaves JUnit XML
//! behind:
//!
//! ```text
//! instrument_os            every job runs on ubuntu-latest
//! instrument_on_events     triggered by push
//! instrument_strategy      first value of every matrix dimension
//! instrument_jobs          test jobs and the jobs they need
//! instrument_cache_steps   no actions/cache
//! instrument_setup_steps   no cache input on actions/setup-*
//! instrument_test_steps    build tool specific report flags
//! instrument_offline_execution / instrument_online_execution
//! ```
//!
//! The passes always run in this order (see [`Workflow::instrument`]). The
//! rewritten document is saved next to the source, which is never
//! overwritten.

pub mod action;
pub mod classifier;
pub mod document;
pub mod factory;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::framework::BuildTool;
use crate::report::TestCaseRecord;

pub use action::Action;
pub use document::WorkflowDocument;
pub use factory::WorkflowFactory;

use document::{remove_key, step_run, step_uses};

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors raised while loading, instrumenting or saving workflows.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Workflow document is empty")]
    Empty,

    #[error("Workflow document is not a mapping")]
    NotAMapping,

    /// Saving would replace the workflow the document was loaded from.
    #[error("Refusing to overwrite source workflow {0}")]
    WouldOverwrite(PathBuf),
}

/// Returns `<stem>-<suffix>.<ext>` next to `path`.
pub fn suffixed_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{}-{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}-{}", stem, suffix),
    };
    path.with_file_name(file_name)
}

/// A workflow document bound to its build tool variant.
#[derive(Debug, Clone)]
pub struct Workflow {
    /// File the document was loaded from.
    source: PathBuf,
    /// Where [`save`](Self::save) writes the document.
    path: PathBuf,
    repo_root: PathBuf,
    doc: WorkflowDocument,
    tool: Box<dyn BuildTool>,
}

impl Workflow {
    pub fn new(
        source: impl Into<PathBuf>,
        repo_root: impl Into<PathBuf>,
        doc: WorkflowDocument,
        tool: Box<dyn BuildTool>,
    ) -> Self {
        let source = source.into();
        Self {
            path: source.clone(),
            source,
            repo_root: repo_root.into(),
            doc,
            tool,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn document(&self) -> &WorkflowDocument {
        &self.doc
    }

    pub fn document_mut(&mut self) -> &mut WorkflowDocument {
        &mut self.doc
    }

    pub fn tool(&self) -> &dyn BuildTool {
        self.tool.as_ref()
    }

    /// Build tool label, e.g. `maven` or `npm, jest`.
    pub fn build_tool(&self) -> String {
        self.tool.label()
    }

    /// The workflow's `name`, or its file stem when it has none.
    pub fn name(&self) -> String {
        match self.doc.name() {
            Some(name) => name.to_string(),
            None => self
                .source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Returns `true` if any step runs the build tool's tests.
    pub fn has_tests(&self) -> bool {
        self.doc
            .run_commands()
            .any(|command| self.tool.is_test_command(command))
    }

    /// Returns `true` if a job matrix uses `include` or `exclude`.
    ///
    /// Those entries add or remove combinations that cannot be reduced to a
    /// single configuration reliably.
    pub fn has_matrix_include_exclude(&self) -> bool {
        self.doc
            .jobs()
            .into_iter()
            .flat_map(|jobs| jobs.values())
            .filter_map(|job| job.get("strategy")?.get("matrix")?.as_mapping())
            .any(|matrix| matrix.contains_key("include") || matrix.contains_key("exclude"))
    }

    fn job_has_tests(&self, job: &Value) -> bool {
        job.get("steps")
            .and_then(Value::as_sequence)
            .into_iter()
            .flatten()
            .filter_map(Value::as_mapping)
            .filter_map(step_run)
            .any(|command| self.tool.is_test_command(command))
    }

    /// Runs every instrumentation pass in order.
    pub fn instrument(&mut self, offline: bool) -> WorkflowResult<()> {
        self.instrument_os();
        self.instrument_on_events();
        self.instrument_strategy();
        self.instrument_jobs();
        self.instrument_cache_steps();
        self.instrument_setup_steps();
        self.instrument_test_steps()?;
        if offline {
            self.instrument_offline_execution();
        } else {
            self.instrument_online_execution();
        }
        Ok(())
    }

    /// Runs every job on `ubuntu-latest`, the only platform act maps.
    pub fn instrument_os(&mut self) {
        let Some(jobs) = self.doc.jobs_mut() else {
            return;
        };

        for (_, job) in jobs.iter_mut() {
            let Some(job) = job.as_mapping_mut() else {
                continue;
            };
            // Reusable workflow calls have no runner of their own.
            if job.contains_key("uses") {
                continue;
            }
            job.insert(Value::from("runs-on"), Value::from("ubuntu-latest"));

            let matrix = job
                .get_mut("strategy")
                .and_then(|strategy| strategy.get_mut("matrix"))
                .and_then(Value::as_mapping_mut);
            if let Some(matrix) = matrix
                && matrix.contains_key("os")
            {
                matrix.insert(
                    Value::from("os"),
                    Value::Sequence(vec![Value::from("ubuntu-latest")]),
                );
            }
        }
    }

    pub fn instrument_on_events(&mut self) {
        self.doc.set("on", "push");
    }

    /// Reduces every matrix to its first combination.
    pub fn instrument_strategy(&mut self) {
        let Some(jobs) = self.doc.jobs_mut() else {
            return;
        };

        for (_, job) in jobs.iter_mut() {
            let Some(strategy) = job.get_mut("strategy").and_then(Value::as_mapping_mut) else {
                continue;
            };

            if let Some(matrix) = strategy.get_mut("matrix").and_then(Value::as_mapping_mut) {
                for (key, values) in matrix.iter_mut() {
                    if matches!(key.as_str(), Some("include" | "exclude")) {
                        continue;
                    }
                    if let Value::Sequence(values) = values {
                        values.truncate(1);
                    }
                }
            }
            strategy.insert(Value::from("fail-fast"), Value::from(false));
        }
    }

    /// Keeps the jobs with test steps and every job they transitively need.
    pub fn instrument_jobs(&mut self) {
        let Some(jobs) = self.doc.jobs() else {
            return;
        };

        let mut pending: Vec<String> = jobs
            .iter()
            .filter(|(_, job)| self.job_has_tests(job))
            .filter_map(|(name, _)| name.as_str().map(str::to_string))
            .collect();
        let mut keep: HashSet<String> = HashSet::new();
        while let Some(name) = pending.pop() {
            if !keep.insert(name.clone()) {
                continue;
            }
            if let Some(job) = jobs.get(name.as_str()) {
                pending.extend(job_needs(job));
            }
        }

        if let Some(jobs) = self.doc.jobs_mut() {
            *jobs = std::mem::take(jobs)
                .into_iter()
                .filter(|(name, _)| name.as_str().is_some_and(|name| keep.contains(name)))
                .collect();
        }
    }

    /// Drops `actions/cache` steps; the sandbox has no cache server.
    pub fn instrument_cache_steps(&mut self) {
        let Some(jobs) = self.doc.jobs_mut() else {
            return;
        };

        for (_, job) in jobs.iter_mut() {
            if let Some(steps) = job.get_mut("steps").and_then(Value::as_sequence_mut) {
                steps.retain(|step| {
                    !step
                        .as_mapping()
                        .and_then(step_uses)
                        .is_some_and(|uses| uses.starts_with("actions/cache"))
                });
            }
        }
    }

    /// Removes the `cache` input of `actions/setup-*` steps.
    pub fn instrument_setup_steps(&mut self) {
        for step in self.doc.steps_mut() {
            if !step_uses(step).is_some_and(|uses| uses.starts_with("actions/setup-")) {
                continue;
            }
            if let Some(with) = step.get_mut("with").and_then(Value::as_mapping_mut) {
                remove_key(with, "cache");
            }
        }
    }

    pub fn instrument_test_steps(&mut self) -> WorkflowResult<()> {
        self.tool
            .instrument_test_steps(&mut self.doc, &self.repo_root)
    }

    pub fn instrument_offline_execution(&mut self) {
        self.tool.instrument_offline(&mut self.doc);
    }

    pub fn instrument_online_execution(&mut self) {
        self.tool.instrument_online(&mut self.doc);
    }

    /// Absolute location of the JUnit XML output.
    pub fn report_path(&self) -> PathBuf {
        self.repo_root.join(self.tool.report_location())
    }

    pub fn test_results(&self) -> Vec<TestCaseRecord> {
        self.tool.test_results(&self.repo_root)
    }

    pub fn additional_files(&self) -> Vec<PathBuf> {
        self.tool.additional_files()
    }

    /// Third-party actions referenced by the steps, in order of appearance.
    pub fn actions(&self) -> Vec<Action> {
        let mut seen = HashSet::new();
        self.doc
            .steps()
            .filter_map(step_uses)
            .filter_map(Action::parse)
            .filter(|action| seen.insert(action.clone()))
            .collect()
    }

    /// Keeps only the job named `name`.
    pub fn retain_job(&mut self, name: &str) {
        if let Some(jobs) = self.doc.jobs_mut() {
            *jobs = std::mem::take(jobs)
                .into_iter()
                .filter(|(key, _)| key.as_str() == Some(name))
                .collect::<Mapping>();
        }
    }

    /// Writes the document to [`path`](Self::path).
    pub fn save(&self) -> WorkflowResult<()> {
        if self.path == self.source {
            return Err(WorkflowError::WouldOverwrite(self.path.clone()));
        }
        debug!("Saving workflow to {}", self.path.display());
        self.doc.save(&self.path)
    }
}

fn job_needs(job: &Value) -> Vec<String> {
    match job.get("needs") {
        Some(Value::String(need)) => vec![need.clone()],
        Some(Value::Sequence(needs)) => needs
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::maven::MavenTool;
    use tempfile::TempDir;

    const WORKFLOW: &str = r#"
name: Java CI
on:
  pull_request:
    branches: [main]
jobs:
  setup:
    runs-on: windows-latest
    steps:
      - run: echo setup
  test:
    needs: setup
    runs-on: ${{ matrix.os }}
    strategy:
      fail-fast: true
      matrix:
        os: [windows-latest, macos-latest]
        java: [17, 21]
    steps:
      - uses: actions/checkout@v4
      - uses: actions/setup-java@v4
        with:
          distribution: temurin
          java-version: ${{ matrix.java }}
          cache: maven
      - uses: actions/cache@v4
        with:
          path: ~/.m2
      - name: Test
        run: mvn -B verify
  docs:
    runs-on: ubuntu-latest
    steps:
      - uses: peaceiris/actions-gh-pages@v3
      - run: mvn site
"#;

    fn maven_workflow(content: &str) -> Workflow {
        Workflow::new(
            "/repo/.github/workflows/ci.yml",
            "/repo",
            WorkflowDocument::parse(content).unwrap(),
            Box::new(MavenTool::new()),
        )
    }

    #[test]
    fn test_suffixed_path() {
        assert_eq!(
            suffixed_path(Path::new("/repo/.github/workflows/ci.yml"), "replay"),
            PathBuf::from("/repo/.github/workflows/ci-replay.yml")
        );
        assert_eq!(
            suffixed_path(Path::new("build.yaml"), "unit-tests"),
            PathBuf::from("build-unit-tests.yaml")
        );
    }

    #[test]
    fn test_has_tests_and_matrix_checks() {
        let workflow = maven_workflow(WORKFLOW);
        assert!(workflow.has_tests());
        assert!(!workflow.has_matrix_include_exclude());

        let workflow = maven_workflow(
            "jobs:\n  t:\n    strategy:\n      matrix:\n        include: [{java: 8}]\n    steps:\n      - run: mvn test\n",
        );
        assert!(workflow.has_matrix_include_exclude());

        let workflow = maven_workflow("jobs:\n  t:\n    steps:\n      - run: echo hi\n");
        assert!(!workflow.has_tests());
    }

    #[test]
    fn test_base_passes() {
        let mut workflow = maven_workflow(WORKFLOW);
        workflow.instrument_os();
        workflow.instrument_on_events();
        workflow.instrument_strategy();
        workflow.instrument_jobs();
        workflow.instrument_cache_steps();
        workflow.instrument_setup_steps();

        let root = workflow.document().root();
        assert_eq!(root["on"].as_str(), Some("push"));

        let jobs = workflow.document().jobs().unwrap();
        let names: Vec<_> = jobs.keys().filter_map(Value::as_str).collect();
        assert_eq!(names, vec!["setup", "test"]);

        let test = &root["jobs"]["test"];
        assert_eq!(test["runs-on"].as_str(), Some("ubuntu-latest"));
        assert_eq!(root["jobs"]["setup"]["runs-on"].as_str(), Some("ubuntu-latest"));
        assert_eq!(test["strategy"]["fail-fast"].as_bool(), Some(false));
        assert_eq!(
            test["strategy"]["matrix"]["os"].as_sequence().unwrap(),
            &vec![Value::from("ubuntu-latest")]
        );
        assert_eq!(test["strategy"]["matrix"]["java"].as_sequence().unwrap().len(), 1);

        let steps = test["steps"].as_sequence().unwrap();
        assert_eq!(steps.len(), 3);
        assert!(steps[1]["with"].get("cache").is_none());
        assert_eq!(steps[1]["with"]["distribution"].as_str(), Some("temurin"));
    }

    #[test]
    fn test_instrument_jobs_follows_transitive_needs() {
        let mut workflow = maven_workflow(
            r#"
jobs:
  a:
    steps: [{run: echo a}]
  b:
    needs: a
    steps: [{run: echo b}]
  c:
    needs: [b]
    steps: [{run: mvn test}]
  d:
    steps: [{run: echo d}]
"#,
        );
        workflow.instrument_jobs();
        let names: Vec<_> = workflow
            .document()
            .jobs()
            .unwrap()
            .keys()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_actions() {
        let workflow = maven_workflow(WORKFLOW);
        let declarations: Vec<_> = workflow
            .actions()
            .into_iter()
            .map(|a| a.declaration)
            .collect();
        assert_eq!(
            declarations,
            vec![
                "actions/checkout@v4",
                "actions/setup-java@v4",
                "actions/cache@v4",
                "peaceiris/actions-gh-pages@v3"
            ]
        );
    }

    #[test]
    fn test_name_falls_back_to_file_stem() {
        let workflow = maven_workflow("jobs: {}\n");
        assert_eq!(workflow.name(), "ci");
        assert_eq!(maven_workflow(WORKFLOW).name(), "Java CI");
    }

    #[test]
    fn test_save_never_overwrites_source() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join(".github/workflows/ci.yml");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, WORKFLOW).unwrap();

        let mut workflow = Workflow::new(
            &source,
            temp_dir.path(),
            WorkflowDocument::load(&source).unwrap(),
            Box::new(MavenTool::new()),
        );
        workflow.instrument(true).unwrap();
        assert!(matches!(
            workflow.save(),
            Err(WorkflowError::WouldOverwrite(_))
        ));

        workflow.set_path(suffixed_path(&source, "replay"));
        workflow.save().unwrap();
        assert_eq!(std::fs::read_to_string(&source).unwrap(), WORKFLOW);

        let saved = WorkflowDocument::load(workflow.path()).unwrap();
        assert_eq!(&saved, workflow.document());
        assert!(
            saved
                .run_commands()
                .any(|c| c == "mvn -B verify --offline")
        );
    }
}
