//! Discovery, instrumentation and execution of a repository's workflows.
//!
//! # Architecture
//!
//! ```text
//!  .github/workflows/*.yml
//!       │
//!       │ WorkflowFactory::create()
//!       ▼
//!  Vec<Workflow> (all) ──── has_tests() && !matrix include/exclude ───┐
//!                                                                     ▼
//!                                                   Vec<Workflow> (test subset)
//!                                                                     │
//!                                      instrument() + <stem>-replay.<ext>
//!                                                                     │
//!                                                     save_workflows()│
//!                                                                     ▼
//!                        CacheDirPool::lease() ──► Act::run() ──► ExecutionResult
//!                                                                     │
//!                                                                     ▼
//!                                                          WorkflowSetReport
//! ```
//!
//! # Example
//!
//! ```no_run
//! use replayci::cache::CacheDirPool;
//! use replayci::credentials::NoCredentials;
//! use replayci::executor::Act;
//! use replayci::orchestrator::WorkflowSet;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut set = WorkflowSet::discover("/path/to/repo", "java", false)?;
//!     set.save_workflows()?;
//!
//!     let act = Act::new("replayci:latest");
//!     let pool = CacheDirPool::init("/tmp/act-cache", 2)?;
//!     let report = set.run(&act, &pool, &NoCredentials, 2).await;
//!     set.delete_workflows()?;
//!
//!     println!("{} runs, {} errors", report.runs.len(), report.errors.len());
//!     Ok(())
//! }
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::cache::CacheDirPool;
use crate::credentials::CredentialSource;
use crate::executor::{Act, ExecResult, ExecutionResult};
use crate::workflow::{Action, Workflow, WorkflowFactory, WorkflowResult, suffixed_path};

/// Suffix of instrumented workflow files.
pub const REPLAY_SUFFIX: &str = "replay";

/// Results of running a repository's test workflows.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowSetReport {
    pub num_workflows: usize,
    pub num_test_workflows: usize,
    pub runs: Vec<ExecutionResult>,
    /// Workflows that could not be run, as `<path>: <error>`.
    pub errors: Vec<String>,
}

impl WorkflowSetReport {
    /// Returns `true` if any run failed or could not be started.
    pub fn failed(&self) -> bool {
        !self.errors.is_empty() || self.runs.iter().any(|r| r.failed)
    }
}

/// The workflows of one repository checkout.
#[derive(Debug, Clone)]
pub struct WorkflowSet {
    repo_root: PathBuf,
    language: String,
    workflows: Vec<Workflow>,
    test_workflows: Vec<Workflow>,
}

impl WorkflowSet {
    /// Loads every workflow below `.github/workflows` and instruments the
    /// ones that run tests.
    ///
    /// Instrumented workflows are saved as `<stem>-replay.<ext>` by
    /// [`save_workflows`](Self::save_workflows); files with that suffix are
    /// not picked up again.
    pub fn discover(
        repo_root: impl Into<PathBuf>,
        language: &str,
        offline: bool,
    ) -> WorkflowResult<Self> {
        let repo_root = repo_root.into();
        let language = language.trim().to_lowercase();
        let mut files = Vec::new();
        collect_workflow_files(&repo_root.join(".github").join("workflows"), &mut files)?;
        files.sort();

        let mut workflows = Vec::new();
        let mut test_workflows = Vec::new();
        for file in files {
            let workflow = WorkflowFactory::create(&file, None, &language, &repo_root);
            workflows.push(workflow.clone());

            if !workflow.has_tests() {
                continue;
            }
            if workflow.has_matrix_include_exclude() {
                info!(
                    "Skipping {}: matrix include/exclude is not supported",
                    file.display()
                );
                continue;
            }

            let mut workflow = workflow;
            if let Err(e) = workflow.instrument(offline) {
                warn!("Skipping {}: {}", file.display(), e);
                continue;
            }
            workflow.set_path(suffixed_path(&file, REPLAY_SUFFIX));
            test_workflows.push(workflow);
        }

        info!(
            "Found {} workflows in {}, {} with tests",
            workflows.len(),
            repo_root.display(),
            test_workflows.len()
        );
        Ok(Self {
            repo_root,
            language,
            workflows,
            test_workflows,
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn workflows(&self) -> &[Workflow] {
        &self.workflows
    }

    pub fn test_workflows(&self) -> &[Workflow] {
        &self.test_workflows
    }

    /// Third-party actions used by the test workflows.
    pub fn actions(&self) -> BTreeSet<Action> {
        self.test_workflows
            .iter()
            .flat_map(Workflow::actions)
            .collect()
    }

    /// Writes every instrumented workflow to its destination.
    pub fn save_workflows(&self) -> WorkflowResult<()> {
        for workflow in &self.test_workflows {
            workflow.save()?;
        }
        Ok(())
    }

    /// Deletes the saved file of `workflow`, if present.
    pub fn delete_workflow(&self, workflow: &Workflow) -> WorkflowResult<()> {
        match fs::remove_file(workflow.path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drops the test workflow saved at `path` and deletes its file.
    pub fn remove_workflow(&mut self, path: &Path) -> WorkflowResult<Option<Workflow>> {
        let Some(index) = self.test_workflows.iter().position(|w| w.path() == path) else {
            return Ok(None);
        };
        let workflow = self.test_workflows.remove(index);
        self.delete_workflow(&workflow)?;
        Ok(Some(workflow))
    }

    /// Deletes the saved files of all test workflows.
    pub fn delete_workflows(&self) -> WorkflowResult<()> {
        for workflow in &self.test_workflows {
            self.delete_workflow(workflow)?;
        }
        Ok(())
    }

    /// Runs every test workflow, at most `concurrency` at a time.
    ///
    /// Workflows writing their reports to the same location run one after
    /// another, since every run clears and then reads that location. Each
    /// run leases its own cache directory. Runs that cannot be started are
    /// logged and recorded in [`WorkflowSetReport::errors`].
    pub async fn run(
        &self,
        act: &Act,
        pool: &CacheDirPool,
        credentials: &dyn CredentialSource,
        concurrency: usize,
    ) -> WorkflowSetReport {
        let groups = report_groups(&self.test_workflows);
        let runs: Vec<_> = groups
            .into_iter()
            .map(|group| async move {
                let mut outcomes = Vec::with_capacity(group.len());
                for workflow in group {
                    let outcome = run_workflow(act, pool, credentials, workflow).await;
                    outcomes.push((workflow.path().to_path_buf(), outcome));
                }
                outcomes
            })
            .collect();
        let outcomes: Vec<(PathBuf, ExecResult<ExecutionResult>)> = stream::iter(runs)
            .buffer_unordered(concurrency.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        let mut report = WorkflowSetReport {
            num_workflows: self.workflows.len(),
            num_test_workflows: self.test_workflows.len(),
            ..WorkflowSetReport::default()
        };
        for (path, outcome) in outcomes {
            match outcome {
                Ok(run) => report.runs.push(run),
                Err(e) => {
                    error!("Failed to run {}: {}", path.display(), e);
                    report.errors.push(format!("{}: {}", path.display(), e));
                }
            }
        }
        report
    }
}

/// Partitions workflows by report location, keeping discovery order.
fn report_groups(workflows: &[Workflow]) -> Vec<Vec<&Workflow>> {
    let mut groups: Vec<(PathBuf, Vec<&Workflow>)> = Vec::new();
    for workflow in workflows {
        let report = workflow.report_path();
        match groups.iter_mut().find(|(path, _)| *path == report) {
            Some((_, group)) => group.push(workflow),
            None => groups.push((report, vec![workflow])),
        }
    }
    groups.into_iter().map(|(_, group)| group).collect()
}

async fn run_workflow(
    act: &Act,
    pool: &CacheDirPool,
    credentials: &dyn CredentialSource,
    workflow: &Workflow,
) -> ExecResult<ExecutionResult> {
    let lease = pool.lease()?;
    act.run(workflow, lease.path(), credentials).await
}

fn collect_workflow_files(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_workflow_files(&path, files)?;
            continue;
        }

        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yml" || ext == "yaml");
        let is_replay = path
            .file_stem()
            .is_some_and(|stem| stem.to_string_lossy().ends_with(&format!("-{}", REPLAY_SUFFIX)));
        if is_yaml && !is_replay {
            files.push(path);
        }
    }
    Ok(())
}

/// Everything recorded about one repository, written even when a step
/// fails part-way.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepositoryReport {
    pub repository: String,
    pub language: String,
    pub discovered: bool,
    pub num_workflows: usize,
    pub num_test_workflows: usize,
    pub actions: Vec<String>,
    pub runs: Vec<ExecutionResult>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RepositoryReport {
    pub fn new(repository: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            language: language.into(),
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn record_discovery(&mut self, set: &WorkflowSet) {
        self.discovered = true;
        self.num_workflows = set.workflows().len();
        self.num_test_workflows = set.test_workflows().len();
        self.actions = set.actions().iter().map(ToString::to_string).collect();
    }

    pub fn record_runs(&mut self, report: &WorkflowSetReport) {
        self.runs = report.runs.clone();
        self.finished_at = Some(Utc::now());
        if !report.errors.is_empty() && self.error.is_none() {
            self.error = Some(report.errors.join("; "));
        }
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
    }
}

/// Shared resources for replaying repositories.
pub struct Replay<'a> {
    pub act: &'a Act,
    pub pool: &'a CacheDirPool,
    pub credentials: &'a dyn CredentialSource,
    pub concurrency: usize,
    pub offline: bool,
}

impl Replay<'_> {
    /// Discovers, saves, runs and cleans up the workflows of one repository.
    ///
    /// Returns the set report (if the runs happened) and the repository
    /// report, which carries the first error encountered.
    pub async fn repository(
        &self,
        repo_root: &Path,
        language: &str,
    ) -> (Option<WorkflowSetReport>, RepositoryReport) {
        let mut report = RepositoryReport::new(repo_root.display().to_string(), language);

        let set = match WorkflowSet::discover(repo_root, language, self.offline) {
            Ok(set) => set,
            Err(e) => {
                error!("Discovery failed in {}: {}", repo_root.display(), e);
                report.error = Some(e.to_string());
                return (None, report);
            }
        };
        report.record_discovery(&set);

        for action in set.actions() {
            if let Err(e) = self.pool.cache_dependency(&action).await {
                warn!("Could not cache action {}: {}", action, e);
            }
        }

        if let Err(e) = set.save_workflows() {
            error!("Failed to save workflows in {}: {}", repo_root.display(), e);
            report.error = Some(e.to_string());
            if let Err(e) = set.delete_workflows() {
                warn!("Failed to clean up workflows: {}", e);
            }
            return (None, report);
        }

        let set_report = set
            .run(self.act, self.pool, self.credentials, self.concurrency)
            .await;
        report.record_runs(&set_report);

        if let Err(e) = set.delete_workflows() {
            warn!("Failed to clean up workflows: {}", e);
        }
        (Some(set_report), report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::NoCredentials;
    use tempfile::TempDir;

    const MAVEN: &str = r#"
name: Maven
on: [push]
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - uses: actions/setup-java@v4
        with:
          java-version: 17
          cache: maven
      - run: mvn -B package -DskipTests
      - run: mvn -B test
"#;

    const DOCS: &str = r#"
name: Docs
on: [push]
jobs:
  docs:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v3
      - run: mvn site
"#;

    const MATRIX: &str = r#"
name: Matrix
on: [push]
jobs:
  test:
    strategy:
      matrix:
        java: [11, 17]
        include:
          - java: 21
    runs-on: ubuntu-latest
    steps:
      - run: mvn test
"#;

    fn write_repo(files: &[(&str, &str)]) -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let workflows = temp_dir.path().join(".github/workflows");
        fs::create_dir_all(&workflows).unwrap();
        for (name, content) in files {
            fs::write(workflows.join(name), content).unwrap();
        }
        temp_dir
    }

    #[test]
    fn test_discover_partitions_workflows() {
        let repo = write_repo(&[
            ("maven.yml", MAVEN),
            ("docs.yaml", DOCS),
            ("matrix.yml", MATRIX),
            ("old-replay.yml", MAVEN),
            ("README.md", "not a workflow"),
        ]);

        let set = WorkflowSet::discover(repo.path(), " Java ", false).unwrap();
        assert_eq!(set.language(), "java");
        assert_eq!(set.workflows().len(), 3);
        assert_eq!(set.test_workflows().len(), 1);

        let workflow = &set.test_workflows()[0];
        assert_eq!(
            workflow.path(),
            repo.path().join(".github/workflows/maven-replay.yml")
        );
        assert!(
            workflow
                .document()
                .run_commands()
                .any(|c| c == "mvn -B test")
        );
        assert!(
            workflow
                .document()
                .run_commands()
                .any(|c| c == "mvn -B package")
        );
    }

    #[test]
    fn test_no_test_workflows() {
        let repo = write_repo(&[("docs.yml", DOCS)]);
        let set = WorkflowSet::discover(repo.path(), "java", true).unwrap();
        assert_eq!(set.workflows().len(), 1);
        assert!(set.test_workflows().is_empty());

        let empty = TempDir::new().unwrap();
        let set = WorkflowSet::discover(empty.path(), "java", true).unwrap();
        assert!(set.workflows().is_empty());
    }

    #[test]
    fn test_save_remove_and_delete() {
        let repo = write_repo(&[("maven.yml", MAVEN), ("second.yml", MAVEN)]);
        let mut set = WorkflowSet::discover(repo.path(), "java", false).unwrap();
        set.save_workflows().unwrap();

        let first = repo.path().join(".github/workflows/maven-replay.yml");
        let second = repo.path().join(".github/workflows/second-replay.yml");
        assert!(first.is_file());
        assert!(second.is_file());

        let removed = set.remove_workflow(&first).unwrap();
        assert!(removed.is_some());
        assert!(!first.exists());
        assert_eq!(set.test_workflows().len(), 1);
        assert!(set.remove_workflow(&first).unwrap().is_none());

        set.delete_workflows().unwrap();
        assert!(!second.exists());
        set.delete_workflows().unwrap();
        assert!(repo.path().join(".github/workflows/maven.yml").is_file());
    }

    #[test]
    fn test_actions_are_deduplicated() {
        let repo = write_repo(&[("maven.yml", MAVEN), ("second.yml", MAVEN)]);
        let set = WorkflowSet::discover(repo.path(), "java", false).unwrap();
        let actions: Vec<String> = set.actions().iter().map(ToString::to_string).collect();
        assert_eq!(actions, vec!["actions/checkout@v4", "actions/setup-java@v4"]);
    }

    #[tokio::test]
    async fn test_run_without_test_workflows() {
        let repo = write_repo(&[("docs.yml", DOCS)]);
        let cache = TempDir::new().unwrap();
        let pool = CacheDirPool::init(cache.path(), 1).unwrap();

        let set = WorkflowSet::discover(repo.path(), "java", false).unwrap();
        let report = set
            .run(&Act::new("img"), &pool, &NoCredentials, 1)
            .await;
        assert_eq!(report.num_workflows, 1);
        assert_eq!(report.num_test_workflows, 0);
        assert!(report.runs.is_empty());
        assert!(!report.failed());
    }

    const PYTEST: &str = r#"
name: Python
on: [push]
jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - run: pytest
"#;

    #[test]
    fn test_report_groups_share_report_location() {
        let repo = write_repo(&[("a.yml", MAVEN), ("b.yml", MAVEN), ("py.yml", PYTEST)]);
        let dir = repo.path().join(".github/workflows");
        let workflows = vec![
            WorkflowFactory::create(&dir.join("a.yml"), None, "java", repo.path()),
            WorkflowFactory::create(&dir.join("py.yml"), None, "python", repo.path()),
            WorkflowFactory::create(&dir.join("b.yml"), None, "java", repo.path()),
        ];

        let groups: Vec<Vec<PathBuf>> = report_groups(&workflows)
            .into_iter()
            .map(|group| group.iter().map(|w| w.path().to_path_buf()).collect())
            .collect();
        assert_eq!(
            groups,
            vec![
                vec![dir.join("a.yml"), dir.join("b.yml")],
                vec![dir.join("py.yml")],
            ]
        );
    }

    /// Writes one surefire report named after the workflow file, then waits
    /// so that concurrent runs overlap.
    const REPORTING_ACT: &str = r#"
for arg in "$@"; do workflow="$arg"; done
name=$(basename "$workflow" .yml)
mkdir -p target/surefire-reports
printf '<testsuite><testcase classname="%s" name="t"/></testsuite>' "$name" > "target/surefire-reports/TEST-$name.xml"
sleep 0.3
exit 0
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concurrent_runs_keep_their_own_reports() {
        let repo = write_repo(&[("a.yml", MAVEN), ("b.yml", MAVEN)]);
        let tools = TempDir::new().unwrap();
        let script = tools.path().join("act.sh");
        fs::write(&script, REPORTING_ACT).unwrap();
        let pool = CacheDirPool::init(tools.path().join("cache"), 2).unwrap();
        let act = Act::new("img").program(format!("sh {}", script.display()));

        let set = WorkflowSet::discover(repo.path(), "java", true).unwrap();
        set.save_workflows().unwrap();
        let report = set.run(&act, &pool, &NoCredentials, 2).await;
        set.delete_workflows().unwrap();

        assert!(report.errors.is_empty());
        assert_eq!(report.runs.len(), 2);
        for run in &report.runs {
            let stem = run
                .workflow
                .path
                .file_stem()
                .unwrap()
                .to_string_lossy()
                .into_owned();
            let classnames: Vec<&str> = run.tests.iter().map(|t| t.classname.as_str()).collect();
            assert_eq!(classnames, vec![stem.as_str()]);
        }
        assert_eq!(pool.free_count(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_replay_repository_with_fake_act() {
        let repo = write_repo(&[("maven.yml", MAVEN), ("docs.yml", DOCS)]);
        let tools = TempDir::new().unwrap();
        let script = tools.path().join("act.sh");
        fs::write(&script, "echo ran \"$@\"\nexit 0\n").unwrap();
        let pool = CacheDirPool::init(tools.path().join("cache"), 2).unwrap();
        let act = Act::new("img").program(format!("sh {}", script.display()));

        let replay = Replay {
            act: &act,
            pool: &pool,
            credentials: &NoCredentials,
            concurrency: 2,
            offline: true,
        };
        // Pre-cache the actions so no download is attempted.
        for key in ["actions-checkout@v4", "actions-setup-java@v4"] {
            fs::create_dir_all(pool.default_dir().join("act").join(key)).unwrap();
        }

        let (set_report, report) = replay.repository(repo.path(), "java").await;
        let set_report = set_report.unwrap();

        assert!(report.discovered);
        assert_eq!(report.num_workflows, 2);
        assert_eq!(report.num_test_workflows, 1);
        assert_eq!(report.runs.len(), 1);
        assert!(report.error.is_none());
        assert!(report.started_at <= report.finished_at);
        assert!(report.finished_at.is_some());
        assert!(!set_report.failed());
        assert_eq!(set_report.runs[0].return_code, 0);
        assert!(set_report.runs[0].tests.is_empty());
        assert_eq!(pool.free_count(), 2);
        assert!(
            !repo
                .path()
                .join(".github/workflows/maven-replay.yml")
                .exists()
        );

        let out = repo.path().join("report.json");
        report.write(&out).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(json["language"], "java");
        assert_eq!(json["actions"][0], "actions/checkout@v4");
        assert_eq!(json["runs"][0]["build_tool"], "maven");
    }

    #[tokio::test]
    async fn test_replay_repository_records_save_error() {
        let repo = write_repo(&[("maven.yml", MAVEN)]);
        // A directory where the instrumented workflow should be written.
        fs::create_dir_all(repo.path().join(".github/workflows/maven-replay.yml/x")).unwrap();
        let cache = TempDir::new().unwrap();
        let pool = CacheDirPool::init(cache.path(), 1).unwrap();
        for key in ["actions-checkout@v4", "actions-setup-java@v4"] {
            fs::create_dir_all(pool.default_dir().join("act").join(key)).unwrap();
        }
        let act = Act::new("img");

        let replay = Replay {
            act: &act,
            pool: &pool,
            credentials: &NoCredentials,
            concurrency: 1,
            offline: false,
        };
        let (set_report, report) = replay.repository(repo.path(), "java").await;

        assert!(set_report.is_none());
        assert!(report.discovered);
        assert_eq!(report.num_test_workflows, 1);
        assert!(report.error.is_some());
        assert!(report.runs.is_empty());
        assert!(report.started_at.is_some());
        assert!(report.finished_at.is_none());
    }
}
