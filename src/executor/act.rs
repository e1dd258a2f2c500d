//! The act command line and its execution.
//!
//! Every run is one shell command:
//!
//! ```text
//! ACT_DISABLE_VERSION_CHECK=1 XDG_CACHE_HOME=<cache> timeout <secs> act \
//!     -P ubuntu-latest=<image> --pull=false --no-cache-server --bind --rm \
//!     --container-options '-u <uid>:<gid> --network none --memory=7g' \
//!     -s GITHUB_TOKEN=<token> -W <workflow>
//! ```
//!
//! executed in the repository checkout. The external `timeout` enforces the
//! deadline and exits with 124 when it expires.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::SplitStream;
use tracing::{debug, info, warn};

use super::{
    ExecError, ExecResult, ExecutionResult, ExitCodeFailureStrategy, FailureStrategy,
    TestsFailureStrategy, WorkflowInfo,
};
use crate::config::{Config, FailureStrategyKind};
use crate::credentials::CredentialSource;
use crate::workflow::Workflow;

/// A line of act output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Runs workflows with act.
#[derive(Debug, Clone)]
pub struct Act {
    program: String,
    runner_image: String,
    platform: String,
    memory_limit: String,
    reuse_containers: bool,
    offline: bool,
    timeout: Duration,
    strategy: Arc<dyn FailureStrategy>,
}

impl Act {
    pub fn new(runner_image: impl Into<String>) -> Self {
        Self {
            program: "act".to_string(),
            runner_image: runner_image.into(),
            platform: "ubuntu-latest".to_string(),
            memory_limit: "7g".to_string(),
            reuse_containers: false,
            offline: false,
            timeout: Duration::from_secs(10 * 60),
            strategy: Arc::new(TestsFailureStrategy),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let strategy: Arc<dyn FailureStrategy> = match config.engine.failure_strategy {
            FailureStrategyKind::Tests => Arc::new(TestsFailureStrategy),
            FailureStrategyKind::ExitCode => Arc::new(ExitCodeFailureStrategy),
        };
        Self {
            program: config.act.path.clone(),
            runner_image: config.act.runner_image.clone(),
            platform: config.act.platform.clone(),
            memory_limit: config.act.memory_limit.clone(),
            reuse_containers: config.act.reuse_containers,
            offline: config.engine.offline,
            timeout: Duration::from_secs(config.engine.timeout_minutes * 60),
            strategy,
        }
    }

    /// Command used to invoke act, e.g. `act` or `gh act`.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn memory_limit(mut self, limit: impl Into<String>) -> Self {
        self.memory_limit = limit.into();
        self
    }

    /// Keeps containers between runs (`--reuse`) instead of `--rm`.
    pub fn reuse_containers(mut self, reuse: bool) -> Self {
        self.reuse_containers = reuse;
        self
    }

    /// Disables networking inside the job containers.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn strategy(mut self, strategy: impl FailureStrategy + 'static) -> Self {
        self.strategy = Arc::new(strategy);
        self
    }

    pub fn runner_image(&self) -> &str {
        &self.runner_image
    }

    /// Checks that `act --help` succeeds.
    pub async fn check_installed(&self) -> ExecResult<()> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(format!("{} --help", self.program))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| ExecError::ActNotInstalled(format!("{}: {}", self.program, e)))?;

        if !output.success() {
            return Err(ExecError::ActNotInstalled(self.program.clone()));
        }
        Ok(())
    }

    fn container_options(&self, owner: Option<(u32, u32)>) -> String {
        let mut options = Vec::new();
        if let Some((uid, gid)) = owner {
            options.push(format!("-u {}:{}", uid, gid));
        }
        if self.offline {
            options.push("--network none".to_string());
        }
        options.push(format!("--memory={}", self.memory_limit));
        options.join(" ")
    }

    /// Builds the shell command line for one run.
    pub fn command_line(
        &self,
        workflow_path: &Path,
        cache_dir: &Path,
        owner: Option<(u32, u32)>,
        token: Option<&str>,
    ) -> String {
        let quote = |s: &str| shell_words::quote(s).into_owned();

        let mut parts = vec![
            "ACT_DISABLE_VERSION_CHECK=1".to_string(),
            format!("XDG_CACHE_HOME={}", quote(&cache_dir.to_string_lossy())),
            "timeout".to_string(),
            self.timeout.as_secs().to_string(),
            self.program.clone(),
            "-P".to_string(),
            quote(&format!("{}={}", self.platform, self.runner_image)),
            "--pull=false".to_string(),
            "--no-cache-server".to_string(),
            "--bind".to_string(),
        ];
        parts.push(if self.reuse_containers { "--reuse" } else { "--rm" }.to_string());
        parts.push("--container-options".to_string());
        parts.push(quote(&self.container_options(owner)));
        if let Some(token) = token {
            parts.push("-s".to_string());
            parts.push(quote(&format!("GITHUB_TOKEN={}", token)));
        }
        parts.push("-W".to_string());
        parts.push(quote(&workflow_path.to_string_lossy()));
        parts.join(" ")
    }

    /// Runs `workflow` with act and classifies the outcome.
    ///
    /// The workflow is re-saved under a randomized name first, so that
    /// concurrent runs of the same workflow get distinct container names.
    pub async fn run(
        &self,
        workflow: &Workflow,
        cache_dir: &Path,
        credentials: &dyn CredentialSource,
    ) -> ExecResult<ExecutionResult> {
        let mut workflow = workflow.clone();
        let tag: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let name = format!("{} {}", workflow.name(), tag);
        workflow.document_mut().set_name(name.clone());
        workflow.save()?;

        remove_stale_reports(&workflow).await?;

        let credential = credentials.checkout();
        let command = self.command_line(
            workflow.path(),
            cache_dir,
            owner(workflow.repo_root()),
            credential.as_ref().map(|c| c.token.as_str()),
        );
        info!("Running workflow {}", workflow.path().display());
        debug!(
            "Command: {}",
            match &credential {
                Some(c) => command.replace(&c.token, "***"),
                None => command.clone(),
            }
        );

        let start = Instant::now();
        let (return_code, stdout, stderr) = exec_streaming(&command, workflow.repo_root()).await?;
        let elapsed = start.elapsed();

        let mut result = ExecutionResult {
            failed: false,
            tests: workflow.test_results(),
            stdout,
            stderr,
            workflow: WorkflowInfo::from_workflow(&workflow),
            workflow_name: name,
            build_tool: workflow.build_tool(),
            elapsed,
            default_actions: false,
            return_code,
        };
        result.failed = self.strategy.failed(&result);
        if result.failed {
            warn!(
                "Workflow {} failed with return code {}",
                workflow.path().display(),
                return_code
            );
        }

        if let Some(credential) = &credential {
            credentials.refresh(credential);
        }
        Ok(result)
    }
}

/// Owner of the checkout; job containers run as this user.
#[cfg(unix)]
fn owner(repo_root: &Path) -> Option<(u32, u32)> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(repo_root)
        .ok()
        .map(|meta| (meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
fn owner(_repo_root: &Path) -> Option<(u32, u32)> {
    None
}

async fn remove_stale_reports(workflow: &Workflow) -> ExecResult<()> {
    if workflow.tool().report_location().is_empty() {
        return Ok(());
    }

    let report = workflow.report_path();
    let removed = match tokio::fs::metadata(&report).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&report).await,
        Ok(_) => tokio::fs::remove_file(&report).await,
        Err(_) => return Ok(()),
    };
    removed?;
    debug!("Removed stale report {}", report.display());
    Ok(())
}

/// Decodes one line of output; bytes that are not UTF-8 are replaced, not
/// dropped.
fn decode_line(line: std::io::Result<Vec<u8>>) -> String {
    match line {
        Ok(mut bytes) => {
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
            String::from_utf8_lossy(&bytes).into_owned()
        }
        Err(e) => {
            warn!("Failed to read act output: {}", e);
            String::new()
        }
    }
}

/// Runs `command` through `sh -c`, echoing and buffering its output.
async fn exec_streaming(command: &str, working_dir: &Path) -> ExecResult<(i32, String, String)> {
    let mut child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ExecError::ExecFailed(e.to_string()))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecError::ExecFailed("stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ExecError::ExecFailed("stderr not captured".to_string()))?;

    let stdout_stream = SplitStream::new(BufReader::new(stdout).split(b'\n'))
        .map(|line| OutputLine::Stdout(decode_line(line)));
    let stderr_stream = SplitStream::new(BufReader::new(stderr).split(b'\n'))
        .map(|line| OutputLine::Stderr(decode_line(line)));
    let mut combined = stream::select(stdout_stream, stderr_stream);

    let mut out = Vec::new();
    let mut err = Vec::new();
    while let Some(line) = combined.next().await {
        match line {
            OutputLine::Stdout(line) => {
                debug!("STDOUT: {}", line);
                out.push(line);
            }
            OutputLine::Stderr(line) => {
                debug!("STDERR: {}", line);
                err.push(line);
            }
        }
    }

    let status = child.wait().await?;
    Ok((status.code().unwrap_or(-1), out.join("\n"), err.join("\n")))
}
