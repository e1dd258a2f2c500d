//! Configuration schema definitions for replayci.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── EngineConfig        - Offline mode, timeouts, concurrency, cache pool
//! ├── ActConfig           - act binary, runner image, container limits
//! ├── CredentialsConfig   - GitHub tokens and their rate limit
//! └── ReportConfig        - Where repository reports are written
//! ```
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure for replayci.
///
/// # TOML Structure
///
/// ```toml
/// [engine]
/// offline = true
/// timeout_minutes = 10
/// concurrency = 4
///
/// [act]
/// runner_image = "replayci:latest"
/// memory_limit = "7g"
///
/// [credentials]
/// tokens = ["ghp_..."]
///
/// [report]
/// output_dir = "replay-reports"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub act: ActConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Expands `~` and environment variables in configured paths.
    pub fn expand_paths(&mut self) {
        self.engine.cache_root = expand_path(&self.engine.cache_root);
        self.report.output_dir = expand_path(&self.report.output_dir);
    }
}

fn expand_path(path: &std::path::Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(_) => path.to_path_buf(),
    }
}

/// How a finished run is classified as failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureStrategyKind {
    /// Test errors, timeouts and non-zero exits, except memory kills.
    #[default]
    Tests,
    /// Any non-zero exit code.
    ExitCode,
}

/// Execution engine settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `offline` | false |
/// | `timeout_minutes` | 10 |
/// | `concurrency` | 1 |
/// | `repo_concurrency` | 1 |
/// | `pool_size` | `concurrency * repo_concurrency` |
/// | `cache_root` | `<tmp>/act-cache` |
/// | `failure_strategy` | `"tests"` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Run job containers without network access.
    #[serde(default)]
    pub offline: bool,

    /// Deadline for one workflow run, enforced by `timeout`.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,

    /// Workflows of one repository run at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Repositories replayed at the same time by `run`.
    #[serde(default = "default_concurrency")]
    pub repo_concurrency: usize,

    /// Number of pooled act cache directories.
    #[serde(default)]
    pub pool_size: Option<usize>,

    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    #[serde(default)]
    pub failure_strategy: FailureStrategyKind,
}

impl EngineConfig {
    /// Configured pool size, or one directory per concurrent run across
    /// all repositories.
    pub fn pool_size(&self) -> usize {
        self.pool_size
            .unwrap_or(self.concurrency.max(1) * self.repo_concurrency.max(1))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            offline: false,
            timeout_minutes: default_timeout_minutes(),
            concurrency: default_concurrency(),
            repo_concurrency: default_concurrency(),
            pool_size: None,
            cache_root: default_cache_root(),
            failure_strategy: FailureStrategyKind::default(),
        }
    }
}

fn default_timeout_minutes() -> u64 {
    10
}

fn default_concurrency() -> usize {
    1
}

fn default_cache_root() -> PathBuf {
    std::env::temp_dir().join("act-cache")
}

/// act invocation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActConfig {
    /// Command used to invoke act.
    #[serde(default = "default_act_path")]
    pub path: String,

    /// Image the `platform` label is mapped to. Must exist locally.
    #[serde(default = "default_runner_image")]
    pub runner_image: String,

    #[serde(default = "default_platform")]
    pub platform: String,

    /// Docker memory limit of job containers.
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,

    /// Keep containers between runs (`--reuse`).
    #[serde(default)]
    pub reuse_containers: bool,
}

impl Default for ActConfig {
    fn default() -> Self {
        Self {
            path: default_act_path(),
            runner_image: default_runner_image(),
            platform: default_platform(),
            memory_limit: default_memory_limit(),
            reuse_containers: false,
        }
    }
}

fn default_act_path() -> String {
    "act".to_string()
}

fn default_runner_image() -> String {
    "replayci:latest".to_string()
}

fn default_platform() -> String {
    "ubuntu-latest".to_string()
}

fn default_memory_limit() -> String {
    "7g".to_string()
}

/// GitHub tokens passed to act as `GITHUB_TOKEN`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub tokens: Vec<String>,

    /// Request budget of each token.
    #[serde(default = "default_requests_per_hour")]
    pub requests_per_hour: u32,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            requests_per_hour: default_requests_per_hour(),
        }
    }
}

fn default_requests_per_hour() -> u32 {
    5000
}

/// Output of the `run` command.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Directory receiving one `<repository>.json` per repository.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("replay-reports")
}
