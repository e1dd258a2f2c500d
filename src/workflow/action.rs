//! Third-party action references.
//!
//! Steps reference actions with `uses: org/repo[/path]@ref`. act downloads
//! those repositories into its cache directory on every run, so they are
//! collected here and pre-fetched once through
//! [`CacheDirPool::cache_dependency`](crate::cache::CacheDirPool::cache_dependency).

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::cache::{CacheError, CacheResult, Dependency};

/// A GitHub action referenced by a workflow step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Action {
    pub org: String,
    pub repo: String,
    /// Sub-directory of the repository holding the action, if any.
    pub path: Option<String>,
    pub git_ref: String,
    /// The original `uses` value.
    pub declaration: String,
}

impl Action {
    /// Parses a `uses` value.
    ///
    /// Local (`./`) and container (`docker://`) references, and references
    /// without a ref, are not downloadable actions and yield `None`.
    pub fn parse(uses: &str) -> Option<Self> {
        let declaration = uses.trim();
        if declaration.starts_with("./") || declaration.starts_with("docker://") {
            return None;
        }

        let (location, git_ref) = declaration.split_once('@')?;
        let mut parts = location.splitn(3, '/');
        let org = parts.next().filter(|s| !s.is_empty())?;
        let repo = parts.next().filter(|s| !s.is_empty())?;
        if git_ref.is_empty() {
            return None;
        }

        Some(Self {
            org: org.to_string(),
            repo: repo.to_string(),
            path: parts.next().map(str::to_string),
            git_ref: git_ref.to_string(),
            declaration: declaration.to_string(),
        })
    }

    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.org, self.repo)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.declaration)
    }
}

#[async_trait]
impl Dependency for Action {
    /// act's cache layout: `<org>-<repo>@<ref>`.
    fn cache_key(&self) -> String {
        format!("{}-{}@{}", self.org, self.repo, self.git_ref)
    }

    async fn download(&self, dest: &Path) -> CacheResult<()> {
        if dest.exists() {
            debug!("Action {} already present at {}", self, dest.display());
            return Ok(());
        }

        let url = self.clone_url();
        debug!("Cloning {} into {}", url, dest.display());
        let output = tokio::process::Command::new("git")
            .arg("clone")
            .arg("--quiet")
            .arg(&url)
            .arg(dest)
            .output()
            .await?;
        if !output.status.success() {
            return Err(CacheError::DownloadFailed(format!(
                "git clone {} failed: {}",
                url,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(dest)
            .arg("checkout")
            .arg("--quiet")
            .arg(&self.git_ref)
            .output()
            .await?;
        if !output.status.success() {
            return Err(CacheError::DownloadFailed(format!(
                "git checkout {} failed: {}",
                self.git_ref,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }
}
