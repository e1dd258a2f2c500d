//! Cache directories for concurrent act runs.
//!
//! act keeps downloaded actions below `$XDG_CACHE_HOME/act`. Two runs
//! sharing that directory race on checkouts, so every run leases its own
//! directory from a [`CacheDirPool`]:
//!
//! ```text
//! <root>/
//!   default/act/<org>-<repo>@<ref>/     downloaded once
//!   <uuid>/act/<org>-<repo>@<ref> -> ../../default/act/<org>-<repo>@<ref>
//!   <uuid>/act/...
//! ```
//!
//! Pooled directories are created up front. When every pooled directory is
//! leased, an untracked directory is created for the run and deleted when it
//! is released. A pool of size zero hands out `default` to everyone.
//!
//! # Example
//!
//! ```no_run
//! use replayci::cache::CacheDirPool;
//!
//! # fn main() -> replayci::cache::CacheResult<()> {
//! let pool = CacheDirPool::init("/tmp/act-cache", 4)?;
//! {
//!     let lease = pool.lease()?;
//!     println!("XDG_CACHE_HOME={}", lease.path().display());
//! } // released here
//! assert_eq!(pool.free_count(), 4);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Download failed: {0}")]
    DownloadFailed(String),
}

/// Something act would otherwise download on every run.
#[async_trait]
pub trait Dependency: Send + Sync {
    /// Directory name inside act's cache.
    fn cache_key(&self) -> String;

    /// Fetches the dependency into `dest`, which does not exist yet.
    async fn download(&self, dest: &Path) -> CacheResult<()>;
}

#[derive(Debug)]
struct PooledDir {
    path: PathBuf,
    leased: bool,
}

#[derive(Debug, Default)]
struct PoolState {
    dirs: Vec<PooledDir>,
    warned_empty: bool,
    /// Dependency keys downloaded or being downloaded.
    claimed: HashSet<String>,
}

/// A fixed set of cache directories leased to one run at a time.
#[derive(Debug)]
pub struct CacheDirPool {
    root: PathBuf,
    default_dir: PathBuf,
    state: Mutex<PoolState>,
}

impl CacheDirPool {
    /// Creates `size` pooled directories and the default directory below
    /// `root`.
    pub fn init(root: impl Into<PathBuf>, size: usize) -> CacheResult<Self> {
        let root = root.into();
        let default_dir = root.join("default");
        fs::create_dir_all(default_dir.join("act"))?;

        let mut dirs = Vec::with_capacity(size);
        for _ in 0..size {
            let path = root.join(Uuid::new_v4().to_string());
            fs::create_dir_all(path.join("act"))?;
            dirs.push(PooledDir {
                path,
                leased: false,
            });
        }
        info!(
            "Initialized {} cache directories in {}",
            size,
            root.display()
        );

        Ok(Self {
            root,
            default_dir,
            state: Mutex::new(PoolState {
                dirs,
                ..PoolState::default()
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shared directory used when the pool is empty.
    pub fn default_dir(&self) -> &Path {
        &self.default_dir
    }

    pub fn size(&self) -> usize {
        self.state().dirs.len()
    }

    pub fn free_count(&self) -> usize {
        self.state().dirs.iter().filter(|d| !d.leased).count()
    }

    pub fn leased_count(&self) -> usize {
        self.state().dirs.iter().filter(|d| d.leased).count()
    }

    /// Leases a cache directory. Prefer [`lease`](Self::lease).
    pub fn acquire(&self) -> CacheResult<PathBuf> {
        {
            let mut state = self.state();
            if state.dirs.is_empty() {
                if !state.warned_empty {
                    state.warned_empty = true;
                    warn!(
                        "Cache pool is empty, concurrent runs share {}",
                        self.default_dir.display()
                    );
                }
                return Ok(self.default_dir.clone());
            }

            if let Some(dir) = state.dirs.iter_mut().find(|d| !d.leased) {
                dir.leased = true;
                debug!("Leased cache directory {}", dir.path.display());
                return Ok(dir.path.clone());
            }
        }

        let path = self.root.join(Uuid::new_v4().to_string());
        fs::create_dir_all(path.join("act"))?;
        warn!(
            "Cache pool exhausted, using temporary directory {}",
            path.display()
        );
        Ok(path)
    }

    /// Returns a directory obtained from [`acquire`](Self::acquire).
    ///
    /// Temporary directories are deleted; the default directory is kept.
    pub fn release(&self, path: &Path) {
        {
            let mut state = self.state();
            if let Some(dir) = state.dirs.iter_mut().find(|d| d.path == path) {
                dir.leased = false;
                debug!("Released cache directory {}", path.display());
                return;
            }
        }

        if path == self.default_dir || !path.starts_with(&self.root) {
            return;
        }
        if let Err(e) = fs::remove_dir_all(path) {
            warn!(
                "Failed to remove temporary cache directory {}: {}",
                path.display(),
                e
            );
        }
    }

    /// Leases a directory that is released when the lease is dropped.
    pub fn lease(&self) -> CacheResult<CacheLease<'_>> {
        let path = self.acquire()?;
        Ok(CacheLease { pool: self, path })
    }

    /// Downloads `dependency` once and links it into every pooled directory.
    ///
    /// Concurrent callers for the same key return immediately while the
    /// first one downloads. A failed download can be retried.
    pub async fn cache_dependency(&self, dependency: &dyn Dependency) -> CacheResult<()> {
        let key = dependency.cache_key();
        if !self.state().claimed.insert(key.clone()) {
            debug!("Dependency {} already cached", key);
            return Ok(());
        }

        let target = self.default_dir.join("act").join(&key);
        if !target.exists() {
            info!("Downloading {} into {}", key, target.display());
            if let Err(e) = dependency.download(&target).await {
                self.state().claimed.remove(&key);
                return Err(e);
            }
        }

        let pooled: Vec<PathBuf> = self.state().dirs.iter().map(|d| d.path.clone()).collect();
        for dir in pooled {
            let link = dir.join("act").join(&key);
            if fs::symlink_metadata(&link).is_ok() {
                continue;
            }
            link_dir(&target, &link)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn link_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn link_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

/// A leased cache directory, released on drop.
#[derive(Debug)]
pub struct CacheLease<'a> {
    pool: &'a CacheDirPool,
    path: PathBuf,
}

impl CacheLease<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLease<'_> {
    fn drop(&mut self) {
        self.pool.release(&self.path);
    }
}
