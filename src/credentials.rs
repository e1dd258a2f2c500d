//! Rate-limited GitHub tokens for act runs.
//!
//! Workflows that call the GitHub API (including `actions/checkout` of other
//! repositories) need `GITHUB_TOKEN`. Tokens have an hourly request budget;
//! [`TokenPool`] tracks an estimate of each token's remaining budget as a
//! token bucket that refills continuously.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, warn};

/// A token handed out for one run.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential").field("token", &"***").finish()
    }
}

/// Source of tokens for act runs.
pub trait CredentialSource: Send + Sync {
    /// Picks a token for the next run, if any is available.
    fn checkout(&self) -> Option<Credential>;

    /// Updates the rate-limit state of a token after its run finished.
    fn refresh(&self, credential: &Credential);
}

/// A credential source without tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialSource for NoCredentials {
    fn checkout(&self) -> Option<Credential> {
        None
    }

    fn refresh(&self, _credential: &Credential) {}
}

#[derive(Debug)]
struct Bucket {
    token: String,
    remaining: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.refilled_at);
        self.remaining = (self.remaining + elapsed.as_secs_f64() * capacity / 3600.0).min(capacity);
        self.refilled_at = now;
    }
}

/// Token buckets refilled at `requests_per_hour`.
///
/// [`checkout`](CredentialSource::checkout) picks the token with the most
/// remaining requests and charges it one request.
///
/// The budget is a local estimate. GitHub's rate-limit headers are never
/// read, so requests made with a token outside this process, or by the
/// workflow itself beyond its one charged request, are not accounted for.
#[derive(Debug)]
pub struct TokenPool {
    capacity: f64,
    buckets: Mutex<Vec<Bucket>>,
}

impl TokenPool {
    pub fn new(tokens: impl IntoIterator<Item = String>, requests_per_hour: u32) -> Self {
        let capacity = f64::from(requests_per_hour);
        let now = Instant::now();
        let buckets = tokens
            .into_iter()
            .filter(|token| !token.trim().is_empty())
            .map(|token| Bucket {
                token,
                remaining: capacity,
                refilled_at: now,
            })
            .collect();
        Self {
            capacity,
            buckets: Mutex::new(buckets),
        }
    }

    fn buckets(&self) -> MutexGuard<'_, Vec<Bucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.buckets().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets().is_empty()
    }

    /// Estimated remaining requests of `token`.
    pub fn remaining(&self, token: &str) -> Option<f64> {
        self.buckets()
            .iter()
            .find(|b| b.token == token)
            .map(|b| b.remaining)
    }
}

impl CredentialSource for TokenPool {
    fn checkout(&self) -> Option<Credential> {
        let now = Instant::now();
        let mut buckets = self.buckets();
        for bucket in buckets.iter_mut() {
            bucket.refill(now, self.capacity);
        }

        let bucket = buckets
            .iter_mut()
            .max_by(|a, b| a.remaining.total_cmp(&b.remaining))?;
        if bucket.remaining < 1.0 {
            warn!("All GitHub tokens are rate limited, running without a token");
            return None;
        }
        bucket.remaining -= 1.0;
        debug!("Checked out token with {:.0} requests left", bucket.remaining);
        Some(Credential {
            token: bucket.token.clone(),
        })
    }

    /// Refills the token's local estimate for the time elapsed; no API call
    /// is made.
    fn refresh(&self, credential: &Credential) {
        let now = Instant::now();
        let mut buckets = self.buckets();
        if let Some(bucket) = buckets.iter_mut().find(|b| b.token == credential.token) {
            bucket.refill(now, self.capacity);
        }
    }
}
