//! Cache-coalescing thumbnail service.
//!
//! Given a source locator and a [`Transformation`], the service decides
//! whether to serve a cached artifact, compute it, or wait for a peer (in
//! this process or another one) that is already computing it.
//!
//! # Flow
//!
//! ```text
//! download ─→ fingerprint ─→ store.get ──hit──→ return
//!                               │ miss
//!                               ▼
//!              ┌──── attempt 1..=max_attempts ────┐
//!              │ lock(key)                        │
//!              │   ok  → re-check store, compute, │
//!              │         store.set, extend lease  │
//!              │   err → poll store N times       │
//!              └──────────────────────────────────┘
//!                               │ still nothing
//!                               ▼
//!                      compute without lock
//! ```
//!
//! ## Guarantees
//!
//! - With a working [`Locker`], a fingerprint is computed once: the lock
//!   holder computes, everyone else finds the artifact via the fast path or
//!   by polling.
//! - A successful holder **extends** its lease instead of releasing it. Peers
//!   that missed the cache just before the artifact was stored would
//!   otherwise acquire the free lock and recompute. The extension must
//!   outlast the gap between a peer's cache miss and its lock attempt.
//! - A failed holder releases immediately so a peer can retry. A panicking
//!   holder releases during unwinding (see [`guard`]).
//! - When the lock stays unavailable beyond `max_attempts`, the request
//!   computes anyway. Duplicate work is preferred over unavailability.
//! - A failed store write does not fail the request: the computed bytes are
//!   valid, only caching them failed. The failure is logged.

pub mod guard;
pub mod latency;

use crate::error::ThumbnailError;
use guard::LockGuard;
pub use latency::LatencyEstimate;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Fetches raw source bytes.
pub trait Downloader: Send + Sync {
    /// Fails with `ResourceUnreachable` or `UnsupportedContentType`.
    fn download(&self, locator: &str) -> Result<Vec<u8>, ThumbnailError>;
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid store key: {0}")]
    InvalidKey(String),
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Shared blob store for computed artifacts.
pub trait Store: Send + Sync {
    /// `None` (or an empty value) means "not present"; lookups never fail.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    fn set(&self, key: &str, data: &[u8]) -> Result<(), StoreError>;
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock {0} is held by another owner")]
    Held(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Lock backend error: {0}")]
    Backend(String),
}

/// A named, leased exclusion token.
pub trait Lock: Send {
    /// Try to acquire. Fails fast (bounded retries) rather than blocking.
    fn lock(&mut self) -> Result<(), LockError>;

    /// Release. `false` if this lock no longer held the lease.
    fn unlock(&mut self) -> bool;

    /// Push the lease expiry forward. `false` if this lock no longer held the lease.
    fn extend(&mut self) -> bool;
}

/// Issues locks keyed by name. Locks with the same name exclude each other
/// across every process sharing the backend.
pub trait Locker: Send + Sync {
    fn new_lock(&self, name: &str) -> Box<dyn Lock>;
}

/// A deterministic byte-to-byte transformation with a cache key.
pub trait Transformation: Send + Sync {
    /// Cache key for `data` under this transformation. Pure.
    fn fingerprint(&self, data: &[u8]) -> String;

    fn perform(&self, data: &[u8]) -> Result<Vec<u8>, ThumbnailError>;
}

/// Timing knobs for the acquire/poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalescingSettings {
    /// Store re-checks per failed lock attempt.
    pub poll_tries: u32,
    /// Lock attempts before computing without the lock.
    pub max_attempts: u32,
    /// Poll sleep when there is no latency history yet.
    pub default_poll_interval: Duration,
    /// How far back the latency estimate looks.
    pub latency_window: Duration,
}

impl Default for CoalescingSettings {
    fn default() -> Self {
        Self {
            poll_tries: 3,
            max_attempts: 2,
            default_poll_interval: Duration::from_millis(200),
            latency_window: Duration::from_secs(60),
        }
    }
}

/// How a request's artifact was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Found on the fast path.
    Cached,
    /// Found after acquiring the lock; a peer finished first.
    CachedAfterLock,
    /// Found while polling for a peer holding the lock.
    Polled,
    /// Computed under the lock.
    Computed,
    /// Computed without the lock after every attempt failed.
    ComputedUnlocked,
}

impl Outcome {
    pub fn is_computed(self) -> bool {
        matches!(self, Outcome::Computed | Outcome::ComputedUnlocked)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::Cached => "cached",
            Outcome::CachedAfterLock => "cached (after lock)",
            Outcome::Polled => "cached (polled)",
            Outcome::Computed => "computed",
            Outcome::ComputedUnlocked => "computed (unlocked)",
        };
        f.write_str(label)
    }
}

/// A served artifact plus how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub bytes: Vec<u8>,
    pub fingerprint: String,
    pub outcome: Outcome,
}

pub struct Service {
    downloader: Arc<dyn Downloader>,
    store: Arc<dyn Store>,
    locker: Arc<dyn Locker>,
    latency: LatencyEstimate,
    settings: CoalescingSettings,
}

impl Service {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        store: Arc<dyn Store>,
        locker: Arc<dyn Locker>,
        settings: CoalescingSettings,
    ) -> Self {
        Self {
            downloader,
            store,
            locker,
            latency: LatencyEstimate::new(settings.latency_window),
            settings,
        }
    }

    pub fn settings(&self) -> &CoalescingSettings {
        &self.settings
    }

    pub fn latency(&self) -> &LatencyEstimate {
        &self.latency
    }

    /// Serve `transformation` of the content at `locator`.
    pub fn perform(
        &self,
        locator: &str,
        transformation: &dyn Transformation,
    ) -> Result<Vec<u8>, ThumbnailError> {
        self.perform_detailed(locator, transformation)
            .map(|thumb| thumb.bytes)
    }

    /// Like [`perform`](Self::perform), also reporting the key and how the bytes were obtained.
    pub fn perform_detailed(
        &self,
        locator: &str,
        transformation: &dyn Transformation,
    ) -> Result<Thumbnail, ThumbnailError> {
        let data = self.downloader.download(locator)?;
        let key = transformation.fingerprint(&data);

        if let Some(stored) = self.cached(&key) {
            tracing::debug!(key, "cache hit");
            return Ok(Thumbnail {
                bytes: stored,
                fingerprint: key,
                outcome: Outcome::Cached,
            });
        }

        tracing::debug!(key, "cache miss");
        let (bytes, outcome) = self.synchronized_perform(&key, &data, transformation)?;
        Ok(Thumbnail {
            bytes,
            fingerprint: key,
            outcome,
        })
    }

    fn synchronized_perform(
        &self,
        key: &str,
        data: &[u8],
        transformation: &dyn Transformation,
    ) -> Result<(Vec<u8>, Outcome), ThumbnailError> {
        for attempt in 1..=self.settings.max_attempts {
            let mut lock = self.locker.new_lock(key);

            match lock.lock() {
                Ok(()) => {
                    tracing::debug!(key, attempt, "lock acquired");
                    let guard = LockGuard::new(key, lock);

                    if let Some(stored) = self.cached(key) {
                        guard.release();
                        return Ok((stored, Outcome::CachedAfterLock));
                    }

                    return match self.instrumented_perform(key, data, transformation) {
                        Ok(bytes) => {
                            guard.extend();
                            Ok((bytes, Outcome::Computed))
                        }
                        Err(e) => {
                            guard.release();
                            Err(e)
                        }
                    };
                }
                Err(e) => {
                    tracing::debug!(key, attempt, error = %e, "lock unavailable, polling store");
                    if let Some(stored) = self.poll_stored_value(key) {
                        return Ok((stored, Outcome::Polled));
                    }
                }
            }
        }

        tracing::info!(
            key,
            attempts = self.settings.max_attempts,
            "lock unavailable after all attempts, computing without it"
        );
        let bytes = self.instrumented_perform(key, data, transformation)?;
        Ok((bytes, Outcome::ComputedUnlocked))
    }

    /// Transform and store, feeding the latency estimate on success.
    fn instrumented_perform(
        &self,
        key: &str,
        data: &[u8],
        transformation: &dyn Transformation,
    ) -> Result<Vec<u8>, ThumbnailError> {
        let start = Instant::now();
        let bytes = transformation.perform(data)?;

        if let Err(e) = self.store.set(key, &bytes) {
            tracing::warn!(key, error = %e, "failed to store computed artifact");
        }

        let elapsed = start.elapsed();
        self.latency.record(elapsed);
        tracing::debug!(key, elapsed_ms = elapsed.as_millis() as u64, "computed");
        Ok(bytes)
    }

    fn poll_stored_value(&self, key: &str) -> Option<Vec<u8>> {
        for _ in 0..self.settings.poll_tries {
            std::thread::sleep(self.latency.poll_interval(self.settings.default_poll_interval));

            if let Some(stored) = self.cached(key) {
                tracing::debug!(key, "artifact appeared while polling");
                return Some(stored);
            }
        }
        None
    }

    fn cached(&self, key: &str) -> Option<Vec<u8>> {
        self.store.get(key).filter(|v| !v.is_empty())
    }
}
