//! Leased locks keyed by fingerprint.
//!
//! Every lock has a **lease**: a holder that crashes blocks its key for at
//! most `lease`, after which a peer may take the lock over. A holder can
//! [`extend`](crate::service::Lock::extend) the lease (by `extension`) and
//! only the current holder can unlock or extend; a stale handle whose lease
//! was taken over gets `false`.
//!
//! | Locker | Exclusion scope |
//! |---|---|
//! | [`MemoryLocker`] | one process (every clone shares one lease table) |
//! | [`FileLocker`] | every process that shares the lock directory |
//!
//! Acquisition never blocks indefinitely: `lock()` makes up to `tries`
//! attempts `retry_delay` apart, then reports [`LockError::Held`].

use crate::service::{Lock, LockError, Locker};
use crate::store::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Lease and retry timing shared by all lockers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Lease granted on acquisition.
    pub lease: Duration,
    /// Lease granted from the moment of an `extend` call.
    pub extension: Duration,
    /// Acquisition attempts per `lock()` call (at least one is always made).
    pub tries: u32,
    /// Pause between acquisition attempts.
    pub retry_delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(5),
            extension: Duration::from_secs(5),
            tries: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// Run `attempt` up to `options.tries` times, sleeping between failures.
fn acquire_with_retries(
    options: &LockOptions,
    mut attempt: impl FnMut() -> Result<(), LockError>,
) -> Result<(), LockError> {
    let tries = options.tries.max(1);
    let mut last = None;
    for n in 0..tries {
        if n > 0 {
            std::thread::sleep(options.retry_delay);
        }
        match attempt() {
            Ok(()) => return Ok(()),
            Err(e) => last = Some(e),
        }
    }
    Err(last.unwrap_or_else(|| LockError::Backend("no acquisition attempt made".into())))
}

fn next_token() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!(
        "{}-{}-{}",
        std::process::id(),
        nanos,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

// ============================================================================
// MemoryLocker
// ============================================================================

#[derive(Debug)]
struct Lease {
    token: String,
    expires_at: Instant,
}

type LeaseTable = Arc<Mutex<HashMap<String, Lease>>>;

/// Process-local lease table with real mutual exclusion.
#[derive(Debug, Clone, Default)]
pub struct MemoryLocker {
    leases: LeaseTable,
    options: LockOptions,
}

impl MemoryLocker {
    pub fn new(options: LockOptions) -> Self {
        Self {
            leases: Arc::default(),
            options,
        }
    }
}

impl Locker for MemoryLocker {
    fn new_lock(&self, name: &str) -> Box<dyn Lock> {
        Box::new(MemoryLock {
            name: name.to_string(),
            token: next_token(),
            leases: Arc::clone(&self.leases),
            options: self.options,
        })
    }
}

struct MemoryLock {
    name: String,
    token: String,
    leases: LeaseTable,
    options: LockOptions,
}

impl MemoryLock {
    fn try_acquire(&self) -> Result<(), LockError> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if let Some(lease) = leases.get(&self.name)
            && lease.expires_at > now
            && lease.token != self.token
        {
            return Err(LockError::Held(self.name.clone()));
        }
        leases.insert(
            self.name.clone(),
            Lease {
                token: self.token.clone(),
                expires_at: now + self.options.lease,
            },
        );
        Ok(())
    }
}

impl Lock for MemoryLock {
    fn lock(&mut self) -> Result<(), LockError> {
        acquire_with_retries(&self.options, || self.try_acquire())
    }

    fn unlock(&mut self) -> bool {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        match leases.get(&self.name) {
            Some(lease) if lease.token == self.token && lease.expires_at > Instant::now() => {
                leases.remove(&self.name);
                true
            }
            _ => false,
        }
    }

    fn extend(&mut self) -> bool {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match leases.get_mut(&self.name) {
            Some(lease) if lease.token == self.token && lease.expires_at > now => {
                lease.expires_at = now + self.options.extension;
                true
            }
            _ => false,
        }
    }
}

// ============================================================================
// FileLocker
// ============================================================================

/// Lease record stored in each lock file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct LeaseRecord {
    token: String,
    expires_at_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Lease files in a shared directory: `<dir>/<name>.lock`.
///
/// Acquisition is an exclusive create, so at most one process holds a live
/// lease. Expired leases are removed and re-created; two peers racing to take
/// over the same expired lease can both succeed, which costs a duplicate
/// computation and nothing else. The same holds for a holder whose lease
/// expires while it extends: its rewrite can displace a peer's fresh record,
/// and the peer's next `extend` reports the lease lost.
#[derive(Debug, Clone)]
pub struct FileLocker {
    dir: PathBuf,
    options: LockOptions,
}

impl FileLocker {
    /// Open (and create if needed) a lock directory.
    pub fn open(dir: impl Into<PathBuf>, options: LockOptions) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, options })
    }
}

impl Locker for FileLocker {
    fn new_lock(&self, name: &str) -> Box<dyn Lock> {
        Box::new(FileLock {
            name: name.to_string(),
            path: self.dir.join(format!("{}.lock", sanitize(name))),
            token: next_token(),
            options: self.options,
        })
    }
}

/// Lock names become file names; anything outside `[A-Za-z0-9_-]` is replaced.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

struct FileLock {
    name: String,
    path: PathBuf,
    token: String,
    options: LockOptions,
}

impl FileLock {
    fn record(&self, lease: Duration) -> LeaseRecord {
        LeaseRecord {
            token: self.token.clone(),
            expires_at_ms: now_ms() + lease.as_millis() as u64,
        }
    }

    fn read_record(&self) -> Option<LeaseRecord> {
        let content = std::fs::read(&self.path).ok()?;
        serde_json::from_slice(&content).ok()
    }

    fn create(&self) -> io::Result<()> {
        use std::io::Write;

        let json = serde_json::to_vec(&self.record(self.options.lease))?;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        if let Err(e) = file.write_all(&json) {
            drop(file);
            let _ = std::fs::remove_file(&self.path);
            return Err(e);
        }
        Ok(())
    }

    /// Whether the existing lock file has outlived its lease.
    ///
    /// A file without a readable record (a holder that crashed mid-write)
    /// expires `lease` after it was last modified.
    fn existing_expired(&self) -> io::Result<bool> {
        if let Some(record) = self.read_record() {
            return Ok(record.expires_at_ms <= now_ms());
        }
        let modified = std::fs::metadata(&self.path)?.modified()?;
        Ok(modified + self.options.lease <= SystemTime::now())
    }

    fn try_acquire(&self) -> Result<(), LockError> {
        match self.create() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(LockError::Io(e)),
        }

        match self.existing_expired() {
            Ok(true) => {}
            Ok(false) => return Err(LockError::Held(self.name.clone())),
            // Released between our create and the check; the next try will see it free.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LockError::Held(self.name.clone()));
            }
            Err(e) => return Err(LockError::Io(e)),
        }

        tracing::debug!(lock = %self.name, "taking over expired lease");
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(LockError::Io(e)),
        }
        match self.create() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(LockError::Held(self.name.clone()))
            }
            Err(e) => Err(LockError::Io(e)),
        }
    }

    fn holds_live_lease(&self) -> bool {
        self.read_record()
            .is_some_and(|r| r.token == self.token && r.expires_at_ms > now_ms())
    }

    fn release_path(&self) -> PathBuf {
        self.path.with_extension(format!("lock.{}.release", self.token))
    }
}

impl Lock for FileLock {
    fn lock(&mut self) -> Result<(), LockError> {
        acquire_with_retries(&self.options, || self.try_acquire())
    }

    /// Moves the lock file aside before checking the token, so a peer's
    /// lease created after our check is never the one deleted.
    fn unlock(&mut self) -> bool {
        if !self.holds_live_lease() {
            return false;
        }
        let aside = self.release_path();
        if std::fs::rename(&self.path, &aside).is_err() {
            return false;
        }
        let ours = std::fs::read(&aside)
            .ok()
            .and_then(|content| serde_json::from_slice::<LeaseRecord>(&content).ok())
            .is_some_and(|r| r.token == self.token);
        if !ours {
            // Put the peer's record back unless someone has already re-created the file.
            if std::fs::hard_link(&aside, &self.path).is_err() {
                tracing::debug!(lock = %self.name, "peer lease lost during release");
            }
        }
        let _ = std::fs::remove_file(&aside);
        ours
    }

    /// Confirms the written record is still ours; a peer that took over in
    /// between wins and this handle reports the lease lost.
    fn extend(&mut self) -> bool {
        if !self.holds_live_lease() {
            return false;
        }
        let record = self.record(self.options.extension);
        let written = match serde_json::to_vec(&record) {
            Ok(json) => write_atomic(&self.path, &json).is_ok(),
            Err(_) => false,
        };
        written && self.read_record().is_some_and(|r| r.token == self.token)
    }
}
