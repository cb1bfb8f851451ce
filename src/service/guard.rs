//! Scoped ownership of an acquired [`Lock`].
//!
//! A held lock is settled exactly once: explicitly with [`LockGuard::extend`]
//! or [`LockGuard::release`], or by `Drop` on every other exit path (early
//! return, `?`, panic unwinding). Dropping releases, so a panicking
//! computation never leaves peers waiting out the full lease.

use super::Lock;

pub struct LockGuard<'a> {
    key: &'a str,
    lock: Option<Box<dyn Lock>>,
}

impl<'a> LockGuard<'a> {
    /// Take ownership of a lock that was just acquired.
    pub fn new(key: &'a str, lock: Box<dyn Lock>) -> Self {
        Self {
            key,
            lock: Some(lock),
        }
    }

    /// Keep the lease alive past the computation so peers that just missed
    /// the cache poll the store instead of recomputing.
    pub fn extend(mut self) {
        if let Some(mut lock) = self.lock.take()
            && !lock.extend()
        {
            tracing::warn!(key = self.key, "failed to extend lock lease");
        }
    }

    /// Release immediately so a peer can retry.
    pub fn release(mut self) {
        if let Some(lock) = self.lock.take() {
            unlock(self.key, lock);
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            if std::thread::panicking() {
                tracing::warn!(key = self.key, "releasing lock while unwinding");
            }
            unlock(self.key, lock);
        }
    }
}

fn unlock(key: &str, mut lock: Box<dyn Lock>) {
    if !lock.unlock() {
        tracing::warn!(key, "failed to release lock");
    }
}
