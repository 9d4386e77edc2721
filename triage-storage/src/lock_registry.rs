//! Per-app exclusive locks.
//!
//! Every mutation of an app's problem rows runs while holding that app's
//! lock, the in-process equivalent of `SELECT ... FOR UPDATE` on the app
//! row. Calls for the same app queue in acquisition order; calls for
//! different apps never contend.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use triage_core::AppId;

/// Registry of one async mutex per app.
#[derive(Debug, Default)]
pub struct AppLockRegistry {
    locks: DashMap<AppId, Arc<Mutex<()>>>,
}

/// Proof that the holder owns the exclusive lock for `app_id`.
/// Dropping it releases the lock.
#[derive(Debug)]
pub struct AppLockGuard {
    app_id: AppId,
    acquired_at: Instant,
    _guard: OwnedMutexGuard<()>,
}

impl AppLockGuard {
    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    /// How long the lock has been held.
    pub fn held_for(&self) -> std::time::Duration {
        self.acquired_at.elapsed()
    }
}

impl AppLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, app_id: AppId) -> Arc<Mutex<()>> {
        // entry() does get-or-insert atomically; the shard ref is released
        // at the end of the statement, before anyone awaits the mutex.
        self.locks
            .entry(app_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for the exclusive lock on `app_id`.
    pub async fn acquire(&self, app_id: AppId) -> AppLockGuard {
        let lock = self.lock_for(app_id);
        let guard = lock.lock_owned().await;
        AppLockGuard {
            app_id,
            acquired_at: Instant::now(),
            _guard: guard,
        }
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(&self, app_id: AppId) -> Option<AppLockGuard> {
        let lock = self.lock_for(app_id);
        lock.try_lock_owned().ok().map(|guard| AppLockGuard {
            app_id,
            acquired_at: Instant::now(),
            _guard: guard,
        })
    }

    /// Release `guard` and drop the registry entry of its app.
    ///
    /// The entry survives while any waiter still holds a clone of the mutex,
    /// so every later caller queues on that same mutex. The last waiter to
    /// release it removes the entry.
    pub fn release_and_forget(&self, guard: AppLockGuard) {
        let app_id = guard.app_id;
        drop(guard);
        // remove_if runs under the shard lock, the same lock lock_for clones
        // under, so no clone can appear between the check and the removal.
        self.locks
            .remove_if(&app_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of apps with a registered lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
