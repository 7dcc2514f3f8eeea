//! Per-owner active job counting with debounced idle cleanup.
//!
//! When an owner's last job finishes, a cleanup timer is armed. If a new job
//! for the same owner starts before the delay elapses, the timer is cancelled;
//! when it does fire, it re-reads the count under the same lock and only calls
//! the idle handler if the owner is still idle.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::ids::OwnerId;

/// Callback invoked once an owner has stayed idle for the cleanup delay.
#[async_trait]
pub trait IdleHandler: Send + Sync {
    async fn on_idle(&self, owner: OwnerId);
}

#[derive(Debug)]
struct PendingCleanup {
    token: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct OwnerLifecycle {
    active: usize,
    pending: Option<PendingCleanup>,
}

struct Inner {
    owners: Mutex<HashMap<OwnerId, OwnerLifecycle>>,
    next_token: AtomicU64,
    delay: Duration,
    handler: Arc<dyn IdleHandler>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<OwnerId, OwnerLifecycle>> {
        self.owners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point-in-time view of lifecycle bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleSnapshot {
    /// Active job count per owner (owners seen at least once).
    pub active: BTreeMap<OwnerId, usize>,
    /// Owners with an armed cleanup timer.
    pub pending_cleanup: Vec<OwnerId>,
}

/// Tracks active jobs per owner. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LifecycleTracker {
    inner: Arc<Inner>,
}

impl LifecycleTracker {
    /// Create a tracker that calls `handler` after an owner has been idle for `delay`.
    pub fn new(delay: Duration, handler: Arc<dyn IdleHandler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                owners: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
                delay,
                handler,
            }),
        }
    }

    /// Count a new job for `owner` and cancel any pending cleanup.
    /// Returns the owner's active count after the increment.
    pub fn job_started(&self, owner: OwnerId) -> usize {
        let mut owners = self.inner.lock();
        let entry = owners.entry(owner).or_default();
        entry.active += 1;
        if let Some(pending) = entry.pending.take() {
            pending.handle.abort();
            tracing::debug!(%owner, "pending cleanup cancelled by new job");
        }
        tracing::info!(%owner, active = entry.active, "job started");
        entry.active
    }

    /// Count a finished job for `owner`. When the count drops to zero, arms a
    /// cleanup timer (replacing any stale one). Returns the remaining count.
    pub fn job_finished(&self, owner: OwnerId) -> usize {
        let mut owners = self.inner.lock();
        let entry = owners.entry(owner).or_default();
        if entry.active == 0 {
            tracing::warn!(%owner, "job finished with no active jobs; clamping at zero");
        } else {
            entry.active -= 1;
        }
        let remaining = entry.active;
        tracing::info!(%owner, remaining, "job finished");

        if remaining == 0 {
            if let Some(stale) = entry.pending.take() {
                stale.handle.abort();
            }
            let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
            // The timer's double-check takes this same lock, so it cannot
            // observe the map before `pending` is stored below.
            let handle = tokio::spawn(delayed_cleanup(Arc::clone(&self.inner), owner, token));
            entry.pending = Some(PendingCleanup { token, handle });
        }
        remaining
    }

    /// Active job count for `owner` (0 for unknown owners).
    pub fn active_count(&self, owner: OwnerId) -> usize {
        self.inner.lock().get(&owner).map_or(0, |e| e.active)
    }

    /// Whether a cleanup timer is armed for `owner`.
    pub fn cleanup_pending(&self, owner: OwnerId) -> bool {
        self.inner
            .lock()
            .get(&owner)
            .is_some_and(|e| e.pending.is_some())
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        let owners = self.inner.lock();
        let mut snap = LifecycleSnapshot::default();
        for (owner, entry) in owners.iter() {
            snap.active.insert(*owner, entry.active);
            if entry.pending.is_some() {
                snap.pending_cleanup.push(*owner);
            }
        }
        snap.pending_cleanup.sort();
        snap
    }

    /// Abort every armed cleanup timer (shutdown).
    pub fn cancel_all(&self) {
        let mut owners = self.inner.lock();
        for entry in owners.values_mut() {
            if let Some(pending) = entry.pending.take() {
                pending.handle.abort();
            }
        }
    }
}

async fn delayed_cleanup(inner: Arc<Inner>, owner: OwnerId, token: u64) {
    tokio::time::sleep(inner.delay).await;

    {
        let mut owners = inner.lock();
        let Some(entry) = owners.get_mut(&owner) else {
            return;
        };
        if entry.pending.as_ref().map(|p| p.token) != Some(token) {
            // Superseded by a newer timer.
            return;
        }
        // Drop our own handle before running the callback so a later
        // job_started cannot abort the callback halfway through.
        entry.pending = None;
        if entry.active != 0 {
            tracing::info!(%owner, active = entry.active, "cleanup skipped, new jobs arrived");
            return;
        }
    }

    tracing::info!(%owner, delay_s = inner.delay.as_secs_f64(), "owner idle, running cleanup");
    inner.handler.on_idle(owner).await;
}
