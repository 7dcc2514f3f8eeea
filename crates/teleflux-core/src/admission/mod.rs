//! Admission control: bounds how many jobs transfer at the same time.
//!
//! A fixed-size semaphore cannot be resized while permits are out, so the
//! controller keeps a `running` counter under a mutex and wakes waiters through
//! a `Notify` whenever a slot frees up or the limit changes. Waiters are not
//! served in FIFO order; whichever wakes first claims the slot.

mod permit;

pub use permit::AdmissionPermit;

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Smallest accepted concurrency limit.
pub const MIN_LIMIT: usize = 1;
/// Largest accepted concurrency limit.
pub const MAX_LIMIT: usize = 50;

#[derive(Debug)]
struct AdmissionState {
    limit: usize,
    running: usize,
}

/// Dynamic concurrency gate shared by all jobs.
#[derive(Debug)]
pub struct AdmissionController {
    state: Mutex<AdmissionState>,
    wake: Notify,
}

impl AdmissionController {
    /// Create a controller with the given limit (clamped to at least 1).
    pub fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(AdmissionState {
                limit: limit.max(MIN_LIMIT),
                running: 0,
            }),
            wake: Notify::new(),
        }
    }

    /// Wait until `running < limit`, then claim a slot. The slot is returned
    /// when the permit is dropped.
    pub async fn acquire(&self) -> AdmissionPermit<'_> {
        loop {
            // Register interest before checking so a release between the
            // check and the await cannot be missed.
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_claim() {
                return AdmissionPermit { controller: self };
            }
            notified.await;
        }
    }

    /// Claim a slot without waiting. Returns `None` when the gate is full.
    pub fn try_acquire(&self) -> Option<AdmissionPermit<'_>> {
        if self.try_claim() {
            Some(AdmissionPermit { controller: self })
        } else {
            None
        }
    }

    fn try_claim(&self) -> bool {
        let mut state = self.lock();
        if state.running < state.limit {
            state.running += 1;
            tracing::debug!(running = state.running, limit = state.limit, "admission granted");
            true
        } else {
            false
        }
    }

    /// Return a slot and wake every waiter. Called by `AdmissionPermit::drop`.
    pub(crate) fn release(&self) {
        let mut state = self.lock();
        if state.running == 0 {
            tracing::warn!("admission release with nothing running; clamping at zero");
        } else {
            state.running -= 1;
        }
        drop(state);
        self.wake.notify_waiters();
    }

    /// Replace the limit (clamped to at least 1) and wake all waiters so newly
    /// available slots get claimed. Jobs already running are never revoked:
    /// after lowering the limit, `running` may exceed it until they finish.
    /// Returns the previous limit.
    pub fn set_limit(&self, limit: usize) -> usize {
        let mut state = self.lock();
        let previous = state.limit;
        state.limit = limit.max(MIN_LIMIT);
        tracing::info!(previous, limit = state.limit, running = state.running, "concurrency limit changed");
        drop(state);
        self.wake.notify_waiters();
        previous
    }

    pub fn limit(&self) -> usize {
        self.lock().limit
    }

    /// Number of slots currently held.
    pub fn running(&self) -> usize {
        self.lock().running
    }

    fn lock(&self) -> MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
