//! Rate-limited, content-diffing status publisher.
//!
//! Each owner has a [`PublishState`] behind its own async mutex: the
//! signature of the last content the surface accepted, the time of the last
//! attempt, and at most one pending retry. A publish renders the view, skips
//! the edit when the signature is unchanged (even when forced), and otherwise
//! edits the surface. Transient failures schedule exactly one delayed retry;
//! permanent failures are logged and dropped.

pub mod dashboard;
mod signature;
pub mod surface;

pub use dashboard::Dashboard;
pub use signature::signature;
pub use surface::{Control, EditError, MessagingSurface, Rendered, Renderer};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::ids::OwnerId;

/// Extra wait on top of the surface's `retry_after`.
const RATE_LIMIT_PADDING: Duration = Duration::from_secs(1);

/// What a publish call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The surface was edited (or reported the content as already current).
    Published,
    /// Content matches the last published signature; no edit.
    Unchanged,
    /// Within the minimum interval (or another publish is in flight).
    Throttled,
    /// Edit failed transiently; a retry is pending.
    RetryScheduled,
    /// Edit failed and will not be retried.
    Dropped,
}

#[derive(Debug, Default)]
struct PublishState {
    last_signature: Option<String>,
    last_attempt: Option<Instant>,
    pending_retry: Option<JoinHandle<()>>,
}

type Slot = Arc<tokio::sync::Mutex<PublishState>>;

enum Attempt {
    Unchanged,
    Published,
    Failed(EditError),
}

struct Inner {
    renderer: Arc<dyn Renderer>,
    surface: Arc<dyn MessagingSurface>,
    min_interval: Duration,
    retry_delay: Duration,
    slots: Mutex<HashMap<OwnerId, Slot>>,
}

/// Publishes owner views to a messaging surface. Cheap to clone.
#[derive(Clone)]
pub struct StatusPublisher {
    inner: Arc<Inner>,
}

impl StatusPublisher {
    /// `min_interval` throttles non-forced publishes per owner; `retry_delay`
    /// is the wait before retrying a transient (non rate-limit) failure.
    pub fn new(
        renderer: Arc<dyn Renderer>,
        surface: Arc<dyn MessagingSurface>,
        min_interval: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                renderer,
                surface,
                min_interval,
                retry_delay,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn slot(&self, owner: OwnerId) -> Slot {
        let mut slots = self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(owner).or_default())
    }

    /// Render and publish the owner's view. `force` bypasses only the minimum
    /// interval; unchanged content is never re-sent.
    pub async fn publish(&self, owner: OwnerId, force: bool) -> PublishOutcome {
        let slot = self.slot(owner);
        let mut state = if force {
            slot.lock().await
        } else {
            match slot.try_lock() {
                Ok(guard) => guard,
                Err(_) => return PublishOutcome::Throttled,
            }
        };

        if !force {
            if let Some(last) = state.last_attempt {
                if Instant::now().saturating_duration_since(last) < self.inner.min_interval {
                    return PublishOutcome::Throttled;
                }
            }
        }

        match self.attempt(owner, &mut state).await {
            Attempt::Unchanged => PublishOutcome::Unchanged,
            Attempt::Published => PublishOutcome::Published,
            Attempt::Failed(EditError::Permanent(reason)) => {
                tracing::warn!(%owner, %reason, "status edit failed permanently, dropped");
                PublishOutcome::Dropped
            }
            Attempt::Failed(err) => {
                if state.pending_retry.as_ref().is_some_and(|h| !h.is_finished()) {
                    tracing::debug!(%owner, error = %err, "status edit failed, retry already pending");
                    return PublishOutcome::RetryScheduled;
                }
                let delay = match &err {
                    EditError::RateLimited { retry_after } => *retry_after + RATE_LIMIT_PADDING,
                    _ => self.inner.retry_delay,
                };
                tracing::warn!(%owner, error = %err, retry_in_ms = delay.as_millis() as u64, "status edit failed, retrying once");
                state.pending_retry = Some(tokio::spawn(retry_later(
                    self.clone(),
                    owner,
                    Arc::clone(&slot),
                    delay,
                )));
                PublishOutcome::RetryScheduled
            }
        }
    }

    /// Render, compare and edit. Does not schedule retries.
    async fn attempt(&self, owner: OwnerId, state: &mut PublishState) -> Attempt {
        let view = self.inner.renderer.render(owner);
        let sig = signature(&view);
        let now = Instant::now();
        if state.last_signature.as_deref() == Some(sig.as_str()) {
            state.last_attempt = Some(now);
            return Attempt::Unchanged;
        }
        state.last_attempt = Some(now);
        match self.inner.surface.edit(owner, &view).await {
            Ok(()) | Err(EditError::NotModified) => {
                state.last_signature = Some(sig);
                if let Some(pending) = state.pending_retry.take() {
                    pending.abort();
                }
                Attempt::Published
            }
            Err(e) => Attempt::Failed(e),
        }
    }

    /// Whether a retry is pending for `owner`.
    pub async fn retry_pending(&self, owner: OwnerId) -> bool {
        let slot = self.slot(owner);
        let state = slot.lock().await;
        state.pending_retry.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Abort every pending retry.
    pub async fn shutdown(&self) {
        let slots: Vec<Slot> = self
            .inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for slot in slots {
            if let Some(pending) = slot.lock().await.pending_retry.take() {
                pending.abort();
            }
        }
    }
}

async fn retry_later(publisher: StatusPublisher, owner: OwnerId, slot: Slot, delay: Duration) {
    tokio::time::sleep(delay).await;
    let mut state = slot.lock().await;
    // Our own handle; dropping it does not abort this task.
    state.pending_retry = None;
    match publisher.attempt(owner, &mut state).await {
        Attempt::Published | Attempt::Unchanged => {
            tracing::debug!(%owner, "status retry succeeded");
        }
        Attempt::Failed(err) => {
            tracing::warn!(%owner, error = %err, "status retry failed, dropped");
        }
    }
}
