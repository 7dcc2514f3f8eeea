//! Entry point that wires admission, lifecycle, registry and publisher
//! together and runs one task per job.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::admission::{AdmissionController, MAX_LIMIT, MIN_LIMIT};
use crate::config::Timings;
use crate::error::OrchestratorError;
use crate::history::HistoryEntry;
use crate::ids::{JobId, OwnerId};
use crate::job::controller::{self, JobServices};
use crate::job::progress::human_size;
use crate::job::{CancelReason, CancelRequest, JobHandle, JobState, JobView, PauseToggle};
use crate::lifecycle::{IdleHandler, LifecycleTracker};
use crate::publisher::{dashboard, Dashboard, MessagingSurface, PublishOutcome, Renderer, StatusPublisher};
use crate::registry::JobRegistry;
use crate::storage;
use crate::transfer::{TargetSpec, TransferClient};

/// Point-in-time view of aggregate state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Active job count per owner.
    pub active: BTreeMap<OwnerId, usize>,
    /// Owners with an armed cleanup timer.
    pub pending_cleanup: Vec<OwnerId>,
    /// Live jobs per state.
    pub states: BTreeMap<JobState, usize>,
    pub running: usize,
    pub limit: usize,
}

/// Runs when an owner has had no active jobs for the cleanup delay: clears
/// the owner's history trail and republishes the now empty panel.
struct DashboardCleanup {
    registry: Arc<JobRegistry>,
    publisher: StatusPublisher,
}

#[async_trait]
impl IdleHandler for DashboardCleanup {
    async fn on_idle(&self, owner: OwnerId) {
        let cleared = self.registry.clear_history(owner);
        let outcome = self.publisher.publish(owner, true).await;
        tracing::info!(%owner, cleared, ?outcome, "idle owner cleaned up");
    }
}

pub struct Orchestrator {
    services: Arc<JobServices>,
    tracker: TaskTracker,
}

impl Orchestrator {
    /// Orchestrator rendering with the default [`Dashboard`].
    pub fn new(
        timings: Timings,
        client: Arc<dyn TransferClient>,
        surface: Arc<dyn MessagingSurface>,
    ) -> Self {
        let shown = timings.history_shown;
        Self::with_renderer(timings, client, surface, |registry| {
            Arc::new(Dashboard::new(registry, shown)) as Arc<dyn Renderer>
        })
    }

    /// Orchestrator with a caller-supplied renderer built over the job registry.
    pub fn with_renderer<F>(
        timings: Timings,
        client: Arc<dyn TransferClient>,
        surface: Arc<dyn MessagingSurface>,
        make_renderer: F,
    ) -> Self
    where
        F: FnOnce(Arc<JobRegistry>) -> Arc<dyn Renderer>,
    {
        let registry = Arc::new(JobRegistry::new(timings.history_limit));
        let publisher = StatusPublisher::new(
            make_renderer(Arc::clone(&registry)),
            surface,
            timings.publish_min_interval,
            timings.publish_retry_delay,
        );
        let cleanup = Arc::new(DashboardCleanup {
            registry: Arc::clone(&registry),
            publisher: publisher.clone(),
        });
        let services = JobServices {
            admission: AdmissionController::new(timings.max_concurrent),
            lifecycle: LifecycleTracker::new(timings.cleanup_delay, cleanup),
            registry,
            publisher,
            client,
            timings,
            shutdown: CancellationToken::new(),
        };
        Self {
            services: Arc::new(services),
            tracker: TaskTracker::new(),
        }
    }

    /// Queue a job and launch its task. Fails when the target cannot produce
    /// a valid output path or another live job already writes to it.
    pub async fn start_job(
        &self,
        owner: OwnerId,
        target: TargetSpec,
    ) -> Result<JobId, OrchestratorError> {
        self.start_job_handle(owner, target).await.map(|job| job.id)
    }

    /// Like [`start_job`](Self::start_job), returning the job's handle. The
    /// handle stays readable after the job is retired from the registry.
    pub async fn start_job_handle(
        &self,
        owner: OwnerId,
        target: TargetSpec,
    ) -> Result<Arc<JobHandle>, OrchestratorError> {
        let final_path = target.final_path()?;
        let temp = storage::temp_path(&final_path);
        let resume_offset = storage::resume_offset(&temp).await.map_err(|e| {
            OrchestratorError::InvalidTarget(format!("cannot inspect {}: {e}", temp.display()))
        })?;

        let id = JobId::next();
        let job = Arc::new(JobHandle::new(id, owner, target, final_path, resume_offset));
        let note = (resume_offset > 0).then(|| format!("resume from {}", human_size(resume_offset)));

        if !self.services.registry.try_insert(Arc::clone(&job)) {
            return Err(OrchestratorError::InvalidTarget(format!(
                "{} is already being downloaded",
                job.final_path.display()
            )));
        }
        self.services.lifecycle.job_started(owner);
        self.services.registry.push_history(
            owner,
            HistoryEntry::new(job.display_name(), JobState::Queued.label(), note),
        );
        tracing::info!(job_id = %id, %owner, resume_offset, path = %job.final_path.display(), "job queued");

        self.tracker
            .spawn(controller::run(Arc::clone(&self.services), Arc::clone(&job)));
        self.services.publisher.publish(owner, true).await;
        Ok(job)
    }

    fn live(&self, id: JobId) -> Result<Arc<JobHandle>, OrchestratorError> {
        self.services
            .registry
            .get(id)
            .ok_or(OrchestratorError::UnknownJob(id))
    }

    /// Flip the pause flag of a job.
    pub async fn toggle_pause(&self, id: JobId) -> Result<PauseToggle, OrchestratorError> {
        let job = self.live(id)?;
        let toggled = job.toggle_pause()?;
        tracing::info!(job_id = %id, ?toggled, "pause toggled");
        self.services.publisher.publish(job.owner, true).await;
        Ok(toggled)
    }

    /// Request user cancellation. A second request while cancelling is a no-op.
    pub async fn cancel_job(&self, id: JobId) -> Result<CancelRequest, OrchestratorError> {
        let job = self.live(id)?;
        match job.request_cancel(CancelReason::User) {
            CancelRequest::AlreadyFinished => Err(OrchestratorError::JobFinished(id)),
            request => {
                tracing::info!(job_id = %id, ?request, "cancel requested");
                self.services.publisher.publish(job.owner, true).await;
                Ok(request)
            }
        }
    }

    /// Change the concurrency limit. Values outside 1..=50 are rejected and
    /// leave the limit unchanged. Running jobs above a lowered limit keep
    /// running. Returns the previous limit.
    pub fn set_concurrency_limit(&self, limit: usize) -> Result<usize, OrchestratorError> {
        if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
            return Err(OrchestratorError::InvalidLimit {
                requested: limit,
                min: MIN_LIMIT,
                max: MAX_LIMIT,
            });
        }
        Ok(self.services.admission.set_limit(limit))
    }

    /// `(running, limit)`.
    pub fn concurrency(&self) -> (usize, usize) {
        let admission = &self.services.admission;
        (admission.running(), admission.limit())
    }

    pub fn snapshot(&self) -> Snapshot {
        let lifecycle = self.services.lifecycle.snapshot();
        let (running, limit) = self.concurrency();
        Snapshot {
            active: lifecycle.active,
            pending_cleanup: lifecycle.pending_cleanup,
            states: self.services.registry.state_counts(),
            running,
            limit,
        }
    }

    pub fn status_report(&self, owner: OwnerId) -> String {
        dashboard::status_report(&self.snapshot(), owner, &self.jobs(owner))
    }

    pub fn job(&self, id: JobId) -> Option<JobView> {
        self.services.registry.get(id).map(|j| j.view())
    }

    /// Live jobs of `owner` in creation order.
    pub fn jobs(&self, owner: OwnerId) -> Vec<JobView> {
        self.services.registry.views(owner)
    }

    /// Force a republish of `owner`'s panel.
    pub async fn refresh(&self, owner: OwnerId) -> PublishOutcome {
        self.services.publisher.publish(owner, true).await
    }

    /// Cancel every live job. Returns how many requests were accepted.
    pub fn cancel_all(&self) -> usize {
        self.services
            .registry
            .all()
            .iter()
            .filter(|j| j.request_cancel(CancelReason::User) == CancelRequest::Accepted)
            .count()
    }

    /// Resolve once every job task launched so far has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel all jobs, skip grace periods, wait for the tasks and stop timers.
    pub async fn shutdown(&self) {
        let cancelled = self.cancel_all();
        tracing::info!(cancelled, "orchestrator shutting down");
        self.services.shutdown.cancel();
        self.wait_idle().await;
        self.services.lifecycle.cancel_all();
        self.services.publisher.shutdown().await;
    }
}
