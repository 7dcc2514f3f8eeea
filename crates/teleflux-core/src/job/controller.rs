//! The task that runs one job from admission to retirement.
//!
//! Phases: wait for admission, stream the transfer into the artifact while
//! honouring pause and cancel, map the outcome to a terminal state, then keep
//! the terminal row visible for a grace period before removing the job.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::progress::SpeedMeter;
use super::{watchdog, CancelReason, JobHandle, JobState};
use crate::admission::AdmissionController;
use crate::config::Timings;
use crate::history::HistoryEntry;
use crate::lifecycle::LifecycleTracker;
use crate::publisher::StatusPublisher;
use crate::registry::JobRegistry;
use crate::storage::{self, ArtifactWriter};
use crate::transfer::{TransferClient, TransferError, TransferStream};

/// Everything a job task needs, shared by all jobs of one orchestrator.
pub(crate) struct JobServices {
    pub admission: AdmissionController,
    pub lifecycle: LifecycleTracker,
    pub registry: Arc<JobRegistry>,
    pub publisher: StatusPublisher,
    pub client: Arc<dyn TransferClient>,
    pub timings: Timings,
    /// Cancelled on orchestrator shutdown; cuts grace periods short.
    pub shutdown: CancellationToken,
}

enum Outcome {
    Completed,
    Cancelled(CancelReason),
    Failed(TransferError),
}

/// Run `job` to completion and remove it from the registry.
pub(crate) async fn run(services: Arc<JobServices>, job: Arc<JobHandle>) {
    let outcome = drive(&services, &job).await;
    let state = finish(&services, &job, outcome).await;
    retire(&services, &job, state).await;
}

fn cancelled(job: &JobHandle) -> Outcome {
    Outcome::Cancelled(job.cancel_reason().unwrap_or(CancelReason::User))
}

async fn drive(services: &JobServices, job: &Arc<JobHandle>) -> Outcome {
    let cancel = job.cancel_token();

    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return cancelled(job),
        permit = services.admission.acquire() => permit,
    };
    if !job.mark_admitted(Instant::now()) {
        return cancelled(job);
    }
    tracing::info!(
        job_id = %job.id,
        owner = %job.owner,
        resume_offset = job.resume_offset,
        total = job.total(),
        "job admitted"
    );
    services.publisher.publish(job.owner, true).await;

    let watchdog = watchdog::spawn(
        Arc::clone(job),
        services.timings.stall_timeout,
        services.timings.watchdog_interval,
    );
    let outcome = transfer(services, job, &cancel).await;
    watchdog.abort();
    drop(permit);
    outcome
}

async fn transfer(services: &JobServices, job: &JobHandle, cancel: &CancellationToken) -> Outcome {
    let offset = job.resume_offset;
    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return cancelled(job),
        opened = services.client.open(&job.target, offset) => match opened {
            Ok(stream) => stream,
            Err(e) => return Outcome::Failed(e),
        },
    };
    let mut writer = match ArtifactWriter::open(&job.temp_path, offset).await {
        Ok(w) => w,
        Err(e) => return Outcome::Failed(e.into()),
    };

    let mut meter = SpeedMeter::new(offset, Instant::now());
    let mut session_bytes: u64 = 0;
    let mut pause_rx = job.pause_receiver();

    loop {
        if !pause_gate(services, job, &mut pause_rx, cancel, &mut meter).await {
            return cancelled(job);
        }

        let Some(next) = read_chunk(services, job, &mut stream, &mut pause_rx, cancel).await
        else {
            return cancelled(job);
        };
        // A chunk that lands while paused is held until the job resumes.
        if !pause_gate(services, job, &mut pause_rx, cancel, &mut meter).await {
            return cancelled(job);
        }
        match next {
            Ok(Some(chunk)) => {
                if let Err(e) = writer.write(&chunk).await {
                    return Outcome::Failed(e.into());
                }
                session_bytes += chunk.len() as u64;
                let now = Instant::now();
                let absolute = offset + session_bytes;
                let speed = meter.sample(absolute, now);
                job.record_progress(absolute, speed, now);
                services.publisher.publish(job.owner, false).await;
            }
            Ok(None) => break,
            Err(e) => {
                if let Err(sync_err) = writer.sync().await {
                    tracing::warn!(job_id = %job.id, error = %sync_err, "sync of partial artifact failed");
                }
                return Outcome::Failed(e);
            }
        }
    }

    let received = offset + session_bytes;
    let expected = job.total();
    if expected > 0 && received < expected {
        if let Err(e) = writer.sync().await {
            tracing::warn!(job_id = %job.id, error = %e, "sync of partial artifact failed");
        }
        return Outcome::Failed(TransferError::Incomplete { expected, received });
    }
    if !job.begin_finalize() {
        return cancelled(job);
    }
    match writer.promote(&job.final_path).await {
        Ok(()) => Outcome::Completed,
        Err(e) => Outcome::Failed(e.into()),
    }
}

/// Wait for the next chunk while following the pause flag, so a pause shows
/// up as `paused` even when the read is slow. The pending read is kept across
/// pause changes. Returns `None` on cancellation.
async fn read_chunk(
    services: &JobServices,
    job: &JobHandle,
    stream: &mut Box<dyn TransferStream>,
    pause_rx: &mut watch::Receiver<bool>,
    cancel: &CancellationToken,
) -> Option<Result<Option<Vec<u8>>, TransferError>> {
    let mut chunk = stream.next_chunk();
    let mut watching = true;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            next = &mut chunk => return Some(next),
            changed = pause_rx.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                let paused = *pause_rx.borrow_and_update();
                if paused {
                    pause_entered(services, job).await;
                } else {
                    pause_left(services, job).await;
                }
            }
        }
    }
}

async fn pause_entered(services: &JobServices, job: &JobHandle) {
    if job.enter_pause() {
        tracing::info!(job_id = %job.id, downloaded = job.downloaded(), "job paused");
        services.publisher.publish(job.owner, true).await;
    }
}

async fn pause_left(services: &JobServices, job: &JobHandle) {
    if job.leave_pause(Instant::now()) {
        tracing::info!(job_id = %job.id, "job resumed");
        services.publisher.publish(job.owner, true).await;
    }
}

/// Hold here while the pause flag is set. Returns false if cancelled meanwhile.
async fn pause_gate(
    services: &JobServices,
    job: &JobHandle,
    pause_rx: &mut watch::Receiver<bool>,
    cancel: &CancellationToken,
    meter: &mut SpeedMeter,
) -> bool {
    if !*pause_rx.borrow_and_update() {
        return true;
    }
    if !hold_while_paused(services, job, pause_rx, cancel).await {
        return false;
    }
    meter.reset(job.downloaded(), Instant::now());
    true
}

/// Park the job until it is resumed. Returns false if it was cancelled while paused.
async fn hold_while_paused(
    services: &JobServices,
    job: &JobHandle,
    pause_rx: &mut watch::Receiver<bool>,
    cancel: &CancellationToken,
) -> bool {
    pause_entered(services, job).await;

    while *pause_rx.borrow_and_update() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            changed = pause_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    pause_left(services, job).await;
    true
}

async fn finish(services: &JobServices, job: &JobHandle, outcome: Outcome) -> JobState {
    // A cancel that raced a failing read still ends as a cancellation.
    let outcome = match outcome {
        Outcome::Failed(e) if job.state() == JobState::Cancelling => {
            tracing::debug!(job_id = %job.id, error = %e, "transfer error after cancel request");
            cancelled(job)
        }
        other => other,
    };
    let (state, note, discard) = match outcome {
        Outcome::Completed => (JobState::Completed, None, false),
        Outcome::Cancelled(CancelReason::User) => (JobState::Cancelled, None, true),
        Outcome::Cancelled(CancelReason::Stalled) => {
            (JobState::Failed, Some("stalled".to_string()), true)
        }
        Outcome::Failed(e) => {
            tracing::warn!(job_id = %job.id, error = %e, "transfer failed, keeping partial artifact");
            (JobState::Failed, Some(e.short_label().to_string()), false)
        }
    };

    if discard {
        match storage::discard(&job.temp_path).await {
            Ok(removed) => {
                tracing::debug!(job_id = %job.id, removed, "partial artifact discarded")
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "could not remove partial artifact")
            }
        }
    }

    job.finish(state, note.clone());
    tracing::info!(
        job_id = %job.id,
        owner = %job.owner,
        state = %state,
        downloaded = job.downloaded(),
        "job finished"
    );
    services
        .registry
        .push_history(job.owner, HistoryEntry::new(job.display_name(), state.label(), note));
    services.publisher.publish(job.owner, true).await;
    services.lifecycle.job_finished(job.owner);
    state
}

/// Keep the terminal row visible, refresh once, then drop the job.
async fn retire(services: &JobServices, job: &JobHandle, state: JobState) {
    let t = &services.timings;
    let grace = if state == JobState::Failed {
        t.failed_grace
    } else {
        t.completed_grace
    };
    let refresh = t.final_refresh_delay.min(grace);

    if linger(services, refresh).await {
        services.publisher.publish(job.owner, true).await;
        linger(services, grace - refresh).await;
    }

    services.registry.remove(job.id);
    tracing::debug!(job_id = %job.id, "job retired");
    services.publisher.publish(job.owner, true).await;
}

/// Sleep unless the orchestrator is shutting down. Returns false on shutdown.
async fn linger(services: &JobServices, d: Duration) -> bool {
    tokio::select! {
        _ = services.shutdown.cancelled() => false,
        _ = tokio::time::sleep(d) => true,
    }
}
