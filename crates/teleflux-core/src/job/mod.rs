//! Per-job state: the state machine, progress counters and the two external
//! signals (pause toggle, cancel request).
//!
//! A [`JobHandle`] is shared between the job's own task, its watchdog and the
//! orchestrator. Compound fields live behind one short-held mutex; the byte
//! counter is an atomic so the dashboard can read it without locking.

pub mod controller;
pub mod progress;
pub mod watchdog;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::OrchestratorError;
use crate::ids::{JobId, OwnerId};
use crate::storage;
use crate::transfer::TargetSpec;

/// Job state. Ordered the way the dashboard groups counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobState {
    Queued,
    Downloading,
    Paused,
    Cancelling,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 7] = [
        JobState::Queued,
        JobState::Downloading,
        JobState::Paused,
        JobState::Cancelling,
        JobState::Completed,
        JobState::Cancelled,
        JobState::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Downloading => "downloading",
            JobState::Paused => "paused",
            JobState::Cancelling => "cancelling",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        }
    }

    /// Dashboard label.
    pub fn label(self) -> &'static str {
        match self {
            JobState::Queued => "⏳ queued",
            JobState::Downloading => "📥 downloading",
            JobState::Paused => "⏸ paused",
            JobState::Cancelling => "🧹 cancelling",
            JobState::Completed => "✅ completed",
            JobState::Cancelled => "❌ cancelled",
            JobState::Failed => "⚠️ failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who asked for the cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    User,
    Stalled,
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelRequest {
    Accepted,
    /// Already being cancelled; the request is a no-op.
    AlreadyCancelling,
    AlreadyFinished,
}

/// Result of a pause toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseToggle {
    Paused,
    Resumed,
    /// The job is being cancelled; pausing is meaningless.
    Ignored,
}

#[derive(Debug)]
struct JobProgress {
    state: JobState,
    cancel_reason: Option<CancelReason>,
    speed: Option<f64>,
    eta: Option<f64>,
    note: Option<String>,
    last_progress_at: Instant,
    /// The transfer has ended and the artifact is being finalized; external
    /// cancel and pause requests no longer apply.
    finalizing: bool,
}

/// Read-only copy of a job for rendering and status reports.
#[derive(Debug, Clone, PartialEq)]
pub struct JobView {
    pub id: JobId,
    pub owner: OwnerId,
    pub display_name: String,
    pub state: JobState,
    pub paused: bool,
    pub downloaded: u64,
    pub total: u64,
    pub resume_offset: u64,
    /// Bytes per second; `None` when unknown (also while paused).
    pub speed: Option<f64>,
    /// Seconds remaining; `None` when unknown.
    pub eta: Option<f64>,
    pub note: Option<String>,
    pub cancel_reason: Option<CancelReason>,
    pub final_path: PathBuf,
}

impl JobView {
    /// Percent complete in [0, 100]; 0 when the total is unknown.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.downloaded as f64 / self.total as f64 * 100.0).min(100.0)
    }
}

/// Shared handle to one job.
#[derive(Debug)]
pub struct JobHandle {
    pub id: JobId,
    pub owner: OwnerId,
    pub target: TargetSpec,
    pub final_path: PathBuf,
    pub temp_path: PathBuf,
    pub resume_offset: u64,
    pub created_at: Instant,
    downloaded: AtomicU64,
    progress: Mutex<JobProgress>,
    pause_tx: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl JobHandle {
    pub fn new(
        id: JobId,
        owner: OwnerId,
        target: TargetSpec,
        final_path: PathBuf,
        resume_offset: u64,
    ) -> Self {
        let now = Instant::now();
        let (pause_tx, _) = watch::channel(false);
        Self {
            id,
            owner,
            temp_path: storage::temp_path(&final_path),
            final_path,
            target,
            resume_offset,
            created_at: now,
            downloaded: AtomicU64::new(resume_offset),
            progress: Mutex::new(JobProgress {
                state: JobState::Queued,
                cancel_reason: None,
                speed: None,
                eta: None,
                note: None,
                last_progress_at: now,
                finalizing: false,
            }),
            pause_tx,
            cancel: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobProgress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn total(&self) -> u64 {
        self.target.total_bytes
    }

    pub fn display_name(&self) -> &str {
        self.target.display_name()
    }

    pub fn state(&self) -> JobState {
        self.lock().state
    }

    /// Absolute bytes on disk: resume offset plus bytes of this session.
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.lock().cancel_reason
    }

    pub fn last_progress_at(&self) -> Instant {
        self.lock().last_progress_at
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_tx.borrow()
    }

    pub fn pause_receiver(&self) -> watch::Receiver<bool> {
        self.pause_tx.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Move to `cancelling` and trigger the token. The state change happens
    /// before the transfer observes the token.
    pub fn request_cancel(&self, reason: CancelReason) -> CancelRequest {
        let mut p = self.lock();
        if p.state.is_terminal() || p.finalizing {
            return CancelRequest::AlreadyFinished;
        }
        if p.state == JobState::Cancelling {
            return CancelRequest::AlreadyCancelling;
        }
        Self::begin_cancel(&mut p, reason);
        drop(p);
        self.cancel.cancel();
        CancelRequest::Accepted
    }

    /// Watchdog variant of [`request_cancel`](Self::request_cancel): only
    /// succeeds while the job is in `downloading` and the byte counter still
    /// equals `expected_bytes`. Checked under the job lock so a late chunk or
    /// a job that already entered `paused` wins over the stall.
    pub fn request_stall_cancel(&self, expected_bytes: u64) -> bool {
        let mut p = self.lock();
        if p.state != JobState::Downloading
            || p.finalizing
            || self.downloaded() != expected_bytes
        {
            return false;
        }
        Self::begin_cancel(&mut p, CancelReason::Stalled);
        drop(p);
        self.cancel.cancel();
        true
    }

    fn begin_cancel(p: &mut JobProgress, reason: CancelReason) {
        p.state = JobState::Cancelling;
        p.cancel_reason = Some(reason);
        p.speed = None;
        p.eta = None;
    }

    /// Flip the pause flag. On a queued job only the flag changes; the job
    /// enters `paused` once admitted.
    pub fn toggle_pause(&self) -> Result<PauseToggle, OrchestratorError> {
        let p = self.lock();
        if p.state.is_terminal() || p.finalizing {
            return Err(OrchestratorError::JobFinished(self.id));
        }
        if p.state == JobState::Cancelling {
            return Ok(PauseToggle::Ignored);
        }
        let now_paused = !*self.pause_tx.borrow();
        self.pause_tx.send_replace(now_paused);
        Ok(if now_paused {
            PauseToggle::Paused
        } else {
            PauseToggle::Resumed
        })
    }

    /// `queued → downloading` after admission. Returns false if the job was
    /// cancelled while waiting.
    pub fn mark_admitted(&self, now: Instant) -> bool {
        let mut p = self.lock();
        if p.state != JobState::Queued {
            return false;
        }
        p.state = JobState::Downloading;
        p.last_progress_at = now;
        true
    }

    /// `downloading → paused`. Returns false if the job was not downloading.
    pub fn enter_pause(&self) -> bool {
        let mut p = self.lock();
        if p.state != JobState::Downloading {
            return false;
        }
        p.state = JobState::Paused;
        p.speed = None;
        p.eta = None;
        true
    }

    /// `paused → downloading`. Resets the progress timestamp so paused time is
    /// never counted as idle.
    pub fn leave_pause(&self, now: Instant) -> bool {
        let mut p = self.lock();
        if p.state != JobState::Paused {
            return false;
        }
        p.state = JobState::Downloading;
        p.last_progress_at = now;
        true
    }

    /// Claim the job for finalization once the transfer has ended. Returns
    /// false if a cancel got in first; afterwards cancel requests report the
    /// job as finished.
    pub fn begin_finalize(&self) -> bool {
        let mut p = self.lock();
        if p.state == JobState::Cancelling || p.state.is_terminal() {
            return false;
        }
        p.finalizing = true;
        true
    }

    /// Record a progress notification. The byte counter never moves backwards.
    pub fn record_progress(&self, absolute: u64, speed: f64, now: Instant) {
        self.downloaded.fetch_max(absolute, Ordering::AcqRel);
        let mut p = self.lock();
        if p.state != JobState::Downloading {
            return;
        }
        p.last_progress_at = now;
        if speed > 0.0 {
            p.speed = Some(speed);
            p.eta = progress::eta_secs(self.total(), self.downloaded(), speed);
        } else {
            p.speed = None;
            p.eta = None;
        }
    }

    /// Enter a terminal state. Completion forces the counter to the total.
    pub fn finish(&self, state: JobState, note: Option<String>) {
        debug_assert!(state.is_terminal());
        if state == JobState::Completed && self.total() > 0 {
            self.downloaded.fetch_max(self.total(), Ordering::AcqRel);
        }
        let mut p = self.lock();
        p.state = state;
        p.speed = None;
        p.eta = None;
        p.note = note;
    }

    pub fn view(&self) -> JobView {
        let p = self.lock();
        JobView {
            id: self.id,
            owner: self.owner,
            display_name: self.display_name().to_string(),
            state: p.state,
            paused: self.is_paused(),
            downloaded: self.downloaded(),
            total: self.total(),
            resume_offset: self.resume_offset,
            speed: p.speed,
            eta: p.eta,
            note: p.note.clone(),
            cancel_reason: p.cancel_reason,
            final_path: self.final_path.clone(),
        }
    }
}
