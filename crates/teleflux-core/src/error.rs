//! Error types surfaced by the orchestrator's public operations.

use thiserror::Error;

use crate::ids::JobId;

/// Errors returned synchronously to callers of the orchestrator.
///
/// Job-level failures never show up here: they end in the job's own
/// terminal state and history entry.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The target cannot produce a valid output path.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Requested concurrency limit is outside the supported range.
    #[error("concurrency limit {requested} outside supported range {min}..={max}")]
    InvalidLimit {
        requested: usize,
        min: usize,
        max: usize,
    },

    /// No live job with this id (never existed or already retired).
    #[error("unknown job {0}")]
    UnknownJob(JobId),

    /// The job already reached a terminal state.
    #[error("job {0} already finished")]
    JobFinished(JobId),
}
