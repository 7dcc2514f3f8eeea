//! Stall watchdog: force-cancels a job whose byte counter stops moving.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::{JobHandle, JobState};

/// Spawn the watchdog for `job`. It checks every `interval`, trips once the
/// job has been downloading with an unchanged counter for at least
/// `threshold`, and exits after tripping, on cancellation, or once the job
/// is terminal.
pub fn spawn(job: Arc<JobHandle>, threshold: Duration, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(run(job, threshold, interval))
}

async fn run(job: Arc<JobHandle>, threshold: Duration, interval: Duration) {
    let token = job.cancel_token();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut baseline_bytes = job.downloaded();
    let mut baseline_at = Instant::now();

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let now = Instant::now();
        let state = job.state();
        if state.is_terminal() {
            return;
        }
        let bytes = job.downloaded();
        if state != JobState::Downloading || bytes != baseline_bytes {
            baseline_bytes = bytes;
            baseline_at = now;
            continue;
        }

        let since = baseline_at.max(job.last_progress_at());
        let idle = now.saturating_duration_since(since);
        if idle < threshold {
            continue;
        }
        if job.request_stall_cancel(bytes) {
            tracing::error!(
                job_id = %job.id,
                owner = %job.owner,
                idle_s = idle.as_secs(),
                downloaded = bytes,
                "no progress, cancelling stalled job"
            );
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{JobId, OwnerId};
    use crate::job::CancelReason;
    use crate::transfer::TargetSpec;
    use std::path::PathBuf;

    fn admitted_job() -> Arc<JobHandle> {
        let j = Arc::new(JobHandle::new(
            JobId::next(),
            OwnerId(1),
            TargetSpec::new("s", "/tmp", "x.bin", 1000),
            PathBuf::from("/tmp/x.bin"),
            0,
        ));
        j.mark_admitted(Instant::now());
        j
    }

    #[tokio::test(start_paused = true)]
    async fn trips_after_threshold_without_progress() {
        let j = admitted_job();
        let h = spawn(j.clone(), Duration::from_secs(180), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(170)).await;
        assert_eq!(j.state(), JobState::Downloading);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(j.state(), JobState::Cancelling);
        assert_eq!(j.cancel_reason(), Some(CancelReason::Stalled));
        assert!(j.cancel_token().is_cancelled());
        h.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn progress_keeps_it_quiet() {
        let j = admitted_job();
        let h = spawn(j.clone(), Duration::from_secs(30), Duration::from_secs(5));
        for i in 1..=20u64 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            j.record_progress(i * 10, 1.0, Instant::now());
        }
        assert_eq!(j.state(), JobState::Downloading);
        j.finish(JobState::Completed, None);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn paused_time_is_not_idle() {
        let j = admitted_job();
        let h = spawn(j.clone(), Duration::from_secs(30), Duration::from_secs(5));
        j.toggle_pause().unwrap();
        j.enter_pause();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(j.state(), JobState::Paused);

        j.toggle_pause().unwrap();
        j.leave_pause(Instant::now());
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(j.state(), JobState::Downloading, "resume restarts the idle clock");

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(j.cancel_reason(), Some(CancelReason::Stalled));
        h.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pause_flag_without_paused_state_still_trips() {
        let j = admitted_job();
        let h = spawn(j.clone(), Duration::from_secs(30), Duration::from_secs(5));
        // Nobody moves the job into `paused`, as with a read that never returns.
        j.toggle_pause().unwrap();
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(j.cancel_reason(), Some(CancelReason::Stalled));
        h.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn exits_on_user_cancel_without_tripping() {
        let j = admitted_job();
        let h = spawn(j.clone(), Duration::from_secs(30), Duration::from_secs(5));
        j.request_cancel(CancelReason::User);
        h.await.unwrap();
        assert_eq!(j.cancel_reason(), Some(CancelReason::User));
    }
}
