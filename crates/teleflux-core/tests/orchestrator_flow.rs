//! Integration tests: full job flows through the orchestrator with a scripted
//! transfer client and a recording surface, writing real artifacts to a temp dir.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::Semaphore;

use common::scripted::{Script, ScriptedClient};
use common::surface::RecordingSurface;
use common::{fast_timings, wait_for};
use teleflux_core::job::{CancelReason, CancelRequest, JobState, PauseToggle};
use teleflux_core::storage;
use teleflux_core::transfer::TargetSpec;
use teleflux_core::{Orchestrator, OrchestratorError, OwnerId};

const OWNER: OwnerId = OwnerId(42);

fn body(n: usize) -> Vec<u8> {
    (0u8..=250).cycle().take(n).collect()
}

fn setup(limit: usize) -> (Orchestrator, Arc<ScriptedClient>, Arc<RecordingSurface>) {
    let client = Arc::new(ScriptedClient::default());
    let surface = Arc::new(RecordingSurface::default());
    let orch = Orchestrator::new(fast_timings(limit), client.clone(), surface.clone());
    (orch, client, surface)
}

fn target(dir: &std::path::Path, source: &str, name: &str, total: usize) -> TargetSpec {
    TargetSpec::new(source, dir, name, total as u64)
}

#[tokio::test]
async fn limit_two_admits_two_and_queues_the_third() {
    let dir = tempdir().unwrap();
    let (orch, client, _surface) = setup(2);
    let gate = Arc::new(Semaphore::new(0));
    for src in ["a", "b", "c"] {
        client.add(src, Script::new(body(16)).hold_end(gate.clone()));
    }

    let mut ids = Vec::new();
    for src in ["a", "b", "c"] {
        let name = format!("{src}.bin");
        ids.push(orch.start_job(OWNER, target(dir.path(), src, &name, 16)).await.unwrap());
    }

    let count = |state: JobState| {
        orch.jobs(OWNER).iter().filter(|v| v.state == state).count()
    };
    wait_for("two downloading", || count(JobState::Downloading) == 2).await;
    assert_eq!(count(JobState::Queued), 1);
    assert_eq!(orch.concurrency(), (2, 2));
    assert_eq!(orch.snapshot().active.get(&OWNER), Some(&3));

    gate.add_permits(1);
    wait_for("one completed", || count(JobState::Completed) == 1).await;
    wait_for("third admitted", || count(JobState::Queued) == 0).await;
    assert!(orch.concurrency().0 <= 2);

    gate.add_permits(2);
    orch.wait_idle().await;
    for src in ["a", "b", "c"] {
        let content = std::fs::read(dir.path().join(format!("{src}.bin"))).unwrap();
        assert_eq!(content, body(16));
    }
    assert_eq!(orch.concurrency(), (0, 2));
    assert!(orch.jobs(OWNER).is_empty(), "retired after grace");
    assert_eq!(orch.snapshot().active.get(&OWNER), Some(&0));
}

#[tokio::test]
async fn completed_job_promotes_artifact_and_records_history() {
    let dir = tempdir().unwrap();
    let (orch, client, surface) = setup(3);
    client.add("src", Script::new(body(100)).chunk(7));

    let id = orch
        .start_job(OWNER, target(dir.path(), "src", "movie.mkv", 100))
        .await
        .unwrap();
    wait_for("completed", || {
        orch.job(id).is_some_and(|v| v.state == JobState::Completed)
    })
    .await;
    let view = orch.job(id).unwrap();
    assert_eq!(view.downloaded, 100);
    assert_eq!(view.speed, None);

    let final_path = dir.path().join("movie.mkv");
    assert_eq!(std::fs::read(&final_path).unwrap(), body(100));
    assert!(!storage::temp_path(&final_path).exists());

    orch.wait_idle().await;
    assert!(orch.job(id).is_none());
    let texts: Vec<_> = surface.edits_for(OWNER).into_iter().map(|r| r.text).collect();
    assert!(texts.iter().any(|t| t.contains("✅ completed | movie.mkv")));
    assert!(texts.last().unwrap().contains("• ✅ completed - movie.mkv"));
}

#[tokio::test]
async fn transfer_error_fails_job_and_keeps_partial() {
    let dir = tempdir().unwrap();
    let (orch, client, _surface) = setup(3);
    client.add("src", Script::new(body(40)).fail_after(12));

    let id = orch
        .start_job(OWNER, target(dir.path(), "src", "f.bin", 40))
        .await
        .unwrap();
    wait_for("failed", || orch.job(id).is_some_and(|v| v.state == JobState::Failed)).await;
    let view = orch.job(id).unwrap();
    assert_eq!(view.note.as_deref(), Some("source error"));
    assert_eq!(view.cancel_reason, None);

    let final_path = dir.path().join("f.bin");
    assert!(!final_path.exists());
    let partial = std::fs::read(storage::temp_path(&final_path)).unwrap();
    assert_eq!(partial, body(12));
    orch.wait_idle().await;
}

#[tokio::test]
async fn short_stream_fails_as_incomplete() {
    let dir = tempdir().unwrap();
    let (orch, client, _surface) = setup(3);
    client.add("src", Script::new(body(12)));

    let id = orch
        .start_job(OWNER, target(dir.path(), "src", "short.bin", 20))
        .await
        .unwrap();
    wait_for("failed", || orch.job(id).is_some_and(|v| v.state == JobState::Failed)).await;
    assert_eq!(orch.job(id).unwrap().note.as_deref(), Some("incomplete"));
    let temp = storage::temp_path(&dir.path().join("short.bin"));
    assert_eq!(std::fs::metadata(&temp).unwrap().len(), 12);
    orch.wait_idle().await;
}

#[tokio::test]
async fn unknown_total_completes_at_end_of_stream() {
    let dir = tempdir().unwrap();
    let (orch, client, _surface) = setup(3);
    client.add("src", Script::new(body(33)));

    let id = orch
        .start_job(OWNER, target(dir.path(), "src", "u.bin", 0))
        .await
        .unwrap();
    wait_for("completed", || {
        orch.job(id).is_some_and(|v| v.state == JobState::Completed)
    })
    .await;
    assert_eq!(std::fs::read(dir.path().join("u.bin")).unwrap(), body(33));
    orch.wait_idle().await;
}

#[tokio::test]
async fn user_cancel_discards_partial() {
    let dir = tempdir().unwrap();
    let (orch, client, _surface) = setup(3);
    client.add("src", Script::new(body(50)).hang_after(8));

    let id = orch
        .start_job(OWNER, target(dir.path(), "src", "c.bin", 50))
        .await
        .unwrap();
    wait_for("8 bytes", || orch.job(id).is_some_and(|v| v.downloaded == 8)).await;
    let temp = storage::temp_path(&dir.path().join("c.bin"));
    assert!(temp.exists());

    assert_eq!(orch.cancel_job(id).await.unwrap(), CancelRequest::Accepted);
    let again = orch.cancel_job(id).await;
    assert!(matches!(
        again,
        Ok(CancelRequest::AlreadyCancelling) | Err(OrchestratorError::JobFinished(_))
    ));

    wait_for("cancelled", || {
        orch.job(id).is_some_and(|v| v.state == JobState::Cancelled)
    })
    .await;
    assert_eq!(orch.job(id).unwrap().cancel_reason, Some(CancelReason::User));
    assert!(!temp.exists());
    assert!(!dir.path().join("c.bin").exists());
    assert!(matches!(
        orch.toggle_pause(id).await,
        Err(OrchestratorError::JobFinished(_))
    ));
    orch.wait_idle().await;
}

#[tokio::test]
async fn cancel_while_queued_never_opens_the_transfer() {
    let dir = tempdir().unwrap();
    let (orch, client, _surface) = setup(1);
    client.add("busy", Script::new(body(10)).hang_after(2));
    client.add("waiting", Script::new(body(10)));

    let busy = orch
        .start_job(OWNER, target(dir.path(), "busy", "busy.bin", 10))
        .await
        .unwrap();
    let waiting = orch
        .start_job(OWNER, target(dir.path(), "waiting", "waiting.bin", 10))
        .await
        .unwrap();
    wait_for("busy downloading", || {
        orch.job(busy).is_some_and(|v| v.state == JobState::Downloading)
    })
    .await;
    assert_eq!(orch.job(waiting).unwrap().state, JobState::Queued);

    orch.cancel_job(waiting).await.unwrap();
    wait_for("waiting cancelled", || {
        orch.job(waiting).is_some_and(|v| v.state == JobState::Cancelled)
    })
    .await;
    assert!(client.opens().iter().all(|(src, _)| src != "waiting"));

    orch.cancel_job(busy).await.unwrap();
    orch.wait_idle().await;
}

#[tokio::test]
async fn existing_partial_resumes_from_its_size() {
    let dir = tempdir().unwrap();
    let (orch, client, _surface) = setup(3);
    let full = body(30);
    let final_path = dir.path().join("r.bin");
    std::fs::write(storage::temp_path(&final_path), &full[..10]).unwrap();
    client.add("src", Script::new(full.clone()).chunk(5));

    let id = orch
        .start_job(OWNER, target(dir.path(), "src", "r.bin", 30))
        .await
        .unwrap();
    let first = orch.job(id).unwrap();
    assert_eq!(first.resume_offset, 10);
    assert!(first.downloaded >= 10);

    wait_for("completed", || {
        orch.job(id).is_some_and(|v| v.state == JobState::Completed)
    })
    .await;
    assert_eq!(client.opens(), vec![("src".to_string(), 10)]);
    assert_eq!(std::fs::read(&final_path).unwrap(), full);
    orch.wait_idle().await;
}

#[tokio::test]
async fn stalled_job_fails_and_discards_partial() {
    let dir = tempdir().unwrap();
    let (orch, client, surface) = setup(3);
    client.add("src", Script::new(body(64)).hang_after(5));

    let id = orch
        .start_job(OWNER, target(dir.path(), "src", "s.bin", 64))
        .await
        .unwrap();
    wait_for("failed", || orch.job(id).is_some_and(|v| v.state == JobState::Failed)).await;
    let view = orch.job(id).unwrap();
    assert_eq!(view.note.as_deref(), Some("stalled"));
    assert_eq!(view.cancel_reason, Some(CancelReason::Stalled));
    assert!(!storage::temp_path(&dir.path().join("s.bin")).exists());
    assert!(surface
        .last_text(OWNER)
        .is_some_and(|t| t.contains("⚠️ failed - s.bin (stalled)")));
    orch.wait_idle().await;
}

#[tokio::test]
async fn pause_holds_progress_without_tripping_the_watchdog() {
    let dir = tempdir().unwrap();
    let (orch, client, _surface) = setup(3);
    client.add(
        "src",
        Script::new(body(40)).chunk(4).delay(Duration::from_millis(15)),
    );

    let id = orch
        .start_job(OWNER, target(dir.path(), "src", "p.bin", 40))
        .await
        .unwrap();
    wait_for("progress", || orch.job(id).is_some_and(|v| v.downloaded >= 8)).await;

    assert_eq!(orch.toggle_pause(id).await.unwrap(), PauseToggle::Paused);
    wait_for("paused", || orch.job(id).is_some_and(|v| v.state == JobState::Paused)).await;
    let held = orch.job(id).unwrap();
    assert_eq!(held.speed, None);
    assert_eq!(held.eta, None);

    // Longer than the stall timeout.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let still = orch.job(id).unwrap();
    assert_eq!(still.state, JobState::Paused);
    assert_eq!(still.downloaded, held.downloaded);
    assert_eq!(still.cancel_reason, None);

    assert_eq!(orch.toggle_pause(id).await.unwrap(), PauseToggle::Resumed);
    // Speed and ETA are recomputed from the first chunks after the resume.
    wait_for("speed after resume", || {
        orch.job(id).is_some_and(|v| {
            v.state == JobState::Downloading
                && v.downloaded > held.downloaded
                && v.speed.is_some()
                && v.eta.is_some()
        })
    })
    .await;

    wait_for("completed", || {
        orch.job(id).is_some_and(|v| v.state == JobState::Completed)
    })
    .await;
    assert_eq!(std::fs::read(dir.path().join("p.bin")).unwrap(), body(40));
    orch.wait_idle().await;
}

#[tokio::test]
async fn pause_during_a_hung_read_is_shown_and_resume_restarts_stall_clock() {
    let dir = tempdir().unwrap();
    let (orch, client, _surface) = setup(1);
    client.add("src", Script::new(body(64)).hang_after(5));

    let id = orch
        .start_job(OWNER, target(dir.path(), "src", "h.bin", 64))
        .await
        .unwrap();
    wait_for("first bytes", || orch.job(id).is_some_and(|v| v.downloaded == 5)).await;

    // The read is still pending; the pause must be visible anyway.
    assert_eq!(orch.toggle_pause(id).await.unwrap(), PauseToggle::Paused);
    wait_for("paused", || orch.job(id).is_some_and(|v| v.state == JobState::Paused)).await;

    tokio::time::sleep(Duration::from_millis(600)).await;
    let held = orch.job(id).unwrap();
    assert_eq!(held.state, JobState::Paused);
    assert_eq!(held.cancel_reason, None);
    assert_eq!(orch.concurrency(), (1, 1));

    assert_eq!(orch.toggle_pause(id).await.unwrap(), PauseToggle::Resumed);
    wait_for("failed", || orch.job(id).is_some_and(|v| v.state == JobState::Failed)).await;
    let view = orch.job(id).unwrap();
    assert_eq!(view.note.as_deref(), Some("stalled"));
    assert_eq!(view.cancel_reason, Some(CancelReason::Stalled));
    assert!(!storage::temp_path(&dir.path().join("h.bin")).exists());
    orch.wait_idle().await;
    assert_eq!(orch.concurrency(), (0, 1));
}

#[tokio::test]
async fn concurrency_limit_outside_range_is_rejected() {
    let (orch, _client, _surface) = setup(3);
    for bad in [0, 51] {
        assert!(matches!(
            orch.set_concurrency_limit(bad),
            Err(OrchestratorError::InvalidLimit { requested, min: 1, max: 50 }) if requested == bad
        ));
    }
    assert_eq!(orch.concurrency(), (0, 3));
    assert_eq!(orch.set_concurrency_limit(5).unwrap(), 3);
    assert_eq!(orch.concurrency(), (0, 5));
}

#[tokio::test]
async fn raising_the_limit_admits_queued_jobs() {
    let dir = tempdir().unwrap();
    let (orch, client, _surface) = setup(1);
    let gate = Arc::new(Semaphore::new(0));
    for src in ["x", "y"] {
        client.add(src, Script::new(body(8)).hold_end(gate.clone()));
        let name = format!("{src}.bin");
        orch.start_job(OWNER, target(dir.path(), src, &name, 8)).await.unwrap();
    }
    wait_for("one running", || orch.concurrency().0 == 1).await;
    assert_eq!(orch.snapshot().states.get(&JobState::Queued), Some(&1));

    orch.set_concurrency_limit(2).unwrap();
    wait_for("both running", || orch.concurrency().0 == 2).await;

    gate.add_permits(2);
    orch.wait_idle().await;
}

#[tokio::test]
async fn invalid_targets_are_rejected_without_side_effects() {
    let dir = tempdir().unwrap();
    let (orch, _client, _surface) = setup(3);
    for name in ["", "..", "a/b.bin"] {
        let err = orch
            .start_job(OWNER, target(dir.path(), "src", name, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTarget(_)));
    }
    assert!(orch.snapshot().active.get(&OWNER).is_none());
    assert!(orch.jobs(OWNER).is_empty());
}

#[tokio::test]
async fn duplicate_final_path_is_rejected_while_live() {
    let dir = tempdir().unwrap();
    let (orch, client, _surface) = setup(3);
    client.add("src", Script::new(body(8)).hang_after(0));
    let first = orch
        .start_job(OWNER, target(dir.path(), "src", "same.bin", 8))
        .await
        .unwrap();
    let err = orch
        .start_job(OWNER, target(dir.path(), "src", "same.bin", 8))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTarget(_)));
    orch.cancel_job(first).await.unwrap();
    orch.wait_idle().await;
}

#[tokio::test]
async fn unknown_job_is_reported() {
    let (orch, _client, _surface) = setup(3);
    let ghost = teleflux_core::JobId::from_raw(u64::MAX);
    assert!(matches!(
        orch.toggle_pause(ghost).await,
        Err(OrchestratorError::UnknownJob(_))
    ));
    assert!(matches!(
        orch.cancel_job(ghost).await,
        Err(OrchestratorError::UnknownJob(_))
    ));
}

#[tokio::test]
async fn idle_owner_gets_a_clean_panel() {
    let dir = tempdir().unwrap();
    let (orch, client, surface) = setup(3);
    client.add("src", Script::new(body(8)));

    orch.start_job(OWNER, target(dir.path(), "src", "i.bin", 8))
        .await
        .unwrap();
    orch.wait_idle().await;
    assert!(orch.snapshot().pending_cleanup.contains(&OWNER));

    wait_for("cleanup", || !orch.snapshot().pending_cleanup.contains(&OWNER)).await;
    wait_for("clean panel", || {
        surface
            .last_text(OWNER)
            .is_some_and(|t| t.contains("No active downloads.") && !t.contains("Recent"))
    })
    .await;
}

#[tokio::test]
async fn shutdown_cancels_running_jobs() {
    let dir = tempdir().unwrap();
    let (orch, client, _surface) = setup(3);
    client.add("src", Script::new(body(8)).hang_after(4));
    let id = orch
        .start_job(OWNER, target(dir.path(), "src", "z.bin", 8))
        .await
        .unwrap();
    wait_for("4 bytes", || orch.job(id).is_some_and(|v| v.downloaded == 4)).await;

    tokio::time::timeout(Duration::from_secs(2), orch.shutdown())
        .await
        .expect("shutdown finishes");
    assert!(orch.job(id).is_none());
    assert!(!storage::temp_path(&dir.path().join("z.bin")).exists());
}
