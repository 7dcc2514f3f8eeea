//! `teleflux fetch <SOURCE>...` – run one job per local file through the
//! orchestrator, print the dashboard, and serve the control socket until
//! every job has finished.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use teleflux_core::admission::{MAX_LIMIT, MIN_LIMIT};
use teleflux_core::config::FluxConfig;
use teleflux_core::control::default_control_socket_path;
use teleflux_core::job::{JobHandle, JobState};
use teleflux_core::storage::{next_available_name, sanitize_file_name};
use teleflux_core::transfer::{LocalFileClient, TargetSpec};
use teleflux_core::{Orchestrator, OwnerId};

use crate::cli::control_socket;
use crate::cli::terminal::TerminalSurface;

#[derive(Debug)]
pub struct FetchArgs {
    pub sources: Vec<PathBuf>,
    pub dest: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub owner: i64,
    pub rename: bool,
}

/// Build the target for one source file.
fn target_for(source: &Path, dest: &Path, rename: bool) -> Result<TargetSpec> {
    let meta = std::fs::metadata(source)
        .with_context(|| format!("cannot read source {}", source.display()))?;
    if !meta.is_file() {
        bail!("{} is not a regular file", source.display());
    }
    let raw_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name = sanitize_file_name(&raw_name);
    if name.is_empty() {
        bail!("cannot derive an output name from {}", source.display());
    }
    if rename && dest.join(&name).exists() {
        name = next_available_name(dest, &name);
    }
    Ok(TargetSpec::new(source.to_string_lossy(), dest, name, meta.len()).with_display_name(raw_name))
}

/// Print one line per job from its terminal state. Returns how many completed.
fn summarize(jobs: &[Arc<JobHandle>]) -> usize {
    let mut done = 0usize;
    for job in jobs {
        let state = job.state();
        if state == JobState::Completed {
            done += 1;
            println!("✅ #{} {}", job.id, job.final_path.display());
        } else {
            let note = job.view().note.map(|n| format!(" ({n})")).unwrap_or_default();
            println!("✗ #{} {} {state}{note}", job.id, job.final_path.display());
        }
    }
    done
}

pub async fn run_fetch(cfg: &FluxConfig, args: FetchArgs) -> Result<()> {
    let dest = match args.dest.or_else(|| cfg.download_dir.clone()) {
        Some(d) => d,
        None => std::env::current_dir()?,
    };
    tokio::fs::create_dir_all(&dest)
        .await
        .with_context(|| format!("create destination {}", dest.display()))?;

    let mut timings = cfg.timings();
    if let Some(n) = args.jobs {
        if !(MIN_LIMIT..=MAX_LIMIT).contains(&n) {
            bail!("--jobs must be between {MIN_LIMIT} and {MAX_LIMIT}, got {n}");
        }
        timings.max_concurrent = n;
    }

    let client = LocalFileClient::new(cfg.chunk_size).with_rate_limit(cfg.max_bytes_per_sec);
    let orch = Arc::new(Orchestrator::new(
        timings,
        Arc::new(client),
        Arc::new(TerminalSurface),
    ));
    let owner = OwnerId(args.owner);

    let socket_path = default_control_socket_path().ok();
    let listener = socket_path.as_ref().and_then(|path| {
        match control_socket::spawn_control_listener(Arc::clone(&orch), owner, path) {
            Ok(handle) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!("control socket unavailable: {:#}", e);
                None
            }
        }
    });

    let mut started: Vec<Arc<JobHandle>> = Vec::new();
    for source in &args.sources {
        let target = match target_for(source, &dest, args.rename) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("skipping {}: {:#}", source.display(), e);
                continue;
            }
        };
        match orch.start_job_handle(owner, target).await {
            Ok(job) => {
                println!("queued #{}: {}", job.id, job.final_path.display());
                started.push(job);
            }
            Err(e) => eprintln!("skipping {}: {}", source.display(), e),
        }
    }

    if !started.is_empty() {
        tokio::select! {
            _ = orch.wait_idle() => {}
            _ = tokio::signal::ctrl_c() => {
                println!("\ninterrupted, cancelling jobs...");
            }
        }
    }
    orch.shutdown().await;

    if let Some(handle) = listener {
        handle.abort();
    }
    if let Some(path) = socket_path {
        let _ = std::fs::remove_file(path);
    }

    let done = summarize(&started);
    tracing::info!(started = started.len(), completed = done, "fetch finished");
    if done < started.len() {
        bail!("{} of {} transfer(s) did not complete", started.len() - done, started.len());
    }
    Ok(())
}
