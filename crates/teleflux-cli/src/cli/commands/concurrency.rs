//! `teleflux concurrency [N]` – show or persist the concurrency limit and
//! apply it to a running `fetch`.

use anyhow::{bail, Result};
use std::path::Path;
use teleflux_core::admission::{MAX_LIMIT, MIN_LIMIT};
use teleflux_core::config::FluxConfig;
use teleflux_core::settings;

use crate::cli::control_socket;

pub async fn run_concurrency(cfg: &FluxConfig, settings_path: &Path, limit: Option<usize>) -> Result<()> {
    let Some(n) = limit else {
        println!("concurrency limit: {}", cfg.timings().max_concurrent);
        if let Some(report) = control_socket::send_default("status").await? {
            if let Some(line) = report.lines().find(|l| l.starts_with("concurrency:")) {
                println!("running fetch: {}", line.trim_start_matches("concurrency:").trim());
            }
        }
        return Ok(());
    };

    if !(MIN_LIMIT..=MAX_LIMIT).contains(&n) {
        bail!("concurrency must be between {MIN_LIMIT} and {MAX_LIMIT}, got {n}");
    }
    let mut saved = settings::load_settings(settings_path);
    saved.max_concurrent_downloads = Some(n);
    settings::save_settings(settings_path, &saved)?;
    tracing::info!(limit = n, "concurrency limit persisted");

    match control_socket::send_default(&format!("limit {n}")).await? {
        Some(reply) => println!("{reply}"),
        None => println!("concurrency limit saved: {n} (applies to the next fetch)"),
    }
    Ok(())
}
