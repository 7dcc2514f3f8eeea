//! `teleflux status` – print the status report of a running `fetch`.

use anyhow::Result;
use teleflux_core::config::FluxConfig;

use crate::cli::control_socket;

pub async fn run_status(cfg: &FluxConfig) -> Result<()> {
    match control_socket::send_default("status").await? {
        Some(report) => println!("{report}"),
        None => {
            println!("No running fetch.");
            println!("concurrency limit: {}", cfg.timings().max_concurrent);
        }
    }
    Ok(())
}
