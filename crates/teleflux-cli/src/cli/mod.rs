//! CLI for the TeleFlux transfer orchestrator.

mod commands;
mod control_socket;
mod terminal;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use teleflux_core::{config, settings};

use commands::{run_cancel, run_concurrency, run_fetch, run_pause, run_status, FetchArgs};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "teleflux")]
#[command(about = "TeleFlux: concurrent, resumable transfers with a live dashboard", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Copy local files through the orchestrator, showing the dashboard until all finish.
    Fetch {
        /// Source files.
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Destination directory (default: config `download_dir`, then the current dir).
        #[arg(long, value_name = "DIR")]
        dest: Option<PathBuf>,

        /// Concurrency limit for this run (1-50).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,

        /// Owner key the jobs are grouped under.
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        owner: i64,

        /// If the destination file exists, save as `name_1.ext`, `name_2.ext`, ... instead of overwriting.
        #[arg(long)]
        rename: bool,
    },

    /// Toggle pause of a job in a running `fetch`.
    Pause {
        /// Job identifier.
        id: u64,
    },

    /// Cancel a job in a running `fetch`.
    Cancel {
        /// Job identifier.
        id: u64,
    },

    /// Show the status report of a running `fetch`.
    Status,

    /// Show or set the concurrency limit (persisted; applied to a running `fetch`).
    Concurrency {
        /// New limit (1-50).
        limit: Option<usize>,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let mut cfg = config::load_or_init()?;
        cfg.apply_env_overrides();
        let settings_path = settings::default_settings_path()?;
        let saved = settings::load_settings(&settings_path);
        if let Some(n) = saved.max_concurrent_downloads {
            cfg.max_concurrent_downloads = n;
        }
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Fetch {
                sources,
                dest,
                jobs,
                owner,
                rename,
            } => {
                let args = FetchArgs {
                    sources,
                    dest,
                    jobs,
                    owner,
                    rename,
                };
                run_fetch(&cfg, args).await?
            }
            CliCommand::Pause { id } => run_pause(id).await?,
            CliCommand::Cancel { id } => run_cancel(id).await?,
            CliCommand::Status => run_status(&cfg).await?,
            CliCommand::Concurrency { limit } => {
                run_concurrency(&cfg, &settings_path, limit).await?
            }
        }

        Ok(())
    }
}
