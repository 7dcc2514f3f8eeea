use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::admission::{MAX_LIMIT, MIN_LIMIT};

/// Status publisher and dashboard parameters (optional section in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Minimum interval between non-forced edits per owner.
    pub min_interval_ms: u64,
    /// Delay before retrying a transient (non rate-limit) edit failure.
    pub retry_delay_secs: f64,
    /// Delay after a terminal transition before the final refresh.
    pub final_refresh_delay_secs: f64,
    /// How long completed/cancelled rows stay on the dashboard.
    pub completed_grace_secs: f64,
    /// How long failed rows stay on the dashboard.
    pub failed_grace_secs: f64,
    /// History entries kept per owner.
    pub history_limit: usize,
    /// History entries shown on the dashboard.
    pub history_shown: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1500,
            retry_delay_secs: 2.0,
            final_refresh_delay_secs: 2.0,
            completed_grace_secs: 5.0,
            failed_grace_secs: 8.0,
            history_limit: 30,
            history_shown: 5,
        }
    }
}

/// Global configuration loaded from `~/.config/teleflux/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxConfig {
    /// Jobs transferring at the same time (1..=50).
    pub max_concurrent_downloads: usize,
    /// A downloading job with no progress for this long is cancelled as stalled.
    pub stall_timeout_secs: u64,
    /// How often the stall watchdog checks a job.
    pub watchdog_interval_secs: u64,
    /// Idle time before an owner's dashboard cleanup runs.
    pub cleanup_delay_secs: f64,
    /// Where `fetch` writes files (None = current directory).
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Read size of the local transfer client in bytes.
    pub chunk_size: usize,
    /// Optional pacing of the local transfer client in bytes per second.
    #[serde(default)]
    pub max_bytes_per_sec: Option<u64>,
    #[serde(default)]
    pub publisher: Option<PublisherConfig>,
}

impl Default for FluxConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            stall_timeout_secs: 180,
            watchdog_interval_secs: 5,
            cleanup_delay_secs: 5.0,
            download_dir: None,
            chunk_size: 256 * 1024,
            max_bytes_per_sec: None,
            publisher: None,
        }
    }
}

/// Engine timings and sizes, all resolved to concrete values.
#[derive(Debug, Clone, PartialEq)]
pub struct Timings {
    pub max_concurrent: usize,
    pub stall_timeout: Duration,
    pub watchdog_interval: Duration,
    pub cleanup_delay: Duration,
    pub publish_min_interval: Duration,
    pub publish_retry_delay: Duration,
    pub final_refresh_delay: Duration,
    pub completed_grace: Duration,
    pub failed_grace: Duration,
    pub history_limit: usize,
    pub history_shown: usize,
}

impl Default for Timings {
    fn default() -> Self {
        FluxConfig::default().timings()
    }
}

fn secs(s: f64) -> Duration {
    Duration::try_from_secs_f64(s).unwrap_or(Duration::ZERO)
}

impl FluxConfig {
    pub fn timings(&self) -> Timings {
        let publisher = self.publisher.clone().unwrap_or_default();
        Timings {
            max_concurrent: self.max_concurrent_downloads.clamp(MIN_LIMIT, MAX_LIMIT),
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
            watchdog_interval: Duration::from_secs(self.watchdog_interval_secs.max(1)),
            cleanup_delay: secs(self.cleanup_delay_secs),
            publish_min_interval: Duration::from_millis(publisher.min_interval_ms),
            publish_retry_delay: secs(publisher.retry_delay_secs),
            final_refresh_delay: secs(publisher.final_refresh_delay_secs),
            completed_grace: secs(publisher.completed_grace_secs),
            failed_grace: secs(publisher.failed_grace_secs),
            history_limit: publisher.history_limit.max(1),
            history_shown: publisher.history_shown,
        }
    }

    /// Apply `MAX_CONCURRENT_DOWNLOADS` and `DOWNLOAD_STALL_TIMEOUT_S` from
    /// `lookup`. Unparseable values are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("MAX_CONCURRENT_DOWNLOADS") {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.max_concurrent_downloads = n,
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid MAX_CONCURRENT_DOWNLOADS"),
            }
        }
        if let Some(raw) = lookup("DOWNLOAD_STALL_TIMEOUT_S") {
            match raw.trim().parse::<u64>() {
                Ok(n) => self.stall_timeout_secs = n,
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid DOWNLOAD_STALL_TIMEOUT_S"),
            }
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("teleflux")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FluxConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = FluxConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml).with_context(|| format!("write {}", path.display()))?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FluxConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
