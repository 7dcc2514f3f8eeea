//! Speed and ETA derived from progress notifications, plus display helpers.
//!
//! Speed is the absolute-byte delta over the wall-clock delta since the
//! previous sample; ETA is remaining / speed. Both are `None` when unknown and
//! render as `-`.

use tokio::time::Instant;

const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * MIB;

/// Rolling speed estimate between consecutive progress notifications.
#[derive(Debug, Clone)]
pub struct SpeedMeter {
    last_bytes: u64,
    last_at: Instant,
}

impl SpeedMeter {
    /// Start measuring from `bytes` (the resume offset) at `now`.
    pub fn new(bytes: u64, now: Instant) -> Self {
        Self {
            last_bytes: bytes,
            last_at: now,
        }
    }

    /// Record the absolute byte count at `now`; returns bytes per second.
    pub fn sample(&mut self, bytes: u64, now: Instant) -> f64 {
        let dt = now
            .saturating_duration_since(self.last_at)
            .as_secs_f64()
            .max(1e-6);
        let db = bytes.saturating_sub(self.last_bytes) as f64;
        self.last_bytes = bytes;
        self.last_at = now;
        db / dt
    }

    /// Restart the window (after a pause) so paused time does not dilute speed.
    pub fn reset(&mut self, bytes: u64, now: Instant) {
        self.last_bytes = bytes;
        self.last_at = now;
    }
}

/// Seconds remaining, `None` when speed is not positive or the total is unknown.
pub fn eta_secs(total: u64, done: u64, speed: f64) -> Option<f64> {
    if total == 0 || speed <= 0.0 {
        return None;
    }
    Some(total.saturating_sub(done) as f64 / speed)
}

/// `2.50 MB/s` at or above 1 MiB/s, else `512.0 KB/s`; `-` when unknown.
pub fn format_speed(bytes_per_sec: Option<f64>) -> String {
    match bytes_per_sec {
        Some(bps) if bps > 0.0 => {
            let mb = bps / MIB;
            if mb >= 1.0 {
                format!("{mb:.2} MB/s")
            } else {
                format!("{:.1} KB/s", bps / 1024.0)
            }
        }
        _ => "-".to_string(),
    }
}

/// `42s`, `3m7s` or `2h15m`; `-` when unknown.
pub fn format_eta(secs: Option<f64>) -> String {
    let Some(secs) = secs.filter(|s| s.is_finite() && *s >= 0.0) else {
        return "-".to_string();
    };
    let s = secs as u64;
    if s < 60 {
        format!("{s}s")
    } else if s < 3600 {
        format!("{}m{}s", s / 60, s % 60)
    } else {
        format!("{}h{}m", s / 3600, (s % 3600) / 60)
    }
}

pub fn human_size(bytes: u64) -> String {
    let b = bytes as f64;
    if b >= GIB {
        format!("{:.2}GB", b / GIB)
    } else {
        format!("{:.2}MB", b / MIB)
    }
}

/// Shorten a name to `max_chars`, keeping the extension: `very_long_na....mkv`.
pub fn short_name(name: &str, max_chars: usize) -> String {
    let len = name.chars().count();
    if len <= max_chars {
        return name.to_string();
    }
    let (base, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    };
    let ext_len = ext.chars().count();
    let keep = max_chars.saturating_sub(ext_len + 3);
    if keep == 0 {
        return name.chars().take(max_chars).collect();
    }
    let head: String = base.chars().take(keep).collect();
    format!("{head}...{ext}")
}
