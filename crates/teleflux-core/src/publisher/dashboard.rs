//! Default renderer: one panel per owner listing its live jobs with
//! pause/cancel controls and the recent history trail.

use std::fmt::Write as _;
use std::sync::Arc;

use super::surface::{Control, Rendered, Renderer};
use crate::ids::OwnerId;
use crate::job::progress::{format_eta, format_speed, human_size, short_name};
use crate::job::JobView;
use crate::orchestrator::Snapshot;
use crate::registry::JobRegistry;

const NAME_WIDTH: usize = 26;
const BAR_CELLS: usize = 10;
/// Job rows shown in the status report.
const REPORT_ROWS: usize = 5;

pub struct Dashboard {
    registry: Arc<JobRegistry>,
    history_shown: usize,
}

impl Dashboard {
    pub fn new(registry: Arc<JobRegistry>, history_shown: usize) -> Self {
        Self {
            registry,
            history_shown,
        }
    }
}

impl Renderer for Dashboard {
    fn render(&self, owner: OwnerId) -> Rendered {
        let views = self.registry.views(owner);
        let mut text = String::from("📥 Downloads\n\n");

        if views.is_empty() {
            text.push_str("No active downloads.\n");
        }
        for (idx, v) in views.iter().enumerate() {
            let _ = writeln!(
                text,
                "{}. {} | {}\n[{}] {:.1}%  ({} / {})\n⚡ {}   ⏱️ {}",
                idx + 1,
                v.state.label(),
                short_name(&v.display_name, NAME_WIDTH),
                progress_bar(v.percent()),
                v.percent(),
                human_size(v.downloaded),
                human_size(v.total),
                format_speed(v.speed),
                format_eta(v.eta),
            );
            text.push('\n');
        }

        let history = self.registry.recent_history(owner, self.history_shown);
        if !history.is_empty() {
            text.push_str("—\nRecent:\n");
            for h in &history {
                let _ = write!(text, "• {} - {}", h.status, h.name);
                if let Some(note) = &h.note {
                    let _ = write!(text, " ({note})");
                }
                text.push('\n');
            }
        }

        Rendered {
            text: text.trim_end().to_string(),
            controls: controls(&views),
        }
    }
}

fn progress_bar(percent: f64) -> String {
    let filled = ((percent / 100.0) * BAR_CELLS as f64).floor() as usize;
    let filled = filled.min(BAR_CELLS);
    format!("{}{}", "█".repeat(filled), "░".repeat(BAR_CELLS - filled))
}

/// One row per non-terminal job, then a refresh row.
fn controls(views: &[JobView]) -> Vec<Vec<Control>> {
    let mut rows = Vec::new();
    for (idx, v) in views.iter().enumerate() {
        if v.state.is_terminal() {
            continue;
        }
        let n = idx + 1;
        let pause_label = if v.paused {
            format!("▶️ {n}")
        } else {
            format!("⏸ {n}")
        };
        rows.push(vec![
            Control::new(pause_label, format!("pause {}", v.id)),
            Control::new(format!("❌ {n}"), format!("cancel {}", v.id)),
        ]);
    }
    rows.push(vec![Control::new("🔄 Refresh", "refresh")]);
    rows
}

/// Diagnostic text: version, admission, lifecycle counts, per-state counts
/// and a few rows for `owner`.
pub fn status_report(snapshot: &Snapshot, owner: OwnerId, views: &[JobView]) -> String {
    let owner_active = snapshot.active.get(&owner).copied().unwrap_or(0);
    let total_active: usize = snapshot.active.values().sum();

    let mut out = String::new();
    let _ = writeln!(out, "📊 TeleFlux status");
    let _ = writeln!(out, "version: v{}", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(out, "concurrency: {}/{}", snapshot.running, snapshot.limit);
    let _ = writeln!(out, "active jobs: this owner {owner_active} | all owners {total_active}");
    let _ = writeln!(out, "pending cleanup: {}", snapshot.pending_cleanup.len());
    out.push_str("\nstates:\n");
    if snapshot.states.is_empty() {
        out.push_str("- (no jobs)\n");
    }
    for (state, count) in &snapshot.states {
        let _ = writeln!(out, "- {state}: {count}");
    }
    out.push_str("\njobs:\n");
    if views.is_empty() {
        out.push_str("• (no live jobs for this owner)\n");
    }
    for v in views.iter().take(REPORT_ROWS) {
        let _ = writeln!(out, "• #{} {} | {} | {:.1}%", v.id, v.display_name, v.state, v.percent());
    }
    out.trim_end().to_string()
}
