//! Line-based control commands for a running orchestrator.
//!
//! A control client (e.g. `teleflux pause 3` over the control socket) sends
//! one line such as `pause 3`, `cancel 3`, `status`, `limit 5` or `refresh`.
//! The same action strings are used by dashboard buttons.

use std::fmt;
use std::path::PathBuf;

use crate::ids::{JobId, OwnerId};
use crate::job::{CancelRequest, PauseToggle};
use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause(JobId),
    Cancel(JobId),
    Status,
    Limit(usize),
    Refresh,
}

/// Why a control line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCommandError(String);

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseCommandError {}

impl ControlCommand {
    pub fn parse(line: &str) -> Result<Self, ParseCommandError> {
        let mut parts = line.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| ParseCommandError("empty command".to_string()))?;
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(ParseCommandError(format!("too many arguments: {line}")));
        }
        let job_id = |arg: Option<&str>| -> Result<JobId, ParseCommandError> {
            arg.ok_or_else(|| ParseCommandError(format!("{verb} needs a job id")))?
                .parse()
                .map_err(|_| ParseCommandError(format!("invalid job id for {verb}")))
        };
        match verb.to_ascii_lowercase().as_str() {
            "pause" => Ok(ControlCommand::Pause(job_id(arg)?)),
            "cancel" => Ok(ControlCommand::Cancel(job_id(arg)?)),
            "status" => Ok(ControlCommand::Status),
            "refresh" => Ok(ControlCommand::Refresh),
            "limit" => {
                let n = arg
                    .ok_or_else(|| ParseCommandError("limit needs a number".to_string()))?
                    .parse()
                    .map_err(|_| ParseCommandError("limit must be a whole number".to_string()))?;
                Ok(ControlCommand::Limit(n))
            }
            other => Err(ParseCommandError(format!("unknown command: {other}"))),
        }
    }

    /// Apply to `orchestrator` on behalf of `owner`. Returns the reply line(s).
    pub async fn apply(self, orchestrator: &Orchestrator, owner: OwnerId) -> String {
        match self {
            ControlCommand::Pause(id) => match orchestrator.toggle_pause(id).await {
                Ok(PauseToggle::Paused) => format!("job {id} paused"),
                Ok(PauseToggle::Resumed) => format!("job {id} resumed"),
                Ok(PauseToggle::Ignored) => format!("job {id} is being cancelled"),
                Err(e) => e.to_string(),
            },
            ControlCommand::Cancel(id) => match orchestrator.cancel_job(id).await {
                Ok(CancelRequest::AlreadyCancelling) => format!("job {id} already cancelling"),
                Ok(_) => format!("job {id} cancelling"),
                Err(e) => e.to_string(),
            },
            ControlCommand::Status => orchestrator.status_report(owner),
            ControlCommand::Limit(n) => match orchestrator.set_concurrency_limit(n) {
                Ok(previous) => format!(
                    "concurrency limit {previous} -> {n} (applies to new admissions; running jobs continue)"
                ),
                Err(e) => e.to_string(),
            },
            ControlCommand::Refresh => {
                let outcome = orchestrator.refresh(owner).await;
                format!("refresh: {outcome:?}")
            }
        }
    }
}

/// Default path for the control socket (XDG state dir).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("teleflux")?.get_state_home();
    Ok(dir.join("control.sock"))
}
