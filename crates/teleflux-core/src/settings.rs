//! Runtime settings persisted as JSON under the XDG state dir, so a
//! concurrency limit changed from the CLI survives restarts.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    pub max_concurrent_downloads: Option<usize>,
}

impl RuntimeSettings {
    /// Lenient decode: unknown or mistyped fields are ignored, and the limit
    /// may be given as a number or a numeric string.
    fn from_value(value: &Value) -> Self {
        let mut settings = RuntimeSettings::default();
        let Some(obj) = value.as_object() else {
            return settings;
        };
        settings.max_concurrent_downloads = match obj.get("max_concurrent_downloads") {
            Some(Value::Number(n)) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
            Some(Value::String(s)) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                s.parse().ok()
            }
            _ => None,
        };
        settings
    }
}

/// `~/.local/state/teleflux/teleflux_settings.json`.
pub fn default_settings_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("teleflux")?;
    Ok(xdg_dirs.get_state_home().join("teleflux_settings.json"))
}

/// Load settings; a missing or unreadable file yields defaults (logged).
pub fn load_settings(path: &Path) -> RuntimeSettings {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return RuntimeSettings::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read settings");
            return RuntimeSettings::default();
        }
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => RuntimeSettings::from_value(&value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse settings");
            RuntimeSettings::default()
        }
    }
}

/// Write to `<path>.tmp` then rename over `path`.
pub fn save_settings(path: &Path, settings: &RuntimeSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir: {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let json = serde_json::to_string_pretty(settings).context("serialize settings")?;
    std::fs::write(&tmp, json).with_context(|| format!("write settings: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("replace settings: {}", path.display()))?;
    Ok(())
}
