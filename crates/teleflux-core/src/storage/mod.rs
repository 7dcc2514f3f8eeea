//! Artifact files on disk: in-progress naming, resume detection, atomic
//! promotion and duplicate-name resolution.
//!
//! A transfer to final path `X` writes into `X.downloading`. The presence of
//! that file when a job starts is the only resume signal; its size is the
//! resume offset.

mod artifact;
mod sanitize;

pub use artifact::ArtifactWriter;
pub use sanitize::{sanitize_file_name, validate_file_name};

use std::io;
use std::path::{Path, PathBuf};

/// Suffix of the in-progress artifact.
pub const TEMP_SUFFIX: &str = ".downloading";

/// Path of the in-progress artifact: appends `.downloading` to the final path
/// (e.g. `song.flac` → `song.flac.downloading`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Size of an existing in-progress artifact, or 0 when there is none.
pub async fn resume_offset(temp_path: &Path) -> io::Result<u64> {
    match tokio::fs::metadata(temp_path).await {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", temp_path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

/// Remove a partial artifact. Returns whether a file was removed.
pub async fn discard(temp_path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(temp_path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// First free name of the form `stem_N.ext` (N = 1, 2, ...) in `dir`.
/// Used by callers that want to keep an existing file instead of overwriting it.
pub fn next_available_name(dir: &Path, file_name: &str) -> String {
    let (stem, ext) = match file_name.rfind('.') {
        Some(i) if i > 0 => (&file_name[..i], &file_name[i..]),
        _ => (file_name, ""),
    };
    let mut n = 1u32;
    loop {
        let candidate = format!("{stem}_{n}{ext}");
        if !dir.join(&candidate).exists() {
            return candidate;
        }
        n += 1;
    }
}
