//! Writer for the in-progress artifact of a single job.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Sequential writer for `X.downloading`. Opened in append mode when resuming
/// and truncated otherwise; `promote` renames it to the final path.
#[derive(Debug)]
pub struct ArtifactWriter {
    file: File,
    temp_path: PathBuf,
}

impl ArtifactWriter {
    /// Open the artifact for a transfer starting at `offset`. A non-zero offset
    /// means the existing partial file is kept and appended to.
    pub async fn open(temp_path: &Path, offset: u64) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        if offset > 0 {
            options.append(true);
        } else {
            options.write(true).create(true).truncate(true);
        }
        let file = options.open(temp_path).await?;
        Ok(Self {
            file,
            temp_path: temp_path.to_path_buf(),
        })
    }

    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data).await
    }

    /// Flush buffered data and sync it to disk.
    pub async fn sync(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }

    /// Sync, close, and atomically rename the artifact to `final_path`.
    /// Fails if `final_path` is on a different filesystem.
    pub async fn promote(mut self, final_path: &Path) -> io::Result<()> {
        self.sync().await?;
        let temp_path = self.temp_path.clone();
        drop(self.file);
        tokio::fs::rename(&temp_path, final_path).await
    }
}
