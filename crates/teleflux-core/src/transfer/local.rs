//! Transfer client that streams a file from the local filesystem.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{source_path, TargetSpec, TransferClient, TransferError, TransferStream};

/// Default read size.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Reads `target.source` as a path, starting at the resume offset.
/// An optional byte-rate cap paces the stream so progress is visible.
#[derive(Debug, Clone)]
pub struct LocalFileClient {
    chunk_size: usize,
    max_bytes_per_sec: Option<u64>,
}

impl Default for LocalFileClient {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl LocalFileClient {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            max_bytes_per_sec: None,
        }
    }

    pub fn with_rate_limit(mut self, max_bytes_per_sec: Option<u64>) -> Self {
        self.max_bytes_per_sec = max_bytes_per_sec.filter(|&r| r > 0);
        self
    }
}

#[async_trait]
impl TransferClient for LocalFileClient {
    async fn open(
        &self,
        target: &TargetSpec,
        offset: u64,
    ) -> Result<Box<dyn TransferStream>, TransferError> {
        let path = source_path(target);
        let mut file = File::open(path).await?;
        let len = file.metadata().await?.len();
        if offset > len {
            return Err(TransferError::Protocol(format!(
                "resume offset {offset} beyond source size {len}"
            )));
        }
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        tracing::debug!(source = %path.display(), offset, len, "local source opened");
        Ok(Box::new(LocalFileStream {
            file,
            buf: vec![0u8; self.chunk_size],
            pace: self
                .max_bytes_per_sec
                .map(|rate| Duration::from_secs_f64(self.chunk_size as f64 / rate as f64)),
        }))
    }
}

struct LocalFileStream {
    file: File,
    buf: Vec<u8>,
    pace: Option<Duration>,
}

#[async_trait]
impl TransferStream for LocalFileStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransferError> {
        if let Some(pace) = self.pace {
            tokio::time::sleep(pace).await;
        }
        let n = self.file.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf[..n].to_vec()))
    }
}
