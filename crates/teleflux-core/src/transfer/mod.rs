//! Transfer seam: what to fetch, and the client that streams it.
//!
//! The orchestrator does not know how bytes travel. It hands a [`TargetSpec`]
//! and a resume offset to a [`TransferClient`] and pulls chunks from the
//! returned [`TransferStream`] until it ends.

mod local;

pub use local::LocalFileClient;

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::error::OrchestratorError;
use crate::storage;

/// Description of one transfer: where the bytes come from and where they land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    /// Opaque source handed to the transfer client (a path, a message id, ...).
    pub source: String,
    pub dest_dir: PathBuf,
    pub file_name: String,
    /// Expected size in bytes; 0 when unknown.
    pub total_bytes: u64,
    pub display_name: Option<String>,
}

impl TargetSpec {
    pub fn new(
        source: impl Into<String>,
        dest_dir: impl Into<PathBuf>,
        file_name: impl Into<String>,
        total_bytes: u64,
    ) -> Self {
        Self {
            source: source.into(),
            dest_dir: dest_dir.into(),
            file_name: file_name.into(),
            total_bytes,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Name shown on the dashboard: the display name if set, else the file name.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.file_name)
    }

    /// Final output path, or `InvalidTarget` when the target cannot produce one.
    pub fn final_path(&self) -> Result<PathBuf, OrchestratorError> {
        if self.dest_dir.as_os_str().is_empty() {
            return Err(OrchestratorError::InvalidTarget(
                "destination directory is empty".to_string(),
            ));
        }
        storage::validate_file_name(&self.file_name)
            .map_err(|reason| OrchestratorError::InvalidTarget(reason.to_string()))?;
        Ok(self.dest_dir.join(&self.file_name))
    }
}

/// Unrecoverable transfer failure. Ends the job in `failed` with the partial
/// artifact kept.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The source refused or lost the object.
    #[error("source error: {0}")]
    Source(String),

    /// Unexpected data or framing from the source.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The stream ended before the expected total.
    #[error("stream ended after {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },
}

impl TransferError {
    /// Short user-visible reason; never the raw message.
    pub fn short_label(&self) -> &'static str {
        match self {
            TransferError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => "not found",
                io::ErrorKind::PermissionDenied => "permission denied",
                _ if e.raw_os_error() == Some(28) => "disk full",
                _ => "io error",
            },
            TransferError::Source(_) => "source error",
            TransferError::Protocol(_) => "protocol error",
            TransferError::Incomplete { .. } => "incomplete",
        }
    }
}

/// Opens a byte stream for a target starting at an arbitrary offset.
#[async_trait]
pub trait TransferClient: Send + Sync {
    async fn open(
        &self,
        target: &TargetSpec,
        offset: u64,
    ) -> Result<Box<dyn TransferStream>, TransferError>;
}

/// Pull-based chunk stream. `Ok(None)` marks the end. Dropping the stream
/// aborts the transfer.
#[async_trait]
pub trait TransferStream: Send {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransferError>;
}

/// Path of the source for clients that read local files.
pub(crate) fn source_path(target: &TargetSpec) -> &Path {
    Path::new(&target.source)
}
