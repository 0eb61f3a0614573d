//! Archived artifact delivery.
//!
//! Resolves a run's `archived_file` to a readable file, decides how it should
//! be presented, and hands back a chunked byte stream that owns the file
//! handle. Dropping the stream closes the file.

pub mod content;

pub use content::{clean_display_name, content_type_for, Disposition};

use crate::models::PipelineRun;
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Maximum bytes per streamed chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Files larger than this are always sent as attachments.
pub const DEFAULT_INLINE_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Errors from artifact resolution.
#[derive(Debug)]
pub enum ArtifactError {
    /// No record, no archive path, or nothing on disk. Callers cannot tell which.
    NotFound(String),
    Forbidden(String),
    Io(std::io::Error),
}

impl std::fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "Artifact not found: {}", what),
            Self::Forbidden(path) => write!(f, "Artifact path not allowed: {}", path),
            Self::Io(e) => write!(f, "Artifact I/O error: {}", e),
        }
    }
}

impl std::error::Error for ArtifactError {}

impl From<std::io::Error> for ArtifactError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Presentation details for a resolved artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMeta {
    pub file_name: String,
    pub content_type: &'static str,
    pub disposition: Disposition,
    pub size: u64,
}

impl ArtifactMeta {
    pub fn content_disposition(&self) -> String {
        self.disposition.header_value(&self.file_name)
    }
}

/// An open artifact ready to be sent.
pub struct ArtifactStream {
    pub meta: ArtifactMeta,
    pub stream: ReaderStream<File>,
}

#[derive(Debug, Clone)]
pub struct ArtifactService {
    inline_max_bytes: u64,
    archive_root: Option<PathBuf>,
}

impl Default for ArtifactService {
    fn default() -> Self {
        Self::new(DEFAULT_INLINE_MAX_BYTES, None)
    }
}

impl ArtifactService {
    /// `archive_root`, when set, confines served files to that directory tree.
    pub fn new(inline_max_bytes: u64, archive_root: Option<PathBuf>) -> Self {
        Self {
            inline_max_bytes,
            archive_root,
        }
    }

    /// Resolve and open the archive for `run`.
    pub async fn open(&self, run: Option<&PipelineRun>) -> Result<ArtifactStream, ArtifactError> {
        let run = run.ok_or_else(|| ArtifactError::NotFound("no such run".to_string()))?;
        let stored = run
            .archived_file
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                ArtifactError::NotFound(format!("run {} has no archive", run.date_code))
            })?;

        let path = Path::new(stored);
        if !path.is_absolute() || path.components().any(|c| matches!(c, Component::ParentDir)) {
            warn!(date_code = %run.date_code, path = %stored, "Rejected archive path");
            return Err(ArtifactError::Forbidden(stored.to_string()));
        }

        let canonical = match tokio::fs::canonicalize(path).await {
            Ok(canonical) => canonical,
            Err(e) if is_missing(&e) => {
                return Err(ArtifactError::NotFound(stored.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(root) = &self.archive_root {
            let root = tokio::fs::canonicalize(root).await?;
            if !canonical.starts_with(&root) {
                warn!(
                    date_code = %run.date_code,
                    path = %canonical.display(),
                    "Archive path escapes archive root"
                );
                return Err(ArtifactError::Forbidden(stored.to_string()));
            }
        }

        let file = match File::open(&canonical).await {
            Ok(file) => file,
            Err(e) if is_missing(&e) => {
                return Err(ArtifactError::NotFound(stored.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(ArtifactError::NotFound(stored.to_string()));
        }

        // Named from the stored path so symlinked archives keep their public name.
        let file_name = content::display_name(stored);
        let content_type = content_type_for(&file_name);
        let size = metadata.len();
        let meta = ArtifactMeta {
            disposition: Disposition::for_content(content_type, size, self.inline_max_bytes),
            file_name,
            content_type,
            size,
        };
        debug!(
            date_code = %run.date_code,
            file_name = %meta.file_name,
            size,
            disposition = meta.disposition.as_str(),
            "Streaming archive"
        );

        Ok(ArtifactStream {
            meta,
            stream: ReaderStream::with_capacity(file, CHUNK_SIZE),
        })
    }
}

/// The path does not resolve to anything, including when a parent
/// component is a regular file.
fn is_missing(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}
