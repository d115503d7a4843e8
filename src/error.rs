//! Error types for billing-export.
//!
//! [`ExportError`] is the taxonomy surfaced by the pipeline. Every variant carries the context
//! (record id, URL, archive path, cause) needed to diagnose a failed run from its output alone.

use std::path::PathBuf;
use thiserror::Error;

use crate::record::RecordKind;

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, ExportError>;

#[derive(Debug, Error)]
pub enum ExportError {
    /// Missing or rejected API credential. Never retried.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Listing records for a category could not complete.
    #[error("could not list {kind} records: {cause}")]
    SourceUnavailable { kind: RecordKind, cause: String },

    /// A single document fetch or transfer failed.
    #[error("download of record `{record_id}` from {url} failed: {cause}")]
    DownloadFailed {
        record_id: String,
        url: String,
        cause: String,
    },

    /// The archive sink failed (directory creation, file creation, write, finalize).
    #[error("archive write to {} failed: {cause}", .path.display())]
    ArchiveWrite { path: PathBuf, cause: String },

    /// Invalid settings detected before any work started.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ExportError {
    pub(crate) fn archive(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        ExportError::ArchiveWrite {
            path: path.into(),
            cause: cause.to_string(),
        }
    }
}
