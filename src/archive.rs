//! Archive writer: one zip file fed by many concurrent producers.
//!
//! `zip::ZipWriter` cannot take concurrent entry writes, so a single writer running on a blocking
//! thread owns it. Producers submit an entry over a bounded command channel and then pump their
//! byte stream through a small bounded per-entry channel. Only a handful of chunks per entry are
//! ever buffered, however large the documents.
//!
//! An entry whose producer reports a stream error, or disappears without signalling the end of
//! the entry, is discarded with `ZipWriter::abort_file`. A sink-level failure (disk full, closed
//! file) stops the writer from accepting further entries and makes [`ArchiveWriter::finalize`]
//! fail.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Entries that may queue up behind the one being written.
const COMMAND_BUFFER: usize = 64;
/// Chunks buffered per entry before the producer is made to wait.
const ENTRY_BUFFER_CHUNKS: usize = 8;
const DEFLATE_LEVEL: i64 = 9;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("entry discarded: {0}")]
    EntryAborted(String),

    #[error("archive writer stopped after an earlier failure: {0}")]
    Poisoned(String),

    #[error("archive writer is no longer running")]
    WriterGone,

    #[error("archive writer panicked: {0}")]
    WriterPanicked(String),
}

/// Why an [`ArchiveWriter::append`] did not produce an entry.
#[derive(Debug, Error)]
pub enum AppendError {
    /// The document stream itself failed; the archive is intact.
    #[error("document stream failed: {0}")]
    Source(std::io::Error),

    #[error(transparent)]
    Sink(#[from] ArchiveError),
}

/// What a finalized archive contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub entries: usize,
    /// Uncompressed bytes across all entries.
    pub bytes: u64,
}

enum EntryChunk {
    Data(Bytes),
    End,
    Failed(String),
}

struct AppendEntry {
    name: String,
    chunks: mpsc::Receiver<EntryChunk>,
    done: oneshot::Sender<Result<u64, ArchiveError>>,
}

pub struct ArchiveWriter {
    path: PathBuf,
    entries: mpsc::Sender<AppendEntry>,
    writer: JoinHandle<Result<ArchiveSummary, ArchiveError>>,
}

impl ArchiveWriter {
    /// Creates (or truncates) the archive file and starts the writer.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let path = path.into();
        let file = tokio::fs::File::create(&path).await?.into_std().await;
        info!(path = %path.display(), "[ARCHIVE] Created archive file");

        let (entries, rx) = mpsc::channel(COMMAND_BUFFER);
        let writer_path = path.clone();
        let writer = tokio::task::spawn_blocking(move || run_writer(file, writer_path, rx));
        Ok(Self {
            path,
            entries,
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Streams `body` into a new entry called `name`.
    ///
    /// Resolves once the writer has written the whole entry, returning its uncompressed size.
    pub async fn append<S>(&self, name: &str, mut body: S) -> Result<u64, AppendError>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Unpin,
    {
        let (chunk_tx, chunks) = mpsc::channel(ENTRY_BUFFER_CHUNKS);
        let (done, done_rx) = oneshot::channel();
        self.entries
            .send(AppendEntry {
                name: name.to_string(),
                chunks,
                done,
            })
            .await
            .map_err(|_| ArchiveError::WriterGone)?;

        while let Some(item) = body.next().await {
            match item {
                Ok(bytes) => {
                    // A closed channel means the writer gave up on this entry; its reason
                    // arrives on `done_rx`.
                    if chunk_tx.send(EntryChunk::Data(bytes)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = chunk_tx.send(EntryChunk::Failed(e.to_string())).await;
                    return Err(AppendError::Source(e));
                }
            }
        }
        let _ = chunk_tx.send(EntryChunk::End).await;

        match done_rx.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ArchiveError::WriterGone.into()),
        }
    }

    /// Writes the central directory and closes the file.
    pub async fn finalize(self) -> Result<ArchiveSummary, ArchiveError> {
        let ArchiveWriter {
            path,
            entries,
            writer,
        } = self;
        drop(entries);
        let summary = writer
            .await
            .map_err(|e| ArchiveError::WriterPanicked(e.to_string()))??;
        info!(
            path = %path.display(),
            entries = summary.entries,
            bytes = summary.bytes,
            "[ARCHIVE] Finalized archive"
        );
        Ok(summary)
    }

    /// Stops the writer and deletes the incomplete archive file.
    pub async fn abandon(self) -> Result<(), ArchiveError> {
        let ArchiveWriter {
            path,
            entries,
            writer,
        } = self;
        drop(entries);
        if let Err(e) = writer.await {
            warn!(path = %path.display(), error = %e, "[ARCHIVE] Writer ended abnormally while abandoning");
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                warn!(path = %path.display(), "[ARCHIVE] Removed incomplete archive");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn run_writer(
    file: File,
    path: PathBuf,
    mut entries: mpsc::Receiver<AppendEntry>,
) -> Result<ArchiveSummary, ArchiveError> {
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(DEFLATE_LEVEL));

    let mut count = 0usize;
    let mut total_bytes = 0u64;
    let mut failure: Option<String> = None;

    while let Some(AppendEntry {
        name,
        mut chunks,
        done,
    }) = entries.blocking_recv()
    {
        if let Some(cause) = &failure {
            let _ = done.send(Err(ArchiveError::Poisoned(cause.clone())));
            continue;
        }

        let result = write_entry(&mut zip, &name, options, &mut chunks);
        match &result {
            Ok(bytes) => {
                count += 1;
                total_bytes += bytes;
                debug!(entry = %name, bytes, "[ARCHIVE] Entry written");
            }
            Err(ArchiveError::EntryAborted(reason)) => {
                warn!(entry = %name, reason = %reason, "[ARCHIVE] Entry discarded");
            }
            Err(e) => {
                error!(entry = %name, error = %e, path = %path.display(), "[ARCHIVE][ERROR] Sink failure");
                failure = Some(e.to_string());
            }
        }
        // Dropping the receiver before replying lets a still-pumping producer notice.
        drop(chunks);
        let _ = done.send(result);
    }

    if let Some(cause) = failure {
        return Err(ArchiveError::Poisoned(cause));
    }
    let mut file = zip.finish()?;
    file.flush()?;
    file.sync_all()?;
    Ok(ArchiveSummary {
        path,
        entries: count,
        bytes: total_bytes,
    })
}

fn write_entry(
    zip: &mut ZipWriter<File>,
    name: &str,
    options: SimpleFileOptions,
    chunks: &mut mpsc::Receiver<EntryChunk>,
) -> Result<u64, ArchiveError> {
    zip.start_file(name, options)?;
    let mut written = 0u64;
    loop {
        match chunks.blocking_recv() {
            Some(EntryChunk::Data(bytes)) => {
                zip.write_all(&bytes)?;
                written += bytes.len() as u64;
            }
            Some(EntryChunk::End) => return Ok(written),
            Some(EntryChunk::Failed(reason)) => {
                zip.abort_file()?;
                return Err(ArchiveError::EntryAborted(reason));
            }
            None => {
                zip.abort_file()?;
                return Err(ArchiveError::EntryAborted(
                    "producer stopped before the end of the entry".into(),
                ));
            }
        }
    }
}
