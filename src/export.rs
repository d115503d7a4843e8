//! High-level pipeline: list → filter & name → bounded download → archive → tally, per category.
//!
//! [`export_all`] drives one generic pipeline per [`RecordKind`], invoices first, then receipts.
//! Each category owns its archive and aggregator for the duration of its run; the download
//! semaphore is shared by both.
//!
//! # Failure handling
//! Under [`FailurePolicy::Abort`] the first failed task fails the category: in-flight siblings are
//! dropped, the partial archive is removed and the run stops before the next category.
//! Under [`FailurePolicy::Skip`] failed downloads are reported in [`CategoryReport::skipped`] and the
//! archive is finalized with every success. Archive-sink failures are fatal under both policies.
//!
//! # Ordering
//! Tasks are submitted in the order the source returned the records. Entries may land in the
//! archive in any order, but a record is only tallied after its entry is written.

use futures::future::{join_all, try_join_all};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::archive::{AppendError, ArchiveWriter};
use crate::config::{ExportConfig, FailurePolicy};
use crate::contract::{DocumentFetcher, ExportEvent, ExportObserver, RecordSource, TimeWindow};
use crate::download::BoundedDownloader;
use crate::error::ExportError;
use crate::record::{to_download_task, DownloadTask, RecordKind};
use crate::tally::{Aggregator, TallyReport};

#[derive(Debug, Clone)]
pub struct ExportReport {
    pub categories: Vec<CategoryReport>,
}

#[derive(Debug, Clone)]
pub struct CategoryReport {
    pub kind: RecordKind,
    pub archive_path: PathBuf,
    /// Records returned by the source.
    pub listed: usize,
    /// Records that passed the eligibility filter.
    pub eligible: usize,
    pub tally: TallyReport,
    pub skipped: Vec<SkippedRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub record_id: String,
    pub url: String,
    pub reason: String,
}

/// Logs every [`ExportEvent`] through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ExportObserver for TracingObserver {
    fn on_event(&self, event: &ExportEvent) {
        match event {
            ExportEvent::CategoryStarted { kind, archive_path } => {
                info!(kind = %kind, archive = %archive_path.display(), "[EXPORT] Category started")
            }
            ExportEvent::RecordsListed {
                kind,
                listed,
                eligible,
            } => info!(kind = %kind, listed, eligible, "[EXPORT] Records listed"),
            ExportEvent::DocumentArchived {
                kind,
                filename,
                amount,
            } => info!(kind = %kind, filename = %filename, amount, "[EXPORT] Document archived"),
            ExportEvent::DocumentSkipped {
                kind,
                record_id,
                reason,
            } => warn!(kind = %kind, record_id = %record_id, reason = %reason, "[EXPORT] Document skipped"),
            ExportEvent::CategoryFinished { report } => info!(
                kind = %report.kind,
                count = report.tally.count,
                total = %report.tally.formatted_total(),
                skipped = report.skipped.len(),
                archive = %report.archive_path.display(),
                "[EXPORT] Category finished"
            ),
            ExportEvent::ExportFinished => info!("[EXPORT] All categories exported"),
        }
    }
}

/// Entrypoint: export every category in order, stopping at the first failed category.
pub async fn export_all<S, F>(
    config: &ExportConfig,
    source: &S,
    fetcher: Arc<F>,
    observer: &dyn ExportObserver,
) -> Result<ExportReport, ExportError>
where
    S: RecordSource + ?Sized,
    F: DocumentFetcher + ?Sized,
{
    config.validate()?;
    let window = config.window.time_window()?;
    let downloader = BoundedDownloader::new(fetcher, config.max_concurrent_downloads)?;
    info!(
        from = window.from,
        to = window.to,
        max_concurrent_downloads = downloader.limit(),
        "[EXPORT] Starting export"
    );

    let mut categories = Vec::with_capacity(RecordKind::ALL.len());
    for kind in RecordKind::ALL {
        match export_category(kind, config, window, source, &downloader, observer).await {
            Ok(report) => categories.push(report),
            Err(e) => {
                error!(kind = %kind, error = %e, "[EXPORT][ERROR] Category failed, aborting run");
                return Err(e);
            }
        }
    }

    observer.on_event(&ExportEvent::ExportFinished);
    Ok(ExportReport { categories })
}

/// Runs the full pipeline for one category and returns its report.
pub async fn export_category<S, F>(
    kind: RecordKind,
    config: &ExportConfig,
    window: TimeWindow,
    source: &S,
    downloader: &BoundedDownloader<F>,
    observer: &dyn ExportObserver,
) -> Result<CategoryReport, ExportError>
where
    S: RecordSource + ?Sized,
    F: DocumentFetcher + ?Sized,
{
    let archive_path = config.output_dir.join(kind.archive_file_name());
    observer.on_event(&ExportEvent::CategoryStarted {
        kind,
        archive_path: archive_path.clone(),
    });

    // --- Step 1-2: output directory and archive sink ---
    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .map_err(|e| {
            error!(path = %config.output_dir.display(), error = ?e, "[EXPORT][ERROR] Failed to create output directory");
            ExportError::archive(&config.output_dir, e)
        })?;
    let archive = ArchiveWriter::create(&archive_path)
        .await
        .map_err(|e| ExportError::archive(&archive_path, e))?;

    // --- Step 3-4: list and filter ---
    let records = match source.list_records(kind, window, config.page_limit).await {
        Ok(records) => records,
        Err(e) => {
            abandon(archive).await;
            return Err(e);
        }
    };
    let tasks: Vec<DownloadTask> = records.iter().filter_map(to_download_task).collect();
    debug!(kind = %kind, listed = records.len(), eligible = tasks.len(), "[EXPORT] Filtered records");
    observer.on_event(&ExportEvent::RecordsListed {
        kind,
        listed: records.len(),
        eligible: tasks.len(),
    });

    // --- Step 5: download and archive ---
    let tally = Aggregator::new();
    let jobs = tasks
        .iter()
        .map(|task| archive_document(task, downloader, &archive, &tally, observer));

    let mut skipped = Vec::new();
    let outcome = match config.on_download_error {
        FailurePolicy::Abort => try_join_all(jobs).await.map(|_| ()),
        FailurePolicy::Skip => {
            let mut fatal = None;
            for (task, result) in tasks.iter().zip(join_all(jobs).await) {
                match result {
                    Ok(()) => {}
                    Err(e @ ExportError::DownloadFailed { .. }) => {
                        let reason = e.to_string();
                        observer.on_event(&ExportEvent::DocumentSkipped {
                            kind,
                            record_id: task.record_id.clone(),
                            reason: reason.clone(),
                        });
                        skipped.push(SkippedRecord {
                            record_id: task.record_id.clone(),
                            url: task.url.clone(),
                            reason,
                        });
                    }
                    Err(e) => {
                        fatal.get_or_insert(e);
                    }
                }
            }
            fatal.map_or(Ok(()), Err)
        }
    };

    if let Err(e) = outcome {
        error!(kind = %kind, error = %e, "[EXPORT][ERROR] Category aborted");
        abandon(archive).await;
        return Err(e);
    }

    // --- Step 6-7: finalize and report ---
    archive
        .finalize()
        .await
        .map_err(|e| ExportError::archive(&archive_path, e))?;

    let report = CategoryReport {
        kind,
        archive_path,
        listed: records.len(),
        eligible: tasks.len(),
        tally: tally.report(),
        skipped,
    };
    observer.on_event(&ExportEvent::CategoryFinished {
        report: report.clone(),
    });
    Ok(report)
}

async fn archive_document<F>(
    task: &DownloadTask,
    downloader: &BoundedDownloader<F>,
    archive: &ArchiveWriter,
    tally: &Aggregator,
    observer: &dyn ExportObserver,
) -> Result<(), ExportError>
where
    F: DocumentFetcher + ?Sized,
{
    let mut download = downloader.fetch(task).await?;
    let appended = archive.append(&task.filename, &mut download.stream).await;
    drop(download);

    match appended {
        Ok(bytes) => {
            tally.record(task.amount);
            debug!(record_id = %task.record_id, filename = %task.filename, bytes, "[EXPORT] Record tallied");
            observer.on_event(&ExportEvent::DocumentArchived {
                kind: task.kind,
                filename: task.filename.clone(),
                amount: task.amount,
            });
            Ok(())
        }
        Err(AppendError::Source(e)) => Err(ExportError::DownloadFailed {
            record_id: task.record_id.clone(),
            url: task.url.clone(),
            cause: e.to_string(),
        }),
        Err(AppendError::Sink(e)) => Err(ExportError::archive(archive.path(), e)),
    }
}

async fn abandon(archive: ArchiveWriter) {
    let path = archive.path().to_path_buf();
    if let Err(e) = archive.abandon().await {
        warn!(path = %path.display(), error = %e, "[EXPORT] Could not remove incomplete archive");
    }
}
