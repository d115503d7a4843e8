//! Bounded downloader: document fetches gated by a global semaphore.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error};

use crate::contract::{DocumentFetcher, DocumentStream};
use crate::error::ExportError;
use crate::record::DownloadTask;

/// Default ceiling on simultaneous in-flight downloads.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 20;

/// Wraps a [`DocumentFetcher`] so that at most `limit` downloads are outstanding at once.
///
/// Clones share the same semaphore, so one instance can serve several categories.
pub struct BoundedDownloader<F: ?Sized> {
    fetcher: Arc<F>,
    permits: Arc<Semaphore>,
    limit: usize,
}

impl<F: ?Sized> Clone for BoundedDownloader<F> {
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            permits: self.permits.clone(),
            limit: self.limit,
        }
    }
}

/// An in-flight document. Holds its concurrency slot until dropped.
pub struct Download {
    pub stream: DocumentStream,
    _permit: OwnedSemaphorePermit,
}

impl<F> BoundedDownloader<F>
where
    F: DocumentFetcher + ?Sized,
{
    pub fn new(fetcher: Arc<F>, limit: usize) -> Result<Self, ExportError> {
        if limit == 0 {
            return Err(ExportError::Config(
                "max_concurrent_downloads must be at least 1".into(),
            ));
        }
        Ok(Self {
            fetcher,
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots not currently held by a download.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Waits for a free slot, then starts fetching `task.url`.
    pub async fn fetch(&self, task: &DownloadTask) -> Result<Download, ExportError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ExportError::DownloadFailed {
                record_id: task.record_id.clone(),
                url: task.url.clone(),
                cause: format!("download slots closed: {e}"),
            })?;
        debug!(
            record_id = %task.record_id,
            url = %task.url,
            free_slots = self.permits.available_permits(),
            "[DOWNLOAD] Slot acquired"
        );

        match self.fetcher.fetch(&task.url).await {
            Ok(stream) => Ok(Download {
                stream,
                _permit: permit,
            }),
            Err(e) => {
                error!(record_id = %task.record_id, url = %task.url, error = %e, "[DOWNLOAD][ERROR] Fetch failed");
                Err(ExportError::DownloadFailed {
                    record_id: task.record_id.clone(),
                    url: task.url.clone(),
                    cause: e.to_string(),
                })
            }
        }
    }
}
