//! # contract: seams between the export pipeline and the outside world
//!
//! The pipeline talks to the payment processor through two traits and reports progress through a
//! third:
//! - [`RecordSource`] lists one page of billing records for a category and time window.
//! - [`DocumentFetcher`] performs the authenticated GET of a rendered document and hands back its
//!   body as a byte stream.
//! - [`ExportObserver`] receives [`ExportEvent`]s; presentation (console lines, banners) lives in
//!   the implementor, never in the pipeline.
//!
//! ## Mocking & Testing
//! - `RecordSource` and `DocumentFetcher` are annotated for `mockall`; the mocks are exported
//!   behind the default `test-export-mocks` feature so integration tests can use them.
//!
//! ## Implementors
//! - [`crate::stripe::StripeClient`] implements both network traits against the Stripe API.
//! - [`crate::export::TracingObserver`] logs every event through `tracing`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use std::path::PathBuf;

use crate::error::ExportError;
use crate::export::CategoryReport;
use crate::record::{BillingRecord, RecordKind};

/// Inclusive creation-time bounds, in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: i64,
    pub to: i64,
}

/// Body of a fetched document, chunk by chunk.
pub type DocumentStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Error type for DocumentFetcher (simple boxed error, wrapped with record context by the caller)
pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// Trait for listing billing records from the payment processor.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch a single page of at most `page_limit` records of `kind` created within `window`.
    ///
    /// Implementors map rejected credentials to [`ExportError::Authentication`] and every other
    /// failure to [`ExportError::SourceUnavailable`].
    async fn list_records(
        &self,
        kind: RecordKind,
        window: TimeWindow,
        page_limit: u32,
    ) -> Result<Vec<BillingRecord>, ExportError>;
}

/// Trait for retrieving a rendered document as a stream of bytes.
///
/// Concurrency limits are not the implementor's concern; see [`crate::download::BoundedDownloader`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// GET `url` and return its body. Non-success statuses are errors.
    async fn fetch(&self, url: &str) -> Result<DocumentStream, FetchError>;
}

/// Progress notifications emitted by the pipeline.
#[derive(Debug, Clone)]
pub enum ExportEvent {
    CategoryStarted {
        kind: RecordKind,
        archive_path: PathBuf,
    },
    RecordsListed {
        kind: RecordKind,
        listed: usize,
        eligible: usize,
    },
    DocumentArchived {
        kind: RecordKind,
        filename: String,
        amount: i64,
    },
    /// Only emitted under [`crate::config::FailurePolicy::Skip`].
    DocumentSkipped {
        kind: RecordKind,
        record_id: String,
        reason: String,
    },
    CategoryFinished {
        report: CategoryReport,
    },
    ExportFinished,
}

/// Sink for [`ExportEvent`]s. Called from concurrently running download futures.
pub trait ExportObserver: Send + Sync {
    fn on_event(&self, event: &ExportEvent);
}
