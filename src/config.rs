//! Export settings: output location, concurrency, reporting window and failure policy.
//!
//! Everything here is plain data with serde defaults so a YAML file may set any subset of keys.
//! The API secret is deliberately absent; it only ever comes from the environment
//! (see [`crate::load_config`]).

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::contract::TimeWindow;
use crate::download::DEFAULT_MAX_CONCURRENT_DOWNLOADS;
use crate::error::ExportError;

/// Largest page the list endpoints accept.
pub const MAX_PAGE_LIMIT: u32 = 100;
pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default = "WindowConfig::previous_month")]
    pub window: WindowConfig,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub on_download_error: FailurePolicy,
    /// Per-request timeout for the HTTP client. No timeout when unset.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./out")
}

fn default_max_concurrent_downloads() -> usize {
    DEFAULT_MAX_CONCURRENT_DOWNLOADS
}

fn default_page_limit() -> u32 {
    MAX_PAGE_LIMIT
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            page_limit: default_page_limit(),
            window: WindowConfig::previous_month(),
            api_base: default_api_base(),
            on_download_error: FailurePolicy::default(),
            request_timeout_secs: None,
        }
    }
}

impl ExportConfig {
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.max_concurrent_downloads == 0 {
            return Err(ExportError::Config(
                "max_concurrent_downloads must be at least 1".into(),
            ));
        }
        validate_page_limit(self.page_limit)?;
        if self.api_base.trim().is_empty() {
            return Err(ExportError::Config("api_base must not be empty".into()));
        }
        self.window.time_window()?;
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            output_dir = %self.output_dir.display(),
            max_concurrent_downloads = self.max_concurrent_downloads,
            page_limit = self.page_limit,
            from = %self.window.from,
            to = %self.window.to,
            policy = ?self.on_download_error,
            "Loaded ExportConfig"
        );
        debug!(?self, "ExportConfig loaded (full debug)");
    }
}

pub fn validate_page_limit(page_limit: u32) -> Result<(), ExportError> {
    if page_limit == 0 || page_limit > MAX_PAGE_LIMIT {
        return Err(ExportError::Config(format!(
            "page_limit must be between 1 and {MAX_PAGE_LIMIT}, got {page_limit}"
        )));
    }
    Ok(())
}

/// Reporting window as inclusive UTC calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl WindowConfig {
    pub fn previous_month() -> Self {
        Self::month_before(Utc::now().date_naive())
    }

    /// The full calendar month preceding the one `today` falls in.
    pub fn month_before(today: NaiveDate) -> Self {
        let first_of_month = today.with_day(1).unwrap_or(today);
        let to = first_of_month.pred_opt().unwrap_or(first_of_month);
        let from = to.with_day(1).unwrap_or(to);
        Self { from, to }
    }

    /// `from` at 00:00:00 UTC through `to` at 23:59:59 UTC.
    pub fn time_window(&self) -> Result<TimeWindow, ExportError> {
        if self.from > self.to {
            return Err(ExportError::Config(format!(
                "window starts ({}) after it ends ({})",
                self.from, self.to
            )));
        }
        let start = self
            .from
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| ExportError::Config(format!("invalid window start {}", self.from)))?;
        let end = self
            .to
            .and_hms_opt(23, 59, 59)
            .ok_or_else(|| ExportError::Config(format!("invalid window end {}", self.to)))?;
        Ok(TimeWindow {
            from: start.and_utc().timestamp(),
            to: end.and_utc().timestamp(),
        })
    }
}

/// What a failed document download does to its category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// First failure aborts the category and the partial archive is removed.
    #[default]
    Abort,
    /// Failed downloads are logged and left out; the archive keeps every success.
    Skip,
}
