//! Billing record model plus the filter & namer that turns records into download tasks.
//!
//! [`RecordKind`] is the descriptor that parameterizes the whole pipeline: it knows the filename
//! label, the archive name and the upstream endpoint for its category. Everything in this module is
//! pure; identical records always produce identical tasks.

use chrono::DateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Category of billing record exported into its own archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Invoice,
    Receipt,
}

impl RecordKind {
    /// Processing order used by the orchestrator.
    pub const ALL: [RecordKind; 2] = [RecordKind::Invoice, RecordKind::Receipt];

    /// Label used inside entry filenames.
    pub fn label(self) -> &'static str {
        match self {
            RecordKind::Invoice => "invoice",
            RecordKind::Receipt => "receipt",
        }
    }

    pub fn archive_file_name(self) -> &'static str {
        match self {
            RecordKind::Invoice => "invoices.zip",
            RecordKind::Receipt => "receipts.zip",
        }
    }

    /// Path of the upstream list endpoint, relative to the API base.
    pub fn list_path(self) -> &'static str {
        match self {
            RecordKind::Invoice => "/v1/invoices",
            RecordKind::Receipt => "/v1/charges",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A paid-or-not invoice as returned by the list endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceRecord {
    pub id: String,
    pub created_at: i64,
    pub document_url: Option<String>,
    /// Invoice total in minor currency units.
    pub amount: i64,
    pub paid: bool,
}

/// A charge, whose receipt page is exported as the receipt document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRecord {
    pub id: String,
    pub created_at: i64,
    pub document_url: Option<String>,
    pub amount: i64,
    pub paid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingRecord {
    Invoice(InvoiceRecord),
    Charge(ChargeRecord),
}

impl BillingRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            BillingRecord::Invoice(_) => RecordKind::Invoice,
            BillingRecord::Charge(_) => RecordKind::Receipt,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            BillingRecord::Invoice(r) => &r.id,
            BillingRecord::Charge(r) => &r.id,
        }
    }

    pub fn created_at(&self) -> i64 {
        match self {
            BillingRecord::Invoice(r) => r.created_at,
            BillingRecord::Charge(r) => r.created_at,
        }
    }

    pub fn amount(&self) -> i64 {
        match self {
            BillingRecord::Invoice(r) => r.amount,
            BillingRecord::Charge(r) => r.amount,
        }
    }

    /// Document URL, treating an empty string the same as a missing one.
    pub fn document_url(&self) -> Option<&str> {
        let url = match self {
            BillingRecord::Invoice(r) => r.document_url.as_deref(),
            BillingRecord::Charge(r) => r.document_url.as_deref(),
        };
        url.filter(|u| !u.trim().is_empty())
    }

    pub fn is_eligible(&self) -> bool {
        match self {
            BillingRecord::Invoice(r) => r.amount > 0 && r.paid && self.document_url().is_some(),
            BillingRecord::Charge(r) => r.paid && self.document_url().is_some(),
        }
    }
}

/// One unit of work: fetch `url` and store it in the archive as `filename`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub record_id: String,
    pub kind: RecordKind,
    pub filename: String,
    pub url: String,
    pub amount: i64,
}

/// Filter & namer: `None` for ineligible records, otherwise the task for this record.
pub fn to_download_task(record: &BillingRecord) -> Option<DownloadTask> {
    if !record.is_eligible() {
        return None;
    }
    let filename = entry_filename(record)?;
    let source_url = record.document_url()?;
    let url = match record.kind() {
        RecordKind::Invoice => source_url.to_string(),
        RecordKind::Receipt => receipt_pdf_url(source_url),
    };
    Some(DownloadTask {
        record_id: record.id().to_string(),
        kind: record.kind(),
        filename,
        url,
        amount: record.amount(),
    })
}

/// `{YYYY-MM-DD}_{kind}_{id}.pdf`, dated by the UTC day of creation.
///
/// Returns `None` when `created_at` is outside the range chrono can represent.
pub fn entry_filename(record: &BillingRecord) -> Option<String> {
    let created = DateTime::from_timestamp(record.created_at(), 0)?;
    Some(format!(
        "{}_{}_{}.pdf",
        created.format("%Y-%m-%d"),
        record.kind().label(),
        record.id()
    ))
}

fn signed_query_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\?s=").expect("receipt query pattern is valid"))
}

/// Rewrites a hosted receipt page URL into the URL of its PDF rendition.
///
/// `/pdf` goes immediately in front of the `?s=` signature query when there is one, leaving the
/// rest of the URL untouched. Otherwise it is appended to the path ahead of any other query or
/// fragment.
pub fn receipt_pdf_url(receipt_url: &str) -> String {
    if let Some(m) = signed_query_regex().find(receipt_url) {
        let (path, signature) = receipt_url.split_at(m.start());
        return format!("{path}/pdf{signature}");
    }
    let split_at = receipt_url
        .find(|c| c == '?' || c == '#')
        .unwrap_or(receipt_url.len());
    let (path, rest) = receipt_url.split_at(split_at);
    format!("{}/pdf{}", path.trim_end_matches('/'), rest)
}
