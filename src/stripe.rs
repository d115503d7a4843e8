//! Stripe API client: lists invoices and charges and fetches their rendered documents.
//!
//! Every request authenticates with HTTP basic auth, the secret key as username and an empty
//! password, and pins the API version the record fields below were written against.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::contract::{DocumentFetcher, DocumentStream, FetchError, RecordSource, TimeWindow};
use crate::error::ExportError;
use crate::record::{BillingRecord, ChargeRecord, InvoiceRecord, RecordKind};

pub const STRIPE_API_VERSION: &str = "2023-10-16";

#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    api_base: String,
    secret: String,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.api_base)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl StripeClient {
    pub fn new(
        secret: impl Into<String>,
        api_base: impl Into<String>,
        request_timeout: Option<Duration>,
    ) -> Result<Self, ExportError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(ExportError::Authentication(
                "Stripe secret key is empty".into(),
            ));
        }
        let mut builder = Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| ExportError::Config(format!("failed to build HTTP client: {e}")))?;
        let api_base = api_base.into().trim_end_matches('/').to_string();
        info!(api_base = %api_base, "Initialized StripeClient");
        Ok(Self {
            http,
            api_base,
            secret,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .basic_auth(&self.secret, Some(""))
            .header("Stripe-Version", STRIPE_API_VERSION)
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct StripeInvoice {
    id: String,
    created: i64,
    #[serde(default)]
    total: i64,
    #[serde(default)]
    paid: Option<bool>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    invoice_pdf: Option<String>,
}

impl From<StripeInvoice> for BillingRecord {
    fn from(inv: StripeInvoice) -> Self {
        let paid = inv
            .paid
            .unwrap_or_else(|| inv.status.as_deref() == Some("paid"));
        BillingRecord::Invoice(InvoiceRecord {
            id: inv.id,
            created_at: inv.created,
            document_url: inv.invoice_pdf,
            amount: inv.total,
            paid,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripeCharge {
    id: String,
    created: i64,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    paid: bool,
    #[serde(default)]
    receipt_url: Option<String>,
}

impl From<StripeCharge> for BillingRecord {
    fn from(ch: StripeCharge) -> Self {
        BillingRecord::Charge(ChargeRecord {
            id: ch.id,
            created_at: ch.created,
            document_url: ch.receipt_url,
            amount: ch.amount,
            paid: ch.paid,
        })
    }
}

fn decode_page(kind: RecordKind, body: &str) -> Result<(Vec<BillingRecord>, bool), String> {
    match kind {
        RecordKind::Invoice => serde_json::from_str::<ListResponse<StripeInvoice>>(body)
            .map(|page| (page.data.into_iter().map(Into::into).collect(), page.has_more)),
        RecordKind::Receipt => serde_json::from_str::<ListResponse<StripeCharge>>(body)
            .map(|page| (page.data.into_iter().map(Into::into).collect(), page.has_more)),
    }
    .map_err(|e| format!("unexpected response body: {e}"))
}

#[async_trait]
impl RecordSource for StripeClient {
    async fn list_records(
        &self,
        kind: RecordKind,
        window: TimeWindow,
        page_limit: u32,
    ) -> Result<Vec<BillingRecord>, ExportError> {
        crate::config::validate_page_limit(page_limit)?;

        let url = format!("{}{}", self.api_base, kind.list_path());
        let mut query: Vec<(&str, String)> = vec![
            ("limit", page_limit.to_string()),
            ("created[gte]", window.from.to_string()),
            ("created[lte]", window.to.to_string()),
        ];
        if kind == RecordKind::Invoice {
            query.push(("status", "paid".to_string()));
        }
        info!(kind = %kind, url = %url, from = window.from, to = window.to, page_limit, "[STRIPE] Listing records");

        let unavailable = |cause: String| ExportError::SourceUnavailable { kind, cause };

        let response = self.get(&url).query(&query).send().await.map_err(|e| {
            error!(kind = %kind, url = %url, error = ?e, "[STRIPE][ERROR] List request failed");
            unavailable(e.to_string())
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<Failed to decode response body>"));

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!(kind = %kind, status = %status, "[STRIPE][ERROR] Credentials rejected");
            return Err(ExportError::Authentication(format!(
                "Stripe rejected the secret key ({status}) while listing {kind} records"
            )));
        }
        if !status.is_success() {
            error!(kind = %kind, status = %status, url = %url, "Stripe API returned error. Response body: {body}");
            return Err(unavailable(format!("HTTP {status}: {body}")));
        }

        let (records, has_more) = decode_page(kind, &body).map_err(|cause| {
            error!(kind = %kind, cause = %cause, "[STRIPE][ERROR] Failed to decode list response");
            unavailable(cause)
        })?;
        if has_more {
            warn!(
                kind = %kind,
                fetched = records.len(),
                page_limit,
                "[STRIPE] More records exist in the window than fit in one page; only the first page is exported"
            );
        }
        debug!(kind = %kind, count = records.len(), "[STRIPE] Listed records");
        Ok(records)
    }
}

#[async_trait]
impl DocumentFetcher for StripeClient {
    async fn fetch(&self, url: &str) -> Result<DocumentStream, FetchError> {
        debug!(url = %url, "[STRIPE] Fetching document");
        let response = self.get(url).send().await?.error_for_status()?;
        let stream = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed();
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_secret_is_an_authentication_error() {
        assert!(matches!(
            StripeClient::new("  ", DEFAULT_BASE, None),
            Err(ExportError::Authentication(_))
        ));
    }

    const DEFAULT_BASE: &str = crate::config::DEFAULT_API_BASE;

    #[test]
    fn debug_output_redacts_secret() {
        let client = StripeClient::new("sk_test_secret", DEFAULT_BASE, None).unwrap();
        let printed = format!("{client:?}");
        assert!(!printed.contains("sk_test_secret"));
    }

    #[test]
    fn invoice_paid_falls_back_to_status() {
        let body = r#"{"data":[
            {"id":"in_1","created":1762164000,"total":500,"status":"paid","invoice_pdf":"https://x/i/1"},
            {"id":"in_2","created":1762164000,"total":500,"paid":false,"status":"open","invoice_pdf":null}
        ],"has_more":false}"#;
        let (records, has_more) = decode_page(RecordKind::Invoice, body).unwrap();
        assert!(!has_more);
        assert!(records[0].is_eligible());
        assert!(!records[1].is_eligible());
    }

    #[test]
    fn charge_fields_map_to_record() {
        let body = r#"{"object":"list","data":[
            {"id":"ch_1","created":1762164000,"amount":1999,"paid":true,"receipt_url":"https://x/r/ch_1?s=ab"}
        ],"has_more":true}"#;
        let (records, has_more) = decode_page(RecordKind::Receipt, body).unwrap();
        assert!(has_more);
        assert_eq!(
            records,
            vec![BillingRecord::Charge(ChargeRecord {
                id: "ch_1".into(),
                created_at: 1_762_164_000,
                document_url: Some("https://x/r/ch_1?s=ab".into()),
                amount: 1999,
                paid: true,
            })]
        );
    }

    #[test]
    fn malformed_body_is_reported() {
        assert!(decode_page(RecordKind::Invoice, "<html>").is_err());
    }
}
