//! StripeClient against a local mock of the Stripe API (wiremock).

use chrono::NaiveDate;
use futures::TryStreamExt;
use serde_json::json;
use std::fs::File;
use std::sync::Arc;
use tempfile::tempdir;
use wiremock::matchers::{basic_auth, header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use billing_export::config::{ExportConfig, WindowConfig};
use billing_export::contract::{DocumentFetcher, RecordSource, TimeWindow};
use billing_export::error::ExportError;
use billing_export::export::{export_all, TracingObserver};
use billing_export::record::{BillingRecord, RecordKind};
use billing_export::stripe::StripeClient;

const SECRET: &str = "sk_test_123";
const NOVEMBER: TimeWindow = TimeWindow {
    from: 1_761_955_200,
    to: 1_764_547_199,
};

fn client(server: &MockServer) -> StripeClient {
    StripeClient::new(SECRET, server.uri(), None).expect("client builds")
}

#[tokio::test]
async fn list_invoices_sends_window_paid_filter_and_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/invoices"))
        .and(query_param("limit", "100"))
        .and(query_param("created[gte]", "1761955200"))
        .and(query_param("created[lte]", "1764547199"))
        .and(query_param("status", "paid"))
        .and(basic_auth(SECRET, ""))
        .and(header("Stripe-Version", "2023-10-16"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"id": "in_1", "created": 1_762_164_000, "total": 500, "paid": true,
                 "status": "paid", "invoice_pdf": "https://files.example/in_1/pdf"}
            ],
            "has_more": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let records = client(&server)
        .list_records(RecordKind::Invoice, NOVEMBER, 100)
        .await
        .expect("listing succeeds");

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id(), "in_1");
    assert_eq!(records[0].amount(), 500);
    assert!(records[0].is_eligible());
}

#[tokio::test]
async fn list_charges_has_no_status_filter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/charges"))
        .and(query_param("limit", "25"))
        .and(query_param_is_missing("status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": "ch_1", "created": 1_762_164_000, "amount": 1200, "paid": true,
                 "receipt_url": "https://pay.example/receipts/ch_1?s=sig"},
                {"id": "ch_2", "created": 1_762_164_000, "amount": 800, "paid": false,
                 "receipt_url": null}
            ],
            "has_more": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let records = client(&server)
        .list_records(RecordKind::Receipt, NOVEMBER, 25)
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    assert!(matches!(&records[0], BillingRecord::Charge(c) if c.amount == 1200));
    assert!(!records[1].is_eligible());
}

#[tokio::test]
async fn rejected_secret_is_an_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/invoices"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"type": "invalid_request_error", "message": "Invalid API Key provided"}
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .list_records(RecordKind::Invoice, NOVEMBER, 100)
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::Authentication(_)), "got {err:?}");
}

#[tokio::test]
async fn server_error_is_source_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/charges"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream busy"))
        .mount(&server)
        .await;

    let err = client(&server)
        .list_records(RecordKind::Receipt, NOVEMBER, 100)
        .await
        .unwrap_err();
    match err {
        ExportError::SourceUnavailable { kind, cause } => {
            assert_eq!(kind, RecordKind::Receipt);
            assert!(cause.contains("503"));
            assert!(cause.contains("upstream busy"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn out_of_range_page_limit_is_rejected_without_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = client(&server)
        .list_records(RecordKind::Invoice, NOVEMBER, 101)
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::Config(_)));
}

#[tokio::test]
async fn fetch_streams_document_with_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/in_1/pdf"))
        .and(basic_auth(SECRET, ""))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7 invoice".to_vec()))
        .mount(&server)
        .await;

    let stream = client(&server)
        .fetch(&format!("{}/files/in_1/pdf", server.uri()))
        .await
        .expect("fetch succeeds");
    let chunks: Vec<_> = stream.try_collect().await.unwrap();
    let body: Vec<u8> = chunks.concat();
    assert_eq!(body, b"%PDF-1.7 invoice");
}

#[tokio::test]
async fn fetch_of_missing_document_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = client(&server)
        .fetch(&format!("{}/files/gone/pdf", server.uri()))
        .await;
    let err = match result {
        Err(e) => e,
        Ok(_) => panic!("404 must not yield a stream"),
    };
    assert!(err.to_string().contains("404"), "got {err}");
}

#[tokio::test]
async fn export_all_against_mock_stripe_writes_both_archives() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/v1/invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": "in_paid", "created": 1_762_164_000, "total": 500, "paid": true,
                 "invoice_pdf": format!("{base}/files/in_paid/pdf")},
                {"id": "in_zero", "created": 1_762_164_000, "total": 0, "paid": true,
                 "invoice_pdf": format!("{base}/files/in_zero/pdf")},
                {"id": "in_open", "created": 1_762_164_000, "total": 300, "paid": false,
                 "invoice_pdf": format!("{base}/files/in_open/pdf")}
            ],
            "has_more": false
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/charges"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": "ch_1", "created": 1_764_547_199, "amount": 2500, "paid": true,
                 "receipt_url": format!("{base}/receipts/acct_1/ch_1?s=sig1")}
            ],
            "has_more": false
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/in_paid/pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF invoice".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/receipts/acct_1/ch_1/pdf"))
        .and(query_param("s", "sig1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF receipt".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let out = tempdir().unwrap();
    let config = ExportConfig {
        output_dir: out.path().join("exports"),
        window: WindowConfig {
            from: NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
            to: NaiveDate::from_ymd_opt(2025, 11, 30).unwrap(),
        },
        api_base: base.clone(),
        ..ExportConfig::default()
    };
    let client = Arc::new(client(&server));

    let report = export_all(&config, client.as_ref(), client.clone(), &TracingObserver)
        .await
        .expect("export succeeds");

    assert_eq!(report.categories[0].tally.to_string(), "count=1, total=$5.00");
    assert_eq!(report.categories[1].tally.to_string(), "count=1, total=$25.00");

    let invoices =
        zip::ZipArchive::new(File::open(out.path().join("exports/invoices.zip")).unwrap()).unwrap();
    assert_eq!(
        invoices.file_names().collect::<Vec<_>>(),
        vec!["2025-11-03_invoice_in_paid.pdf"]
    );
    let receipts =
        zip::ZipArchive::new(File::open(out.path().join("exports/receipts.zip")).unwrap()).unwrap();
    assert_eq!(
        receipts.file_names().collect::<Vec<_>>(),
        vec!["2025-11-30_receipt_ch_1.pdf"]
    );
}
