///
/// This module implements the CLI interface for billing-export: command parsing, flag overrides on
/// top of the loaded configuration, and the console presentation of pipeline events.
///
/// All pipeline logic lives in [`crate::export`]; this module only wires the Stripe client, the
/// configuration and a [`ConsoleObserver`] together.
///
/// ## How To Use
/// - For command-line users: run the `billing-export` binary with `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ExportConfig, FailurePolicy};
use crate::contract::{ExportEvent, ExportObserver};
use crate::export::{export_all, TracingObserver};
use crate::load_config::load_config;
use crate::record::RecordKind;
use crate::stripe::StripeClient;

/// CLI for billing-export: zip up paid invoices and receipts for a reporting window.
#[derive(Parser)]
#[clap(
    name = "billing-export",
    version,
    about = "Export paid Stripe invoices and receipts for a date range into zipped PDF archives"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download invoice and receipt PDFs for the window into invoices.zip and receipts.zip
    Export {
        /// Path to an optional YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
        /// First day of the window (YYYY-MM-DD, UTC)
        #[clap(long)]
        from: Option<NaiveDate>,
        /// Last day of the window, inclusive (YYYY-MM-DD, UTC)
        #[clap(long)]
        to: Option<NaiveDate>,
        /// Directory the archives are written to
        #[clap(long)]
        output_dir: Option<PathBuf>,
        /// Maximum number of simultaneous document downloads
        #[clap(long)]
        max_concurrent_downloads: Option<usize>,
        /// Records requested per category (1-100)
        #[clap(long)]
        page_limit: Option<u32>,
        /// Leave failed downloads out instead of aborting the category
        #[clap(long)]
        skip_failed: bool,
    },
}

/// Prints the human-facing progress lines and forwards every event to `tracing`.
#[derive(Debug, Default)]
pub struct ConsoleObserver {
    tracing: TracingObserver,
}

impl ConsoleObserver {
    /// The console line for an event, if it has one.
    pub fn render(event: &ExportEvent) -> Option<String> {
        match event {
            ExportEvent::CategoryStarted { kind, .. } => {
                let title = match kind {
                    RecordKind::Invoice => "Invoices",
                    RecordKind::Receipt => "Receipts",
                };
                Some(format!("\n=== Downloading {title} ==="))
            }
            ExportEvent::RecordsListed { .. } => None,
            ExportEvent::DocumentArchived { kind, filename, .. } => Some(match kind {
                RecordKind::Invoice => format!("📄 Invoice added to ZIP: {filename}"),
                RecordKind::Receipt => format!("🧾 Receipt added to ZIP: {filename}"),
            }),
            ExportEvent::DocumentSkipped {
                kind,
                record_id,
                reason,
            } => Some(format!("⚠️  Skipped {kind} {record_id}: {reason}")),
            ExportEvent::CategoryFinished { report } => Some(format!(
                "✅ Finished {} {}s into {}\nTotal earned: ${}",
                report.tally.count,
                report.kind,
                report.archive_path.display(),
                report.tally.formatted_total()
            )),
            ExportEvent::ExportFinished => {
                Some("\n🎉 DONE: invoices & receipts zipped!".to_string())
            }
        }
    }
}

impl ExportObserver for ConsoleObserver {
    fn on_event(&self, event: &ExportEvent) {
        self.tracing.on_event(event);
        if let Some(line) = Self::render(event) {
            println!("{line}");
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_flags(
    export: &mut ExportConfig,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    output_dir: Option<PathBuf>,
    max_concurrent_downloads: Option<usize>,
    page_limit: Option<u32>,
    skip_failed: bool,
) {
    if let Some(from) = from {
        export.window.from = from;
    }
    if let Some(to) = to {
        export.window.to = to;
    }
    if let Some(dir) = output_dir {
        export.output_dir = dir;
    }
    if let Some(n) = max_concurrent_downloads {
        export.max_concurrent_downloads = n;
    }
    if let Some(n) = page_limit {
        export.page_limit = n;
    }
    if skip_failed {
        export.on_download_error = FailurePolicy::Skip;
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Export {
            config,
            from,
            to,
            output_dir,
            max_concurrent_downloads,
            page_limit,
            skip_failed,
        } => {
            let loaded = load_config(config.as_deref())?;
            let mut export = loaded.export;
            apply_flags(
                &mut export,
                from,
                to,
                output_dir,
                max_concurrent_downloads,
                page_limit,
                skip_failed,
            );
            export.validate()?;
            export.trace_loaded();

            let client = Arc::new(StripeClient::new(
                loaded.secret,
                export.api_base.clone(),
                export.request_timeout_secs.map(Duration::from_secs),
            )?);
            let observer = ConsoleObserver::default();

            tracing::info!(command = "export", "Starting export");
            match export_all(&export, client.as_ref(), client.clone(), &observer).await {
                Ok(report) => {
                    tracing::info!(command = "export", ?report, "Export complete");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "export", error = %e, "Export failed");
                    Err(e.into())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::CategoryReport;
    use crate::tally::TallyReport;

    #[test]
    fn cli_parses_export_flags() {
        let cli = Cli::try_parse_from([
            "billing-export",
            "export",
            "--from",
            "2025-11-01",
            "--to",
            "2025-11-30",
            "--max-concurrent-downloads",
            "5",
            "--skip-failed",
        ])
        .unwrap();
        let Commands::Export {
            from,
            to,
            max_concurrent_downloads,
            skip_failed,
            config,
            ..
        } = cli.command;
        assert_eq!(from, NaiveDate::from_ymd_opt(2025, 11, 1));
        assert_eq!(to, NaiveDate::from_ymd_opt(2025, 11, 30));
        assert_eq!(max_concurrent_downloads, Some(5));
        assert!(skip_failed);
        assert!(config.is_none());
    }

    #[test]
    fn flags_override_config() {
        let mut export = ExportConfig::default();
        apply_flags(
            &mut export,
            NaiveDate::from_ymd_opt(2025, 1, 1),
            None,
            Some(PathBuf::from("/tmp/exports")),
            Some(3),
            Some(10),
            true,
        );
        assert_eq!(export.window.from, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(export.output_dir, PathBuf::from("/tmp/exports"));
        assert_eq!(export.max_concurrent_downloads, 3);
        assert_eq!(export.page_limit, 10);
        assert_eq!(export.on_download_error, FailurePolicy::Skip);
    }

    #[test]
    fn console_lines_match_progress_format() {
        let archived = ExportEvent::DocumentArchived {
            kind: RecordKind::Receipt,
            filename: "2025-11-03_receipt_ch_1.pdf".into(),
            amount: 100,
        };
        assert_eq!(
            ConsoleObserver::render(&archived).unwrap(),
            "🧾 Receipt added to ZIP: 2025-11-03_receipt_ch_1.pdf"
        );

        let finished = ExportEvent::CategoryFinished {
            report: CategoryReport {
                kind: RecordKind::Invoice,
                archive_path: PathBuf::from("out/invoices.zip"),
                listed: 3,
                eligible: 1,
                tally: TallyReport {
                    count: 1,
                    total_amount: 500,
                },
                skipped: vec![],
            },
        };
        assert_eq!(
            ConsoleObserver::render(&finished).unwrap(),
            "✅ Finished 1 invoices into out/invoices.zip\nTotal earned: $5.00"
        );
    }
}
