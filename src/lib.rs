#![doc = "billing-export: export paid Stripe invoices and receipts into zipped PDF archives."]

//! The crate is a bounded batch job. For each record category (invoices, then receipts) it lists
//! one page of records for a reporting window, keeps the eligible ones, streams their PDFs into a
//! zip archive under a concurrency cap and reports the count and total collected.
//!
//! # Layout
//! - [`record`]: record model, eligibility, filename and receipt URL rules
//! - [`contract`]: traits at the network and presentation seams
//! - [`stripe`]: the Stripe implementation of those traits
//! - [`download`], [`archive`], [`tally`]: the pipeline stages
//! - [`export`]: the orchestrator
//! - [`config`], [`load_config`], [`cli`]: settings and the command-line front-end

pub mod archive;
pub mod cli;
pub mod config;
pub mod contract;
pub mod download;
pub mod error;
pub mod export;
pub mod load_config;
pub mod record;
pub mod stripe;
pub mod tally;

pub use cli::{run, Cli, Commands};
pub use error::{ExportError, Result};
