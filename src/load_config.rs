/// `load_config` module: layers an optional static YAML file and the environment into an
/// [`ExportConfig`] plus the API secret.
///
/// # Responsibilities
/// - Parse the user-supplied YAML file (no secrets) into the strongly-typed [`ExportConfig`]
/// - Apply environment overrides (`BILLING_EXPORT_OUTPUT_DIR`,
///   `BILLING_EXPORT_MAX_CONCURRENT_DOWNLOADS`, `STRIPE_API_BASE`)
/// - Read the secret key from `STRIPE_SECRET` and fail fast when it is missing
///
/// # Errors
/// All errors use `anyhow::Error` for context-rich diagnostics, surfaced at the CLI boundary.
/// A missing secret is reported as [`ExportError::Authentication`].
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::config::ExportConfig;
use crate::error::ExportError;

pub const SECRET_ENV: &str = "STRIPE_SECRET";
pub const OUTPUT_DIR_ENV: &str = "BILLING_EXPORT_OUTPUT_DIR";
pub const MAX_CONCURRENT_DOWNLOADS_ENV: &str = "BILLING_EXPORT_MAX_CONCURRENT_DOWNLOADS";
pub const API_BASE_ENV: &str = "STRIPE_API_BASE";

/// Export settings together with the secret they will run with.
#[derive(Clone)]
pub struct LoadedConfig {
    pub export: ExportConfig,
    pub secret: String,
}

impl std::fmt::Debug for LoadedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedConfig")
            .field("export", &self.export)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Loads the optional YAML file, then applies environment overrides and the secret.
pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let mut export = match path {
        Some(path) => read_config_file(path)?,
        None => {
            info!("No config file given, using defaults");
            ExportConfig::default()
        }
    };

    apply_env_overrides(&mut export)?;

    let secret = match std::env::var(SECRET_ENV) {
        Ok(secret) if !secret.trim().is_empty() => {
            info!("{SECRET_ENV} found in env");
            secret
        }
        _ => {
            error!("{SECRET_ENV} environment variable not set");
            return Err(ExportError::Authentication(format!(
                "{SECRET_ENV} environment variable not set"
            ))
            .into());
        }
    };

    info!(
        output_dir = %export.output_dir.display(),
        max_concurrent_downloads = export.max_concurrent_downloads,
        "Config loaded and merged successfully"
    );
    Ok(LoadedConfig { export, secret })
}

fn read_config_file(path: &Path) -> Result<ExportConfig> {
    info!(config_path = ?path, "Loading configuration from file");

    let content = match fs::read_to_string(path) {
        Ok(content) => {
            info!(config_path = ?path, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path,
                e
            ));
        }
    };

    // An empty file means "all defaults".
    if content.trim().is_empty() {
        return Ok(ExportConfig::default());
    }

    match serde_yaml::from_str(&content) {
        Ok(config) => {
            info!(config_path = ?path, "Parsed config YAML successfully");
            Ok(config)
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
            Err(anyhow::anyhow!("Failed to parse config YAML: {e}"))
        }
    }
}

fn apply_env_overrides(export: &mut ExportConfig) -> Result<()> {
    if let Some(dir) = non_empty_env(OUTPUT_DIR_ENV) {
        info!(output_dir = %dir, "Output directory overridden from env");
        export.output_dir = PathBuf::from(dir);
    }
    if let Some(raw) = non_empty_env(MAX_CONCURRENT_DOWNLOADS_ENV) {
        export.max_concurrent_downloads = raw.trim().parse::<usize>().with_context(|| {
            format!("{MAX_CONCURRENT_DOWNLOADS_ENV} must be a positive integer, got {raw:?}")
        })?;
    }
    if let Some(base) = non_empty_env(API_BASE_ENV) {
        info!(api_base = %base, "API base overridden from env");
        export.api_base = base;
    }
    Ok(())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
