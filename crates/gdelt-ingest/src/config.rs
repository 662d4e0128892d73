//! Ingestion configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::upload::{validate_collection, Destination};

// ============================================================================
// Ingestion Configuration Constants
// ============================================================================

/// GDELT 2.0 master file list.
pub const DEFAULT_MANIFEST_URL: &str = "http://data.gdeltproject.org/gdeltv2/masterfilelist.txt";

/// Default scratch directory for extracted archives.
pub const DEFAULT_WORKING_DIR: &str = "./gdelt-work";

/// Default archives per batch.
pub const DEFAULT_BATCH_SIZE: usize = 365;

/// Default archives per run.
pub const DEFAULT_RUN_LIMIT: usize = 3650;

/// Default output location (JSON-lines directory).
pub const DEFAULT_DESTINATION: &str = "./gdelt-data";

/// Default collection (file stem or table name).
pub const DEFAULT_COLLECTION: &str = "events";

/// Default HTTP request timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

/// Default download attempts per archive.
pub const DEFAULT_MAX_RETRIES: u32 = crate::fetcher::MAX_RETRIES;

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub manifest_url: String,
    pub working_dir: PathBuf,
    pub batch_size: usize,
    pub run_limit: usize,
    pub destination: String,
    pub collection: String,
    pub http_timeout_secs: u64,
    pub max_retries: u32,
    pub verify_checksums: bool,
    pub geo_points: bool,
    pub show_progress: bool,
}

impl IngestConfig {
    /// Load configuration from `.env`, the environment and defaults
    ///
    /// Not validated; apply any overrides, then call [`IngestConfig::validate`].
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            manifest_url: lookup("GDELT_MANIFEST_URL").unwrap_or(defaults.manifest_url),
            working_dir: lookup("GDELT_WORKING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.working_dir),
            batch_size: parse_var(&lookup, "GDELT_BATCH_SIZE").unwrap_or(defaults.batch_size),
            run_limit: parse_var(&lookup, "GDELT_RUN_LIMIT").unwrap_or(defaults.run_limit),
            destination: lookup("GDELT_DESTINATION").unwrap_or(defaults.destination),
            collection: lookup("GDELT_COLLECTION").unwrap_or(defaults.collection),
            http_timeout_secs: parse_var(&lookup, "GDELT_HTTP_TIMEOUT_SECS")
                .unwrap_or(defaults.http_timeout_secs),
            max_retries: parse_var(&lookup, "GDELT_MAX_RETRIES").unwrap_or(defaults.max_retries),
            verify_checksums: parse_var(&lookup, "GDELT_VERIFY_CHECKSUMS")
                .unwrap_or(defaults.verify_checksums),
            geo_points: parse_var(&lookup, "GDELT_GEO_POINTS").unwrap_or(defaults.geo_points),
            show_progress: parse_var(&lookup, "GDELT_SHOW_PROGRESS")
                .unwrap_or(defaults.show_progress),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.manifest_url.trim().is_empty() {
            anyhow::bail!("Manifest URL cannot be empty");
        }

        if self.batch_size == 0 {
            anyhow::bail!("Batch size must be greater than 0");
        }

        if self.run_limit < self.batch_size {
            anyhow::bail!(
                "Run limit ({}) cannot be smaller than batch size ({})",
                self.run_limit,
                self.batch_size
            );
        }

        if self.working_dir.as_os_str().is_empty() {
            anyhow::bail!("Working directory cannot be empty");
        }

        Destination::parse(&self.destination)?;
        validate_collection(&self.collection)?;

        if self.http_timeout_secs == 0 {
            anyhow::bail!("HTTP timeout must be greater than 0");
        }

        if self.max_retries == 0 {
            anyhow::bail!("Max retries must be greater than 0");
        }

        if !self.verify_checksums {
            warn!("Archive checksum verification is disabled");
        }

        Ok(())
    }

    pub fn destination(&self) -> anyhow::Result<Destination> {
        Ok(Destination::parse(&self.destination)?)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            manifest_url: DEFAULT_MANIFEST_URL.to_string(),
            working_dir: PathBuf::from(DEFAULT_WORKING_DIR),
            batch_size: DEFAULT_BATCH_SIZE,
            run_limit: DEFAULT_RUN_LIMIT,
            destination: DEFAULT_DESTINATION.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            verify_checksums: true,
            geo_points: true,
            show_progress: false,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        },
    }
}
