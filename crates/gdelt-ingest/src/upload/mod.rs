//! Document store writers
//!
//! An [`Uploader`] receives one whole batch of records per call. Writes are
//! not retried here; a failure ends the run.

mod jsonl;
#[cfg(feature = "database")]
mod postgres;

pub use jsonl::JsonLinesUploader;
#[cfg(feature = "database")]
pub use postgres::PostgresUploader;

use anyhow::Result;
use async_trait::async_trait;
use gdelt_common::GdeltError;
use std::path::PathBuf;
use std::sync::Arc;

use crate::models::EventRecord;

/// Result of one bulk upload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub inserted: usize,
}

/// Bulk writer for one batch of records
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Write every record of the batch, in order
    async fn upload(&self, records: &[EventRecord]) -> Result<UploadReport>;

    /// Human-readable destination, used in logs and errors
    fn describe(&self) -> String;
}

/// Configured output location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Directory receiving `<collection>.jsonl`
    JsonLines(PathBuf),
    /// PostgreSQL connection URL
    Postgres(String),
}

impl Destination {
    /// Interpret a destination string
    ///
    /// `postgres://` and `postgresql://` select the database writer,
    /// `file://` URLs and bare paths select the JSON-lines writer.
    pub fn parse(raw: &str) -> gdelt_common::Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(GdeltError::Config("destination must not be empty".to_string()));
        }

        match url::Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "postgres" | "postgresql") => {
                Ok(Destination::Postgres(raw.to_string()))
            },
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(Destination::JsonLines)
                .map_err(|()| GdeltError::Config(format!("invalid file destination: {}", raw))),
            Ok(url) if url.scheme().len() > 1 => Err(GdeltError::Config(format!(
                "unsupported destination scheme '{}'",
                url.scheme()
            ))),
            // Bare paths, including Windows drive letters that parse as a scheme
            _ => Ok(Destination::JsonLines(PathBuf::from(raw))),
        }
    }

    /// Build the uploader for this destination
    pub async fn connect(&self, collection: &str) -> Result<Arc<dyn Uploader>> {
        match self {
            Destination::JsonLines(dir) => {
                Ok(Arc::new(JsonLinesUploader::new(dir.clone(), collection)?))
            },
            #[cfg(feature = "database")]
            Destination::Postgres(url) => {
                Ok(Arc::new(PostgresUploader::connect(url, collection).await?))
            },
            #[cfg(not(feature = "database"))]
            Destination::Postgres(_) => anyhow::bail!(
                "PostgreSQL destinations require the 'database' feature"
            ),
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::JsonLines(dir) => write!(f, "{}", dir.display()),
            Destination::Postgres(url) => match url::Url::parse(url) {
                // Keep credentials out of logs
                Ok(mut parsed) => {
                    let _ = parsed.set_password(None);
                    write!(f, "{}", parsed)
                },
                Err(_) => write!(f, "postgres"),
            },
        }
    }
}

/// Validate a collection name used as a file stem or table name
pub fn validate_collection(name: &str) -> gdelt_common::Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(GdeltError::Config(format!(
            "collection '{}' must match [A-Za-z_][A-Za-z0-9_]* (max 63 chars)",
            name
        )))
    }
}
