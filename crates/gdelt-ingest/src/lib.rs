//! GDELT Ingest Library
//!
//! Batch loader for the GDELT 2.0 event feed. A run reads the master file
//! list, downloads export archives in batches, maps every tab-delimited row
//! onto an [`models::EventRecord`] document and writes each batch to a
//! document store.
//!
//! # Components
//!
//! - [`manifest`]: master file list reader (export lines only)
//! - [`fetcher`]: archive download, verification and extraction
//! - [`parser`]: positional row to document mapping
//! - [`cursor`]: per-run batch and limit accounting
//! - [`upload`]: JSON-lines and PostgreSQL document writers
//! - [`pipeline`]: the orchestrator tying them together
//!
//! # Example
//!
//! ```no_run
//! use gdelt_ingest::extract::WorkingDirectory;
//! use gdelt_ingest::fetcher::HttpArchiveFetcher;
//! use gdelt_ingest::manifest::ManifestSource;
//! use gdelt_ingest::pipeline::Orchestrator;
//! use gdelt_ingest::upload::JsonLinesUploader;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = reqwest::Client::new();
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(HttpArchiveFetcher::new(client.clone())),
//!         Arc::new(JsonLinesUploader::new("./gdelt-data", "events")?),
//!         WorkingDirectory::new("./gdelt-work"),
//!         365,
//!         3650,
//!     )?;
//!
//!     let source = ManifestSource::parse("http://data.gdeltproject.org/gdeltv2/masterfilelist.txt");
//!     let summary = orchestrator.run_source(&source, &client).await?;
//!     println!("uploaded {} records", summary.records_uploaded);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cursor;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod manifest;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod upload;

pub use error::{Phase, PipelineError};
pub use models::EventRecord;
pub use pipeline::{Orchestrator, PipelineState, RunSummary};
