use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{validate_collection, UploadReport, Uploader};
use crate::models::EventRecord;

/// Appends each batch to `<dir>/<collection>.jsonl`, one document per line
#[derive(Debug, Clone)]
pub struct JsonLinesUploader {
    path: PathBuf,
}

impl JsonLinesUploader {
    pub fn new(dir: impl Into<PathBuf>, collection: &str) -> Result<Self> {
        validate_collection(collection)?;
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

        Ok(Self {
            path: dir.join(format!("{}.jsonl", collection)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Uploader for JsonLinesUploader {
    async fn upload(&self, records: &[EventRecord]) -> Result<UploadReport> {
        let path = self.path.clone();
        let batch = records.to_vec();
        tokio::task::spawn_blocking(move || serde_jsonlines::append_json_lines(&path, &batch))
            .await
            .context("Append task panicked")?
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;

        debug!("Appended {} documents to {}", records.len(), self.path.display());
        Ok(UploadReport {
            inserted: records.len(),
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
