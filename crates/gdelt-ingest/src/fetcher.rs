//! Archive download and extraction
//!
//! The pipeline only sees the [`ArchiveFetcher`] contract: one manifest entry
//! in, a list of local files out. Retries, checksum verification and the
//! progress display all live in [`HttpArchiveFetcher`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use gdelt_common::checksum::ensure_md5;
use gdelt_common::GdeltError;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::extract::extract_zip_to;
use crate::manifest::ManifestEntry;

/// Default number of download attempts per archive
pub const MAX_RETRIES: u32 = 3;

/// Base back-off between attempts, multiplied by the attempt number
pub const RETRY_DELAY_SECS: u64 = 5;

/// Cap on the up-front body buffer; announced lengths are not trusted beyond it
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Produces local files for one manifest entry
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    /// Download the entry's archive and extract it into `dest`
    ///
    /// Returns the extracted file paths.
    async fn fetch(&self, entry: &ManifestEntry, dest: &Path) -> Result<Vec<PathBuf>>;
}

/// Fetches archives over HTTP with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpArchiveFetcher {
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
    verify_checksums: bool,
    show_progress: bool,
}

impl HttpArchiveFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            max_retries: MAX_RETRIES,
            retry_delay: Duration::from_secs(RETRY_DELAY_SECS),
            verify_checksums: true,
            show_progress: false,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_checksum_verification(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    /// Download with retries; the final error names the URL
    async fn download_with_retry(&self, entry: &ManifestEntry) -> Result<Vec<u8>> {
        for attempt in 1..=self.max_retries {
            debug!("Download attempt {}/{} for: {}", attempt, self.max_retries, entry.url);

            match self.download(entry).await {
                Ok(data) => return Ok(data),
                Err(e) if attempt < self.max_retries => {
                    let delay = self.retry_delay * attempt;
                    warn!(
                        "Download attempt {}/{} failed: {:#}. Retrying in {:?}...",
                        attempt, self.max_retries, e, delay
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!(
                            "Failed to download {} after {} attempts",
                            entry.url, self.max_retries
                        )
                    });
                },
            }
        }

        anyhow::bail!("No download attempts made for {}", entry.url)
    }

    async fn download(&self, entry: &ManifestEntry) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(&entry.url)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", entry.url))?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to download {}: {}", entry.url, response.status());
        }

        // The listed size bounds the body only when it is being verified
        let size_limit = entry.size.filter(|_| self.verify_checksums);
        let content_length = response.content_length();
        if let (Some(announced), Some(limit)) = (content_length, size_limit) {
            if announced > limit {
                anyhow::bail!(
                    "{} announces {} bytes, manifest lists {}",
                    entry.url,
                    announced,
                    limit
                );
            }
        }

        let total_size = content_length.or(entry.size).unwrap_or(0);
        let pb = self.progress_bar(total_size, entry.file_name())?;

        let mut data = Vec::with_capacity(total_size.min(MAX_PREALLOCATION) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("Failed to read body of {}", entry.url))?;
            if let Some(limit) = size_limit {
                if (data.len() + chunk.len()) as u64 > limit {
                    anyhow::bail!("Body of {} exceeds the listed {} bytes", entry.url, limit);
                }
            }
            data.extend_from_slice(&chunk);
            pb.set_position(data.len() as u64);
        }

        pb.finish_with_message(format!("Downloaded {}", entry.file_name()));
        Ok(data)
    }

    fn progress_bar(&self, total_size: u64, name: &str) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }

        let pb = ProgressBar::new(total_size);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")?
                .progress_chars("#>-"),
        );
        pb.set_message(format!("Downloading {}", name));
        Ok(pb)
    }

    fn verify(&self, entry: &ManifestEntry, data: &[u8]) -> Result<()> {
        if !self.verify_checksums {
            return Ok(());
        }

        if let Some(expected) = entry.size {
            if expected != data.len() as u64 {
                return Err(GdeltError::ChecksumMismatch {
                    subject: format!("{} (size)", entry.url),
                    expected: expected.to_string(),
                    actual: data.len().to_string(),
                }
                .into());
            }
        }

        if let Some(expected) = &entry.md5 {
            ensure_md5(data, expected, &entry.url)?;
        }

        Ok(())
    }
}

#[async_trait]
impl ArchiveFetcher for HttpArchiveFetcher {
    async fn fetch(&self, entry: &ManifestEntry, dest: &Path) -> Result<Vec<PathBuf>> {
        let data = self.download_with_retry(entry).await?;
        info!("Downloaded {} ({} bytes)", entry.url, data.len());

        self.verify(entry, &data)?;

        let dest = dest.to_path_buf();
        let files = tokio::task::spawn_blocking(move || extract_zip_to(&data, &dest))
            .await
            .context("Extraction task panicked")?
            .with_context(|| format!("Failed to extract {}", entry.url))?;

        debug!("Extracted {} files from {}", files.len(), entry.file_name());
        Ok(files)
    }
}
