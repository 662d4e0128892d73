//! GDELT master file list reader
//!
//! The manifest (`masterfilelist.txt`) lists every published archive, one per
//! line, as `<size> <md5> <url>`. Archives are published in groups of three
//! per 15-minute interval, always in the same order:
//!
//! ```text
//! 150383 297a16b493de7cf6ca809a7cc31d0b93 http://data.gdeltproject.org/gdeltv2/20150218230000.export.CSV.zip
//! 318084 bb27f78ba45f69a17ea6ed7755e9f8ff http://data.gdeltproject.org/gdeltv2/20150218230000.mentions.CSV.zip
//! 10768507 ea8dde0beb0ba98810a92db068c0ce99 http://data.gdeltproject.org/gdeltv2/20150218230000.gkg.csv.zip
//! ```
//!
//! Only the export line of each group is loaded. The grouping is positional:
//! after an export line the next two lines are discarded without looking at
//! them.

use anyhow::{Context, Result};
use futures::{Stream, TryStreamExt};
use gdelt_common::checksum::is_md5_hex;
use gdelt_common::GdeltError;
use std::io::BufRead;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info};

/// Artifact kinds in one manifest group, in publication order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Export,
    Mentions,
    Gkg,
}

/// Lines in a group that follow the export line
const COMPANION_LINES: usize = 2;

/// One export archive listed in the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub kind: ArtifactKind,
    pub url: String,
    /// Published archive size in bytes
    pub size: Option<u64>,
    /// Published MD5 digest (lowercase hex)
    pub md5: Option<String>,
    /// 1-based line in the manifest
    pub line_number: usize,
}

impl ManifestEntry {
    /// Parse an export line
    ///
    /// Only the field count is validated; size and digest are kept when they
    /// look right and dropped otherwise.
    pub fn parse_export_line(line: &str, line_number: usize) -> gdelt_common::Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            return Err(GdeltError::ManifestLine {
                line_number,
                line: line.to_string(),
                reason: format!("expected at least 3 fields, got {}", fields.len()),
            });
        }

        Ok(Self {
            kind: ArtifactKind::Export,
            url: fields[2].to_string(),
            size: fields[0].parse().ok(),
            md5: is_md5_hex(fields[1]).then(|| fields[1].to_lowercase()),
            line_number,
        })
    }

    /// Last path segment of the URL, e.g. `20150218230000.export.CSV.zip`
    pub fn file_name(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(&self.url)
    }
}

/// Positional grouping shared by the blocking and streaming readers
#[derive(Debug, Default)]
struct Grouping {
    line_number: usize,
    pending_companions: usize,
    consumed: usize,
    skipped: usize,
}

impl Grouping {
    /// Feed the next raw line; export lines yield an item
    fn feed(&mut self, line: &str) -> Option<gdelt_common::Result<ManifestEntry>> {
        self.line_number += 1;

        if self.pending_companions > 0 {
            self.pending_companions -= 1;
            self.skipped += 1;
            return None;
        }
        if line.trim().is_empty() {
            return None;
        }

        self.pending_companions = COMPANION_LINES;
        let entry = ManifestEntry::parse_export_line(line, self.line_number);
        if entry.is_ok() {
            self.consumed += 1;
        }
        Some(entry)
    }
}

/// Lazy iterator over the export entries of a manifest
pub struct ManifestReader<R> {
    lines: std::io::Lines<R>,
    grouping: Grouping,
}

impl<R: BufRead> ManifestReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            grouping: Grouping::default(),
        }
    }

    /// Export lines emitted so far
    pub fn consumed(&self) -> usize {
        self.grouping.consumed
    }

    /// Mentions/GKG lines discarded so far
    pub fn skipped(&self) -> usize {
        self.grouping.skipped
    }
}

impl<R: BufRead> Iterator for ManifestReader<R> {
    type Item = gdelt_common::Result<ManifestEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            if let Some(entry) = self.grouping.feed(&line) {
                return Some(entry);
            }
        }
    }
}

/// Manifest body read incrementally from disk or the network
pub type ManifestBody = Pin<Box<dyn AsyncBufRead + Send>>;

/// Async counterpart of [`ManifestReader`]
///
/// Lines are pulled from the body only as entries are requested, so a run
/// that stops early never reads the rest of the manifest. A read error ends
/// the sequence.
pub struct ManifestStream<R> {
    lines: tokio::io::Lines<R>,
    grouping: Grouping,
    failed: bool,
}

impl<R: AsyncBufRead + Unpin> ManifestStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            grouping: Grouping::default(),
            failed: false,
        }
    }

    pub fn consumed(&self) -> usize {
        self.grouping.consumed
    }

    pub fn skipped(&self) -> usize {
        self.grouping.skipped
    }

    pub async fn next_entry(&mut self) -> Option<gdelt_common::Result<ManifestEntry>> {
        if self.failed {
            return None;
        }

        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e.into()));
                },
            };
            if let Some(entry) = self.grouping.feed(&line) {
                return Some(entry);
            }
        }
    }

    /// Adapt into a [`Stream`] of entries
    pub fn into_stream(self) -> impl Stream<Item = gdelt_common::Result<ManifestEntry>> {
        futures::stream::unfold(self, |mut reader| async move {
            let entry = reader.next_entry().await?;
            Some((entry, reader))
        })
    }
}

/// Where the manifest is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    Http(String),
    File(PathBuf),
}

impl ManifestSource {
    /// Interpret a configured manifest location
    ///
    /// `http(s)://` URLs are fetched, `file://` URLs and bare paths are read
    /// from disk.
    pub fn parse(location: &str) -> Self {
        match url::Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                ManifestSource::Http(location.to_string())
            },
            Ok(url) if url.scheme() == "file" => match url.to_file_path() {
                Ok(path) => ManifestSource::File(path),
                Err(()) => ManifestSource::File(PathBuf::from(url.path())),
            },
            _ => ManifestSource::File(PathBuf::from(location)),
        }
    }

    /// Open the manifest body without reading it
    pub async fn load(&self, client: &reqwest::Client) -> Result<ManifestBody> {
        match self {
            ManifestSource::Http(url) => {
                info!("Fetching manifest from {}", url);
                let response = client
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("Failed to fetch manifest {}", url))?;

                if !response.status().is_success() {
                    anyhow::bail!("Failed to fetch manifest {}: {}", url, response.status());
                }

                if let Some(length) = response.content_length() {
                    debug!("Manifest is {} bytes", length);
                }
                let body = response.bytes_stream().map_err(std::io::Error::other);
                Ok(Box::pin(StreamReader::new(body)))
            },
            ManifestSource::File(path) => {
                info!("Reading manifest from {}", path.display());
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("Failed to open manifest {}", path.display()))?;
                Ok(Box::pin(tokio::io::BufReader::new(file)))
            },
        }
    }

    /// Open the manifest and wrap it in a streaming reader
    pub async fn open(&self, client: &reqwest::Client) -> Result<ManifestStream<ManifestBody>> {
        let body = self.load(client).await?;
        Ok(ManifestStream::new(body))
    }
}

impl std::fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestSource::Http(url) => write!(f, "{}", url),
            ManifestSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}
