//! Batch ingestion orchestrator
//!
//! One run walks the manifest in batches. Each batch downloads up to
//! `batch_size` archives into the working directory, parses every extracted
//! file, uploads the records in one call and clears the directory before the
//! next batch starts:
//!
//! ```text
//! Idle -> FetchingBatch -> ParsingBatch -> Uploading --+
//!              ^                                       |
//!              +---------------------------------------+
//!                          -> Completed | Failed
//! ```
//!
//! The run stops when the run limit is reached, the manifest runs out, the
//! cancellation token fires, or any phase fails. Uploaded batches are never
//! rolled back.

use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cursor::BatchCursor;
use crate::error::{Phase, PipelineError};
use crate::extract::WorkingDirectory;
use crate::fetcher::ArchiveFetcher;
use crate::manifest::{ManifestEntry, ManifestSource};
use crate::models::EventRecord;
use crate::parser::EventParser;
use crate::upload::Uploader;

/// Observable orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    FetchingBatch,
    ParsingBatch,
    Uploading,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }
}

/// Counters reported at the end of a successful run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Batches that fetched at least one archive
    pub batches: usize,
    pub entries_consumed: usize,
    pub records_parsed: usize,
    pub records_uploaded: usize,
    pub rows_skipped: usize,
    pub elapsed: Duration,
    /// The manifest ran out before the run limit
    pub manifest_exhausted: bool,
    pub cancelled: bool,
}

struct FetchOutcome {
    fetched: usize,
    manifest_exhausted: bool,
}

/// Drives fetch, parse and upload for one run at a time
pub struct Orchestrator {
    fetcher: Arc<dyn ArchiveFetcher>,
    uploader: Arc<dyn Uploader>,
    parser: EventParser,
    work_dir: WorkingDirectory,
    batch_size: usize,
    run_limit: usize,
    cancel: CancellationToken,
    state: watch::Sender<PipelineState>,
}

impl Orchestrator {
    /// Create an orchestrator; fails unless `1 <= batch_size <= run_limit`
    pub fn new(
        fetcher: Arc<dyn ArchiveFetcher>,
        uploader: Arc<dyn Uploader>,
        work_dir: WorkingDirectory,
        batch_size: usize,
        run_limit: usize,
    ) -> gdelt_common::Result<Self> {
        BatchCursor::new(batch_size, run_limit)?;

        let (state, _) = watch::channel(PipelineState::Idle);
        Ok(Self {
            fetcher,
            uploader,
            parser: EventParser::new(),
            work_dir,
            batch_size,
            run_limit,
            cancel: CancellationToken::new(),
            state,
        })
    }

    pub fn with_parser(mut self, parser: EventParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Watch state transitions from another task
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request a graceful stop; the current batch still finishes
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn set_state(&self, state: PipelineState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Pipeline state {:?} -> {:?}", previous, state);
        }
    }

    /// Stream the manifest from `source` and run over it
    pub async fn run_source(
        &self,
        source: &ManifestSource,
        client: &reqwest::Client,
    ) -> Result<RunSummary, PipelineError> {
        let manifest = match source.open(client).await {
            Ok(manifest) => manifest,
            Err(e) => {
                self.set_state(PipelineState::Failed);
                return Err(PipelineError::new(Phase::Manifest, e).with_subject(source.to_string()));
            },
        };
        self.run_stream(manifest.into_stream()).await
    }

    /// Run the batch loop over manifest entries
    pub async fn run<I>(&self, manifest: I) -> Result<RunSummary, PipelineError>
    where
        I: IntoIterator<Item = gdelt_common::Result<ManifestEntry>>,
    {
        self.run_stream(stream::iter(manifest)).await
    }

    /// Run the batch loop over an async sequence of manifest entries
    ///
    /// Entries are pulled one at a time as batches need them.
    pub async fn run_stream<S>(&self, manifest: S) -> Result<RunSummary, PipelineError>
    where
        S: Stream<Item = gdelt_common::Result<ManifestEntry>>,
    {
        let span = info_span!("ingest_run", run_id = %Uuid::new_v4());
        self.run_inner(manifest).instrument(span).await
    }

    async fn run_inner<S>(&self, manifest: S) -> Result<RunSummary, PipelineError>
    where
        S: Stream<Item = gdelt_common::Result<ManifestEntry>>,
    {
        let mut manifest = std::pin::pin!(manifest);
        let start = Instant::now();
        info!(
            batch_size = self.batch_size,
            run_limit = self.run_limit,
            uploader = %self.uploader.describe(),
            "Starting ingestion run"
        );

        let mut cursor = BatchCursor::new(self.batch_size, self.run_limit)
            .map_err(|e| self.fail(PipelineError::new(Phase::Setup, e)))?;

        self.work_dir.prepare().map_err(|e| {
            self.fail(
                PipelineError::new(Phase::Setup, e)
                    .with_subject(self.work_dir.path().display().to_string()),
            )
        })?;

        let mut summary = RunSummary::default();

        loop {
            if self.cancel.is_cancelled() {
                info!("Cancellation requested, stopping after {} batches", summary.batches);
                summary.cancelled = true;
                break;
            }

            cursor.begin_batch();
            let outcome = match self.process_batch(&mut cursor, &mut manifest, &mut summary).await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.work_dir.clear_quietly();
                    return Err(self.fail(e));
                },
            };

            self.work_dir.clear().map_err(|e| {
                self.fail(
                    PipelineError::new(Phase::Cleanup, e)
                        .with_subject(self.work_dir.path().display().to_string()),
                )
            })?;

            if outcome.manifest_exhausted {
                info!("Manifest exhausted after {} entries", cursor.total_consumed());
                summary.manifest_exhausted = true;
                break;
            }
            if cursor.is_exhausted() {
                info!("Run limit of {} entries reached", self.run_limit);
                break;
            }
        }

        summary.entries_consumed = cursor.total_consumed();
        summary.elapsed = start.elapsed();
        self.set_state(PipelineState::Completed);

        info!(
            batches = summary.batches,
            entries = summary.entries_consumed,
            records = summary.records_uploaded,
            rows_skipped = summary.rows_skipped,
            "Ingestion run completed in {:.2?}",
            summary.elapsed
        );
        Ok(summary)
    }

    fn fail(&self, error: PipelineError) -> PipelineError {
        self.set_state(PipelineState::Failed);
        error
    }

    /// One fetch/parse/upload cycle; a batch that fetches nothing stops there
    async fn process_batch<M>(
        &self,
        cursor: &mut BatchCursor,
        manifest: &mut M,
        summary: &mut RunSummary,
    ) -> Result<FetchOutcome, PipelineError>
    where
        M: Stream<Item = gdelt_common::Result<ManifestEntry>> + Unpin,
    {
        let batch_start = Instant::now();
        self.set_state(PipelineState::FetchingBatch);
        let outcome = self.fetch_batch(cursor, manifest).await?;

        if outcome.fetched == 0 {
            debug!("No entries left for batch {}", cursor.batches_started());
            return Ok(outcome);
        }

        self.set_state(PipelineState::ParsingBatch);
        let records = self.parse_batch(summary).await?;

        self.set_state(PipelineState::Uploading);
        self.upload_batch(&records, summary).await?;

        summary.batches += 1;
        info!(
            "Batch {} done: {} archives, {} records in {:.2?}",
            summary.batches,
            outcome.fetched,
            records.len(),
            batch_start.elapsed()
        );
        Ok(outcome)
    }

    async fn fetch_batch<M>(
        &self,
        cursor: &mut BatchCursor,
        manifest: &mut M,
    ) -> Result<FetchOutcome, PipelineError>
    where
        M: Stream<Item = gdelt_common::Result<ManifestEntry>> + Unpin,
    {
        let mut outcome = FetchOutcome {
            fetched: 0,
            manifest_exhausted: false,
        };

        loop {
            let entry = match manifest.next().await {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => return Err(PipelineError::new(Phase::Manifest, e)),
                None => {
                    outcome.manifest_exhausted = true;
                    break;
                },
            };

            let step = cursor.advance();
            let files = self
                .fetcher
                .fetch(&entry, self.work_dir.path())
                .await
                .map_err(|e| PipelineError::new(Phase::Fetch, e).with_subject(entry.url.clone()))?;
            debug!("Fetched {} ({} files)", entry.file_name(), files.len());
            outcome.fetched += 1;

            if step.stop_batch {
                break;
            }
            if self.cancel.is_cancelled() {
                debug!("Cancellation requested, closing batch early");
                break;
            }
        }

        Ok(outcome)
    }

    /// Parse every extracted file on a blocking task
    async fn parse_batch(&self, summary: &mut RunSummary) -> Result<Vec<EventRecord>, PipelineError> {
        let work_dir = self.work_dir.clone();
        let parser = self.parser.clone();

        let (records, rows_skipped) =
            tokio::task::spawn_blocking(move || parse_files(&work_dir, &parser))
                .await
                .map_err(|e| PipelineError::new(Phase::Parse, e))??;

        summary.rows_skipped += rows_skipped;
        summary.records_parsed += records.len();
        Ok(records)
    }

    async fn upload_batch(
        &self,
        records: &[EventRecord],
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        if records.is_empty() {
            warn!("Batch produced no records, skipping upload");
            return Ok(());
        }

        let upload_start = Instant::now();
        let report = self.uploader.upload(records).await.map_err(|e| {
            PipelineError::new(Phase::Upload, e).with_subject(self.uploader.describe())
        })?;

        summary.records_uploaded += report.inserted;
        info!("Uploaded {} records in {:.2?}", report.inserted, upload_start.elapsed());
        Ok(())
    }
}

/// Records of all files in the working directory, in path order
fn parse_files(
    work_dir: &WorkingDirectory,
    parser: &EventParser,
) -> Result<(Vec<EventRecord>, usize), PipelineError> {
    let files = work_dir.list_files().map_err(|e| {
        PipelineError::new(Phase::Parse, e).with_subject(work_dir.path().display().to_string())
    })?;

    let mut records = Vec::new();
    let mut rows_skipped = 0;
    for file in &files {
        let parsed = parser.parse_file(file).map_err(|e| {
            PipelineError::new(Phase::Parse, e).with_subject(file.display().to_string())
        })?;
        rows_skipped += parsed.rows_skipped;
        records.extend(parsed.records);
    }

    Ok((records, rows_skipped))
}
