//! GDELT Ingest - batch loader for the GDELT 2.0 event feed

use anyhow::{Context, Result};
use clap::Parser;
use gdelt_common::logging::{init_logging, LogConfig, LogLevel};
use gdelt_ingest::config::IngestConfig;
use gdelt_ingest::extract::WorkingDirectory;
use gdelt_ingest::fetcher::HttpArchiveFetcher;
use gdelt_ingest::manifest::ManifestSource;
use gdelt_ingest::parser::EventParser;
use gdelt_ingest::pipeline::Orchestrator;
use serde_jsonlines::WriteExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "gdelt-ingest")]
#[command(author, version, about = "GDELT 2.0 event loader")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Download, parse and upload export archives in batches
    Run {
        /// Manifest URL or local path
        #[arg(long)]
        manifest_url: Option<String>,

        /// Scratch directory for extracted archives
        #[arg(short, long)]
        working_dir: Option<PathBuf>,

        /// Archives per batch
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Archives per run
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output directory, file:// URL or postgres:// URL
        #[arg(short, long)]
        destination: Option<String>,

        /// Collection (file stem or table name)
        #[arg(short, long)]
        collection: Option<String>,

        /// Skip size and MD5 verification of downloaded archives
        #[arg(long)]
        no_verify: bool,

        /// Do not derive Location geo points
        #[arg(long)]
        no_geo: bool,

        /// Show download progress bars
        #[arg(long)]
        progress: bool,
    },

    /// Parse one export file and print its documents as JSON lines
    Parse {
        /// Export file (tab-delimited, 61 columns)
        file: PathBuf,

        /// Do not derive Location geo points
        #[arg(long)]
        no_geo: bool,
    },

    /// List export entries from the manifest
    Manifest {
        /// Manifest URL or local path
        #[arg(long)]
        manifest_url: Option<String>,

        /// Maximum entries to list
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("gdelt-ingest")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run {
            manifest_url,
            working_dir,
            batch_size,
            limit,
            destination,
            collection,
            no_verify,
            no_geo,
            progress,
        } => {
            // Validated after command-line overrides are applied
            let mut config = IngestConfig::from_env();
            if let Some(url) = manifest_url {
                config.manifest_url = url;
            }
            if let Some(dir) = working_dir {
                config.working_dir = dir;
            }
            if let Some(size) = batch_size {
                config.batch_size = size;
            }
            if let Some(limit) = limit {
                config.run_limit = limit;
            }
            if let Some(destination) = destination {
                config.destination = destination;
            }
            if let Some(collection) = collection {
                config.collection = collection;
            }
            config.verify_checksums &= !no_verify;
            config.geo_points &= !no_geo;
            config.show_progress |= progress;
            config.validate()?;

            run(config).await?;
        },
        Command::Parse { file, no_geo } => {
            let parser = EventParser::new().with_geo_points(!no_geo);
            let parsed = parser.parse_file(&file)?;

            let mut stdout = std::io::stdout().lock();
            stdout
                .write_json_lines(&parsed.records)
                .context("Failed to write documents")?;
            stdout.flush()?;
        },
        Command::Manifest {
            manifest_url,
            limit,
        } => {
            let url = manifest_url.unwrap_or_else(|| IngestConfig::default().manifest_url);
            let client = reqwest::Client::new();
            let mut reader = ManifestSource::parse(&url).open(&client).await?;

            let mut remaining = limit.unwrap_or(usize::MAX);
            while remaining > 0 {
                let Some(entry) = reader.next_entry().await else {
                    break;
                };
                remaining -= 1;

                match entry {
                    Ok(entry) => {
                        let mut stdout = std::io::stdout().lock();
                        writeln!(
                            stdout,
                            "{}\t{}\t{}",
                            entry.size.map(|s| s.to_string()).unwrap_or_default(),
                            entry.md5.as_deref().unwrap_or(""),
                            entry.url
                        )?;
                    },
                    Err(e) => warn!("{}", e),
                }
            }
        },
    }

    Ok(())
}

async fn run(config: IngestConfig) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()
        .context("Failed to build HTTP client")?;

    let destination = config.destination()?;
    info!("Writing to {} (collection '{}')", destination, config.collection);
    let uploader = destination.connect(&config.collection).await?;

    let fetcher = HttpArchiveFetcher::new(client.clone())
        .with_max_retries(config.max_retries)
        .with_checksum_verification(config.verify_checksums)
        .with_progress(config.show_progress);

    let orchestrator = Orchestrator::new(
        Arc::new(fetcher),
        uploader,
        WorkingDirectory::new(&config.working_dir),
        config.batch_size,
        config.run_limit,
    )?
    .with_parser(EventParser::new().with_geo_points(config.geo_points));

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current batch");
            cancel.cancel();
        }
    });

    let source = ManifestSource::parse(&config.manifest_url);
    match orchestrator.run_source(&source, &client).await {
        Ok(summary) => {
            info!(
                "Loaded {} records from {} archives in {} batches",
                summary.records_uploaded, summary.entries_consumed, summary.batches
            );
            info!("Total time taken: {:.2?}", summary.elapsed);
            Ok(())
        },
        Err(e) => {
            error!(phase = %e.phase, "Ingestion failed: {}", e);
            Err(e.into())
        },
    }
}
