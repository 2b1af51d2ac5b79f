//! floe: A standalone tool for streaming nested JSON records to chunked CSV.
//!
//! This tool reads JSON or NDJSON documents from various storage backends
//! (S3, GCS, Azure, local filesystem), flattens each nested record into flat
//! key/value rows, expands repeating groups one array at a time, and writes
//! the rows out as fixed-size CSV chunks.

mod config;
mod error;
mod metrics;
mod pipeline;
mod record;
mod sink;
mod source;
mod storage;

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError};
use pipeline::run_pipeline;

/// Nested JSON to chunked CSV streaming tool.
#[derive(Parser, Debug)]
#[command(name = "floe")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("floe starting");

    // Load configuration
    let config = build_config(&args)?;

    // Initialize metrics if enabled
    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Source: {}", config.source.url);
        info!("  Format: {:?}", config.source.format);
        info!("  Compression: {:?}", config.source.compression);
        info!("  Engine: {:?}", config.source.engine);
        if let Some(path) = &config.source.nested_path {
            info!("  Nested path: {}", path);
        }
        info!("Sink: {}", config.sink.url);
        info!("  Max chunk bytes: {}", config.sink.max_chunk_bytes);
        info!("Configuration is valid");
        return Ok(());
    }

    // Run the pipeline
    let stats = run_pipeline(config).await?;

    info!("Pipeline completed successfully");
    info!("  Files processed: {}", stats.files_processed);
    info!("  Files empty: {}", stats.files_empty);
    info!("  Records read: {}", stats.records_read);
    info!("  Rows written: {}", stats.rows_written);
    info!("  Chunks uploaded: {}", stats.chunks_uploaded);
    info!("  Bytes uploaded: {}", stats.bytes_uploaded);

    Ok(())
}

/// Build configuration from arguments.
fn build_config(args: &Args) -> Result<Config, PipelineError> {
    Config::from_file(&args.config).context(ConfigSnafu)
}
