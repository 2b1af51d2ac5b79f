//! floe: A library for streaming nested JSON records to chunked CSV.
//!
//! This library provides components for reading JSON or NDJSON documents,
//! flattening nested records into flat key/value rows, expanding repeating
//! groups one array at a time, and writing the rows as byte-budgeted CSV
//! chunks to cloud or local storage.
//!
//! # Example
//!
//! ```ignore
//! use floe::{Config, run_pipeline, error::PipelineError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("config.yaml")?;
//!     let stats = run_pipeline(config).await?;
//!     println!("Wrote {} rows", stats.rows_written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod sink;
pub mod source;
pub mod storage;

// Re-export main types
pub use config::Config;
pub use pipeline::{Pipeline, PipelineStats, run_pipeline};
pub use record::Value;
pub use storage::StorageProvider;
