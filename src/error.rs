//! Error types for floe using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error"))]
    S3Config { source: object_store::Error },

    /// GCS configuration error.
    #[snafu(display("GCS configuration error"))]
    GcsConfig { source: object_store::Error },

    /// Azure configuration error.
    #[snafu(display("Azure configuration error"))]
    AzureConfig { source: object_store::Error },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Source URL is empty.
    #[snafu(display("Source url cannot be empty"))]
    EmptySourceUrl,

    /// Sink URL is empty.
    #[snafu(display("Sink url cannot be empty"))]
    EmptySinkUrl,

    /// Chunk byte budget is zero.
    #[snafu(display("max_chunk_bytes must be greater than zero"))]
    InvalidChunkBytes,

    /// Read batch size is zero.
    #[snafu(display("read_batch_size must be greater than zero"))]
    InvalidBatchSize,

    /// Record cap is zero.
    #[snafu(display("max_records must be greater than zero when set"))]
    InvalidMaxRecords,

    /// Nested path is present but empty.
    #[snafu(display("nested_path cannot be empty when set"))]
    EmptyNestedPath,

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Source Errors ============

/// Errors that can occur while turning input bytes into records.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// Gzip decompression failed.
    #[snafu(display("Gzip decompression failed for {path}"))]
    GzipDecompression {
        source: std::io::Error,
        path: String,
    },

    /// Zstd decompression failed.
    #[snafu(display("Zstd decompression failed for {path}"))]
    ZstdDecompression {
        source: std::io::Error,
        path: String,
    },

    /// A framed record failed to parse.
    #[snafu(display("Malformed record at byte {offset}"))]
    MalformedRecord {
        offset: usize,
        source: serde_json::Error,
    },

    /// An NDJSON line failed to parse.
    #[snafu(display("Malformed record at line {line}"))]
    MalformedLine {
        line: usize,
        source: serde_json::Error,
    },

    /// The document failed to parse as a whole.
    #[snafu(display("Malformed document"))]
    MalformedDocument { source: serde_json::Error },

    /// The byte stream broke the expected nested-structure syntax.
    #[snafu(display("{message} at byte {offset}"))]
    Syntax { offset: usize, message: String },

    /// The document root is neither a mapping nor a sequence.
    #[snafu(display("Unsupported root shape: document begins with {found:?} at byte {offset}"))]
    UnsupportedRootShape { found: char, offset: usize },

    /// A nested path segment was not found.
    #[snafu(display("Nested path {path:?} not found: missing segment {segment:?}"))]
    NestedPathMissing { path: String, segment: String },

    /// The nested path resolved to something other than a sequence.
    #[snafu(display("Nested path {path:?} does not select a sequence"))]
    NestedPathNotSequence { path: String },
}

// ============ Csv Errors ============

/// Errors that can occur during CSV chunk writing.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CsvError {
    /// Failed to serialize the header row.
    #[snafu(display("Failed to serialize CSV header"))]
    HeaderSerialize { source: csv::Error },

    /// Failed to serialize a data row.
    #[snafu(display("Failed to serialize CSV row"))]
    RowSerialize { source: csv::Error },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Storage error.
    #[snafu(display("Storage error"))]
    PipelineStorage { source: StorageError },

    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Source error, with the input file it occurred in.
    #[snafu(display("Source error while reading {path}"))]
    Source { path: String, source: SourceError },

    /// CSV writer error.
    #[snafu(display("CSV error"))]
    Csv { source: CsvError },

    /// A finished chunk could not be persisted. Chunks uploaded before this
    /// one stand; there is no cross-chunk rollback.
    #[snafu(display("Failed to upload chunk {path}"))]
    ChunkUpload { path: String, source: StorageError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },
}
