//! Configuration parsing and validation.
//!
//! Handles loading configuration from YAML files, interpolating environment
//! variables into the raw text, and validating the result before the
//! pipeline starts.

mod vars;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{
    ConfigError, EmptyNestedPathSnafu, EmptySinkUrlSnafu, EmptySourceUrlSnafu,
    EnvInterpolationSnafu, InvalidBatchSizeSnafu, InvalidChunkBytesSnafu, InvalidMaxRecordsSnafu,
    ReadFileSnafu, YamlParseSnafu,
};

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Main configuration structure for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    /// Metrics configuration (optional, enabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

/// Source configuration for reading input documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// URL of the input: a single object, or a prefix ending in `/` whose
    /// data files are processed in sequence.
    /// Examples: "s3://bucket/exports/orders.json", "/local/exports/"
    pub url: String,

    /// Input framing.
    #[serde(default)]
    pub format: InputFormat,

    /// Compression format of input files.
    #[serde(default)]
    pub compression: CompressionFormat,

    /// JSON parsing strategy, fixed at startup and handed to the row source.
    #[serde(default)]
    pub engine: ParserEngine,

    /// Dotted path selecting a sub-array of a mapping-rooted document to
    /// stream as the record sequence (e.g. "payload.items").
    #[serde(default)]
    pub nested_path: Option<String>,

    /// Records decoded per refill of the source's row buffer. Tuning knob
    /// only; has no effect on output.
    #[serde(default = "default_read_batch_size")]
    pub read_batch_size: usize,

    /// Stop after this many records per input file.
    #[serde(default)]
    pub max_records: Option<usize>,

    /// Storage options (credentials, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

fn default_read_batch_size() -> usize {
    50_000
}

/// Sink configuration for writing CSV chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// URL prefix the chunk files are written under.
    /// Examples: "s3://bucket/flattened/", "/local/output/"
    pub url: String,

    /// Byte budget for one output chunk, header included (default: 100 MiB).
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,

    /// Storage options (credentials, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

fn default_max_chunk_bytes() -> usize {
    100 * MB
}

/// Input framing of source files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// One JSON document per file.
    #[default]
    Json,
    /// One JSON record per line.
    Ndjson,
}

/// Compression format for source files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    #[default]
    None,
    Gzip,
    Zstd,
}

/// JSON parsing strategy for whole-document inputs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParserEngine {
    /// Frame one record at a time from the raw bytes.
    #[default]
    Streaming,
    /// Parse the whole document up front, then iterate.
    Document,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;

        let content = if interpolate_env {
            let result = vars::interpolate(&content);
            if !result.is_ok() {
                let error_msg = result.errors.join("\n");
                return EnvInterpolationSnafu { message: error_msg }.fail();
            }
            result.text
        } else {
            content
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.source.url.is_empty(), EmptySourceUrlSnafu);
        ensure!(!self.sink.url.is_empty(), EmptySinkUrlSnafu);
        ensure!(self.sink.max_chunk_bytes > 0, InvalidChunkBytesSnafu);
        ensure!(self.source.read_batch_size > 0, InvalidBatchSizeSnafu);
        if let Some(path) = &self.source.nested_path {
            ensure!(!path.trim().is_empty(), EmptyNestedPathSnafu);
        }
        if let Some(limit) = self.source.max_records {
            ensure!(limit > 0, InvalidMaxRecordsSnafu);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_yaml_parsing_with_defaults() {
        let yaml = r#"
source:
  url: "s3://bucket/exports/orders.json"

sink:
  url: "s3://bucket/flattened/"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.source.format, InputFormat::Json);
        assert_eq!(config.source.compression, CompressionFormat::None);
        assert_eq!(config.source.engine, ParserEngine::Streaming);
        assert_eq!(config.source.read_batch_size, 50_000);
        assert_eq!(config.source.nested_path, None);
        assert_eq!(config.sink.max_chunk_bytes, 100 * MB);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_config_yaml_parsing_full() {
        let yaml = r#"
source:
  url: "file:///data/in/"
  format: ndjson
  compression: gzip
  engine: document
  nested_path: "payload.items"
  read_batch_size: 1000
  max_records: 500

sink:
  url: "file:///data/out/"
  max_chunk_bytes: 1048576

metrics:
  enabled: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.source.format, InputFormat::Ndjson);
        assert_eq!(config.source.compression, CompressionFormat::Gzip);
        assert_eq!(config.source.engine, ParserEngine::Document);
        assert_eq!(config.source.nested_path.as_deref(), Some("payload.items"));
        assert_eq!(config.source.max_records, Some(500));
        assert_eq!(config.sink.max_chunk_bytes, MB);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_validate_rejects_zero_chunk_budget() {
        let yaml = r#"
source:
  url: "/in/data.json"
sink:
  url: "/out/"
  max_chunk_bytes: 0
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChunkBytes)
        ));
    }

    #[test]
    fn test_validate_rejects_blank_nested_path() {
        let yaml = r#"
source:
  url: "/in/data.json"
  nested_path: "  "
sink:
  url: "/out/"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyNestedPath)
        ));
    }

    #[test]
    fn test_validate_rejects_empty_urls() {
        let yaml = r#"
source:
  url: ""
sink:
  url: "/out/"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::EmptySourceUrl)));
    }
}
