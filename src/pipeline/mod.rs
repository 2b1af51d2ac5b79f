//! Main processing pipeline.
//!
//! Pulls hierarchical records out of a source one at a time, flattens and
//! expands each into flat rows, and appends the rows to a chunked CSV
//! writer. Chunks are uploaded as soon as they seal, so memory stays
//! bounded by one record's expansion plus the open chunk no matter how
//! large the input is.
//!
//! Processing is deliberately single-threaded: a failure leaves a clean
//! boundary (chunks uploaded before it stand, nothing after it was
//! started), and chunk sequence numbers stay deterministic.

use bytes::Bytes;
use snafu::prelude::*;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::emit;
use crate::error::{
    ChunkUploadSnafu, CsvSnafu, PipelineError, PipelineStorageSnafu, SourceError, SourceSnafu,
};
use crate::metrics::events::{
    BytesRead, ChunkUploadCompleted, FailureStage, FileDownloadCompleted, FileFailed,
    FileProcessed, FileStatus, RecordsProcessed, RowsWritten,
};
use crate::record::expand::expand;
use crate::record::flatten::flatten;
use crate::sink::FinishedChunk;
use crate::sink::csv::ChunkedCsvWriter;
use crate::source::{JsonRowSource, RowSource, decompress};
use crate::storage::{StorageProvider, split_url};

/// Statistics about the pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub files_processed: usize,
    pub files_empty: usize,
    pub records_read: usize,
    pub rows_written: usize,
    pub chunks_uploaded: usize,
    pub bytes_uploaded: usize,
}

/// Main processing pipeline.
pub struct Pipeline {
    config: Config,
    source: StorageProvider,
    /// Set when the source URL names a single object rather than a prefix.
    source_file: Option<String>,
    sink: StorageProvider,
    stats: PipelineStats,
}

impl Pipeline {
    /// Create a new pipeline from configuration.
    pub async fn new(config: Config) -> Result<Self, PipelineError> {
        let (source_base, source_file) = split_url(&config.source.url);

        let source = StorageProvider::for_url_with_options(
            &source_base,
            config.source.storage_options.clone(),
        )
        .await
        .context(PipelineStorageSnafu)?;

        let sink = StorageProvider::for_url_with_options(
            &config.sink.url,
            config.sink.storage_options.clone(),
        )
        .await
        .context(PipelineStorageSnafu)?;

        Ok(Self {
            config,
            source,
            source_file,
            sink,
            stats: PipelineStats::default(),
        })
    }

    /// Run the pipeline over every input file.
    ///
    /// Fails on the first file that cannot be processed; chunks uploaded
    /// before the failure stand.
    pub async fn run(&mut self) -> Result<PipelineStats, PipelineError> {
        info!("Starting pipeline");

        let files = self.list_input_files().await?;
        info!("Found {} source files", files.len());

        if files.is_empty() {
            warn!("No input files under {}", self.config.source.url);
            return Ok(self.stats.clone());
        }

        for file in files {
            self.process_file(&file).await?;
        }

        info!("Pipeline completed: {:?}", self.stats);
        Ok(self.stats.clone())
    }

    /// Statistics accumulated so far.
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// List input files, either the single configured object or everything
    /// under the configured prefix that looks like an input.
    async fn list_input_files(&self) -> Result<Vec<String>, PipelineError> {
        match &self.source_file {
            Some(file) => Ok(vec![file.clone()]),
            None => {
                let files = self
                    .source
                    .list_files()
                    .await
                    .context(PipelineStorageSnafu)?;
                Ok(files.into_iter().filter(|f| is_input_file(f)).collect())
            }
        }
    }

    async fn process_file(&mut self, file: &str) -> Result<(), PipelineError> {
        debug!("[>] Processing file: {}", file);
        let start = Instant::now();
        let compressed = match self.source.get(file).await {
            Ok(bytes) => bytes,
            Err(source) => {
                emit!(FileProcessed {
                    status: FileStatus::Failed
                });
                emit!(FileFailed {
                    stage: FailureStage::Download
                });
                return Err(source).context(PipelineStorageSnafu);
            }
        };
        emit!(BytesRead {
            bytes: compressed.len() as u64
        });
        emit!(FileDownloadCompleted {
            duration: start.elapsed(),
        });

        match self.transduce(compressed, file).await {
            Ok(0) => {
                info!("No rows produced from {}", file);
                self.stats.files_empty += 1;
                emit!(FileProcessed {
                    status: FileStatus::Skipped
                });
            }
            Ok(rows) => {
                self.stats.files_processed += 1;
                emit!(FileProcessed {
                    status: FileStatus::Success
                });
                debug!("[-] Finished file: {} ({} rows)", file, rows);
            }
            Err(error) => {
                emit!(FileProcessed {
                    status: FileStatus::Failed
                });
                emit!(FileFailed {
                    stage: failure_stage(&error)
                });
                return Err(error);
            }
        }
        Ok(())
    }

    /// Decompress and parse one file, then write its records out.
    ///
    /// Returns the number of rows written.
    async fn transduce(&mut self, compressed: Bytes, file: &str) -> Result<usize, PipelineError> {
        let data = decompress(compressed, self.config.source.compression, file)
            .context(SourceSnafu { path: file })?;
        let source =
            JsonRowSource::new(data, &self.config.source).context(SourceSnafu { path: file })?;
        self.write_records(source, file).await
    }

    /// Flatten, expand and write every record from `source`, uploading
    /// chunks as they seal. Chunk files are named `<stem>_<seq>.csv` after
    /// `name`.
    pub async fn write_records<S: RowSource>(
        &mut self,
        mut source: S,
        name: &str,
    ) -> Result<usize, PipelineError> {
        let base = chunk_base_name(name);
        let mut writer = ChunkedCsvWriter::new(self.config.sink.max_chunk_bytes);
        let max_records = self.config.source.max_records.unwrap_or(usize::MAX);
        let mut records = 0usize;
        let mut rows = 0usize;

        while let Some(record) = source
            .next_record()
            .context(SourceSnafu { path: name })?
        {
            records += 1;
            for row in expand(flatten(record)) {
                writer.write_row(&row).context(CsvSnafu)?;
                rows += 1;
            }
            for chunk in writer.take_finished_chunks() {
                self.upload_chunk(&base, chunk).await?;
            }
            if records >= max_records {
                info!("Reached max_records={} for {}", max_records, name);
                break;
            }
        }

        for chunk in writer.close() {
            self.upload_chunk(&base, chunk).await?;
        }

        emit!(RecordsProcessed {
            count: records as u64
        });
        emit!(RowsWritten { count: rows as u64 });
        self.stats.records_read += records;
        self.stats.rows_written += rows;
        Ok(rows)
    }

    async fn upload_chunk(&mut self, base: &str, chunk: FinishedChunk) -> Result<(), PipelineError> {
        let name = format!("{}_{}.csv", base, chunk.seq);
        let size = chunk.bytes.len();
        let start = Instant::now();
        self.sink
            .put(name.as_str(), chunk.bytes)
            .await
            .context(ChunkUploadSnafu { path: name.clone() })?;
        emit!(ChunkUploadCompleted {
            duration: start.elapsed(),
        });
        self.stats.chunks_uploaded += 1;
        self.stats.bytes_uploaded += size;
        debug!(
            "[+] Uploaded {} ({} rows, {} bytes)",
            name, chunk.record_count, size
        );
        Ok(())
    }
}

/// Derive the chunk name stem from an input file path. Compression and
/// format extensions drop; directories are kept.
fn chunk_base_name(file: &str) -> String {
    let stem = file
        .strip_suffix(".gz")
        .or_else(|| file.strip_suffix(".zst"))
        .unwrap_or(file);
    let stem = stem
        .strip_suffix(".json")
        .or_else(|| stem.strip_suffix(".jsonl"))
        .or_else(|| stem.strip_suffix(".ndjson"))
        .unwrap_or(stem);
    stem.to_string()
}

fn is_input_file(path: &str) -> bool {
    let stem = path
        .strip_suffix(".gz")
        .or_else(|| path.strip_suffix(".zst"))
        .unwrap_or(path);
    stem.ends_with(".json") || stem.ends_with(".jsonl") || stem.ends_with(".ndjson")
}

fn failure_stage(error: &PipelineError) -> FailureStage {
    match error {
        PipelineError::Source { source, .. } => match source {
            SourceError::GzipDecompression { .. } | SourceError::ZstdDecompression { .. } => {
                FailureStage::Decompress
            }
            _ => FailureStage::Parse,
        },
        PipelineError::Csv { .. } => FailureStage::Write,
        PipelineError::ChunkUpload { .. } => FailureStage::Upload,
        _ => FailureStage::Download,
    }
}

/// Run the pipeline with the given configuration.
pub async fn run_pipeline(config: Config) -> Result<PipelineStats, PipelineError> {
    let mut pipeline = Pipeline::new(config).await?;
    pipeline.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_stats_default() {
        let stats = PipelineStats::default();
        assert_eq!(stats.files_processed, 0);
        assert_eq!(stats.rows_written, 0);
    }

    #[test]
    fn test_chunk_base_name_strips_extensions() {
        assert_eq!(chunk_base_name("events.json"), "events");
        assert_eq!(chunk_base_name("events.json.gz"), "events");
        assert_eq!(chunk_base_name("events.ndjson.zst"), "events");
        assert_eq!(chunk_base_name("date=2026-01-01/part1.jsonl"), "date=2026-01-01/part1");
        assert_eq!(chunk_base_name("batch"), "batch");
    }

    #[test]
    fn test_is_input_file() {
        assert!(is_input_file("events.json"));
        assert!(is_input_file("events.ndjson.gz"));
        assert!(is_input_file("a/b/events.jsonl.zst"));
        assert!(!is_input_file("events.csv"));
        assert!(!is_input_file("events.json.bak"));
    }
}
