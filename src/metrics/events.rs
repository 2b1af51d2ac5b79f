//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when hierarchical records are read from a source.
pub struct RecordsProcessed {
    pub count: u64,
}

impl InternalEvent for RecordsProcessed {
    fn emit(self) {
        trace!(count = self.count, "Records processed");
        counter!("floe_records_processed_total").increment(self.count);
    }
}

/// Event emitted when flattened rows are handed to the CSV writer.
pub struct RowsWritten {
    pub count: u64,
}

impl InternalEvent for RowsWritten {
    fn emit(self) {
        trace!(count = self.count, "Rows written");
        counter!("floe_rows_written_total").increment(self.count);
    }
}

/// Event emitted when compressed bytes are read from source.
pub struct BytesRead {
    pub bytes: u64,
}

impl InternalEvent for BytesRead {
    fn emit(self) {
        trace!(bytes = self.bytes, "Bytes read");
        counter!("floe_bytes_read_total").increment(self.bytes);
    }
}

/// Event emitted when a CSV chunk reaches its byte budget and is sealed.
pub struct ChunkFlushed {
    pub bytes: usize,
    pub rows: usize,
}

impl InternalEvent for ChunkFlushed {
    fn emit(self) {
        trace!(bytes = self.bytes, rows = self.rows, "Chunk flushed");
        counter!("floe_chunks_flushed_total").increment(1);
        counter!("floe_bytes_written_total").increment(self.bytes as u64);
    }
}

/// Status of a processed file.
#[derive(Debug, Clone, Copy)]
pub enum FileStatus {
    Success,
    Skipped,
    Failed,
}

impl FileStatus {
    fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Success => "success",
            FileStatus::Skipped => "skipped",
            FileStatus::Failed => "failed",
        }
    }
}

/// Stage at which a file failure occurred.
#[derive(Debug, Clone, Copy)]
pub enum FailureStage {
    Download,
    Decompress,
    Parse,
    Write,
    Upload,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Download => "download",
            FailureStage::Decompress => "decompress",
            FailureStage::Parse => "parse",
            FailureStage::Write => "write",
            FailureStage::Upload => "upload",
        }
    }
}

/// Event emitted when a file fails processing.
pub struct FileFailed {
    pub stage: FailureStage,
}

impl InternalEvent for FileFailed {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), "File failed");
        counter!("floe_files_failed_total", "stage" => self.stage.as_str()).increment(1);
    }
}

/// Event emitted when an input file is processed.
pub struct FileProcessed {
    pub status: FileStatus,
}

impl InternalEvent for FileProcessed {
    fn emit(self) {
        trace!(status = self.status.as_str(), "File processed");
        counter!("floe_files_processed_total", "status" => self.status.as_str()).increment(1);
    }
}

// ============================================================================
// Histogram events for timing
// ============================================================================

/// Event emitted when a file download completes.
pub struct FileDownloadCompleted {
    pub duration: Duration,
}

impl InternalEvent for FileDownloadCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            "File download completed"
        );
        histogram!("floe_file_download_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when file decompression completes.
pub struct FileDecompressionCompleted {
    pub duration: Duration,
}

impl InternalEvent for FileDecompressionCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            "File decompression completed"
        );
        histogram!("floe_file_decompression_duration_seconds")
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a chunk upload completes.
pub struct ChunkUploadCompleted {
    pub duration: Duration,
}

impl InternalEvent for ChunkUploadCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            "Chunk upload completed"
        );
        histogram!("floe_chunk_upload_duration_seconds").record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    List,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::List => "list",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "floe_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}
