//! Sink coordinator for writing chunked CSV.
//!
//! Rows are serialized into byte-budgeted chunks; each finished chunk is a
//! self-contained CSV file with its own header line.

pub mod csv;

pub use csv::{ChunkedCsvWriter, WriterStats};

/// A completed CSV chunk, ready for upload.
#[derive(Debug, Clone)]
pub struct FinishedChunk {
    /// 1-based position of this chunk within its run.
    pub seq: usize,
    /// Rows in the chunk, header line excluded.
    pub record_count: usize,
    /// The encoded chunk, header line included.
    pub bytes: bytes::Bytes,
}
