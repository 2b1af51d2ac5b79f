//! Record sources.
//!
//! A row source produces a lazy, forward-only sequence of hierarchical
//! records: `next_record() -> Ok(Some(record))` until end of stream. The
//! JSON source covers whole-document and line-delimited input; `MemorySource`
//! adapts an already-decoded record sequence (e.g. typed tabular rows) to the
//! same interface.

pub mod json;

use bytes::Bytes;
use snafu::prelude::*;
use std::io::Read;
use std::time::Instant;
use tracing::debug;

use crate::config::CompressionFormat;
use crate::emit;
use crate::error::{GzipDecompressionSnafu, SourceError, ZstdDecompressionSnafu};
use crate::metrics::events::FileDecompressionCompleted;
use crate::record::Value;

pub use json::JsonRowSource;

/// A lazy, forward-only sequence of hierarchical records.
pub trait RowSource {
    /// The next record, or `None` at end of stream.
    fn next_record(&mut self) -> Result<Option<Value>, SourceError>;
}

/// An in-memory record sequence behind the [`RowSource`] interface.
///
/// Typed tabular readers decode whole rows into [`Value`] mappings up front
/// and hand them to the pipeline through this adapter.
pub struct MemorySource {
    records: std::vec::IntoIter<Value>,
}

impl MemorySource {
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records: records.into_iter(),
        }
    }
}

impl RowSource for MemorySource {
    fn next_record(&mut self) -> Result<Option<Value>, SourceError> {
        Ok(self.records.next())
    }
}

/// Decompress fetched bytes according to the configured format.
pub fn decompress(
    compressed: Bytes,
    compression: CompressionFormat,
    path: &str,
) -> Result<Bytes, SourceError> {
    if compression == CompressionFormat::None {
        return Ok(compressed);
    }

    let start = Instant::now();
    let decompressed = match compression {
        CompressionFormat::Gzip => {
            let mut decoder = flate2::read::MultiGzDecoder::new(&compressed[..]);
            let mut buf = Vec::new();
            decoder
                .read_to_end(&mut buf)
                .context(GzipDecompressionSnafu { path })?;
            Bytes::from(buf)
        }
        CompressionFormat::Zstd => {
            Bytes::from(zstd::decode_all(&compressed[..]).context(ZstdDecompressionSnafu { path })?)
        }
        CompressionFormat::None => compressed.clone(),
    };
    emit!(FileDecompressionCompleted {
        duration: start.elapsed()
    });

    debug!(
        "Decompressed {} -> {} bytes for {}",
        compressed.len(),
        decompressed.len(),
        path
    );

    Ok(decompressed)
}
