//! Chunked CSV writer.
//!
//! Buffers encoded rows and rolls a chunk whenever the next row would push
//! the buffer past the byte budget. The column order is captured from the
//! first row of the run and every chunk repeats the same header line, so
//! each chunk stands alone as a complete CSV file.

use snafu::prelude::*;
use std::mem;

use super::FinishedChunk;
use crate::emit;
use crate::error::{CsvError, HeaderSerializeSnafu, RowSerializeSnafu};
use crate::metrics::events::ChunkFlushed;
use crate::record::FlatRow;

/// Statistics for tracking writer state.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriterStats {
    /// Rows written across all chunks.
    pub rows_written: usize,
    /// Chunks finished so far.
    pub chunks_finished: usize,
    /// Encoded bytes across all finished chunks.
    pub bytes_written: usize,
}

/// CSV writer that buffers rows and rolls chunks at a byte budget.
pub struct ChunkedCsvWriter {
    max_chunk_bytes: usize,
    /// Column order fixed by the first row of the run.
    columns: Option<Vec<String>>,
    /// Encoded header line, repeated at the top of every chunk.
    header: Vec<u8>,
    /// The open chunk: header line plus the rows appended so far.
    buf: Vec<u8>,
    rows_in_chunk: usize,
    next_seq: usize,
    finished_chunks: Vec<FinishedChunk>,
    stats: WriterStats,
}

impl ChunkedCsvWriter {
    pub fn new(max_chunk_bytes: usize) -> Self {
        Self {
            max_chunk_bytes,
            columns: None,
            header: Vec::new(),
            buf: Vec::new(),
            rows_in_chunk: 0,
            next_seq: 1,
            finished_chunks: Vec::new(),
            stats: WriterStats::default(),
        }
    }

    /// Append one row, rolling the open chunk first when the row would push
    /// it past the byte budget.
    ///
    /// Columns absent from `row` are written empty; columns `row` carries
    /// beyond the header are dropped.
    pub fn write_row(&mut self, row: &FlatRow) -> Result<(), CsvError> {
        if self.columns.is_none() {
            let columns: Vec<String> = row.keys().cloned().collect();
            self.header = encode_line(columns.iter().map(String::as_str))
                .context(HeaderSerializeSnafu)?;
            self.buf.extend_from_slice(&self.header);
            self.columns = Some(columns);
        }
        let columns = self.columns.as_ref().expect("columns are set above");
        let cells = columns
            .iter()
            .map(|name| row.get(name).map(String::as_str).unwrap_or(""));
        let line = encode_line(cells).context(RowSerializeSnafu)?;

        // Only a chunk that already holds a row may be rolled: a row larger
        // than the whole budget still lands somewhere.
        if self.rows_in_chunk > 0 && self.buf.len() + line.len() > self.max_chunk_bytes {
            self.roll_chunk();
        }
        self.buf.extend_from_slice(&line);
        self.rows_in_chunk += 1;
        self.stats.rows_written += 1;
        Ok(())
    }

    /// Finish the open chunk and start a fresh one under the same header.
    fn roll_chunk(&mut self) {
        let bytes = bytes::Bytes::from(mem::replace(&mut self.buf, self.header.clone()));

        emit!(ChunkFlushed {
            bytes: bytes.len(),
            rows: self.rows_in_chunk,
        });
        self.stats.chunks_finished += 1;
        self.stats.bytes_written += bytes.len();
        self.finished_chunks.push(FinishedChunk {
            seq: self.next_seq,
            record_count: self.rows_in_chunk,
            bytes,
        });
        self.next_seq += 1;
        self.rows_in_chunk = 0;
    }

    /// Take finished chunks without closing.
    pub fn take_finished_chunks(&mut self) -> Vec<FinishedChunk> {
        mem::take(&mut self.finished_chunks)
    }

    /// Flush the open chunk and return every chunk not yet taken.
    ///
    /// A chunk holding no rows is discarded rather than flushed, so a
    /// header-only file is never produced.
    pub fn close(mut self) -> Vec<FinishedChunk> {
        if self.rows_in_chunk > 0 {
            self.roll_chunk();
        }
        self.finished_chunks
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Bytes in the open chunk, header line included.
    pub fn open_chunk_size(&self) -> usize {
        self.buf.len()
    }
}

/// Encode one CSV line: every field quoted, embedded quotes doubled, LF
/// terminated.
fn encode_line<I, T>(fields: I) -> csv::Result<Vec<u8>>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut line = Vec::new();
    {
        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Always)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(&mut line);
        writer.write_record(fields)?;
        writer.flush()?;
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> FlatRow {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn text(chunk: &FinishedChunk) -> String {
        String::from_utf8(chunk.bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_header_comes_from_first_row() {
        let mut writer = ChunkedCsvWriter::new(1024 * 1024);
        writer.write_row(&row(&[("a", "1"), ("b", "2")])).unwrap();
        writer.write_row(&row(&[("b", "3"), ("c", "4")])).unwrap();
        let chunks = writer.close();
        assert_eq!(chunks.len(), 1);
        // The second row misses "a" (written empty) and adds "c" (dropped).
        assert_eq!(text(&chunks[0]), "\"a\",\"b\"\n\"1\",\"2\"\n\"\",\"3\"\n");
    }

    #[test]
    fn test_rows_split_into_chunks_at_byte_budget() {
        let header = encode_line(["id", "value"]).unwrap();
        let line = encode_line(["1", "aaaa"]).unwrap();
        // Room for the header and exactly two rows.
        let mut writer = ChunkedCsvWriter::new(header.len() + 2 * line.len());
        for _ in 0..5 {
            writer.write_row(&row(&[("id", "1"), ("value", "aaaa")])).unwrap();
        }
        let chunks = writer.close();
        assert_eq!(chunks.len(), 3);
        let counts: Vec<usize> = chunks.iter().map(|c| c.record_count).collect();
        assert_eq!(counts, vec![2, 2, 1]);
        let seqs: Vec<usize> = chunks.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        for chunk in &chunks {
            assert!(chunk.bytes.starts_with(&header));
        }
    }

    #[test]
    fn test_fields_are_always_quoted_and_quotes_doubled() {
        let mut writer = ChunkedCsvWriter::new(1024 * 1024);
        writer
            .write_row(&row(&[
                ("note", "say \"hi\""),
                ("list", "a,b"),
                ("text", "l1\nl2"),
            ]))
            .unwrap();
        let chunks = writer.close();
        assert_eq!(
            text(&chunks[0]),
            "\"note\",\"list\",\"text\"\n\"say \"\"hi\"\"\",\"a,b\",\"l1\nl2\"\n"
        );
    }

    #[test]
    fn test_oversized_row_still_lands_in_a_chunk() {
        let mut writer = ChunkedCsvWriter::new(1);
        writer.write_row(&row(&[("a", "0123456789")])).unwrap();
        writer.write_row(&row(&[("a", "9876543210")])).unwrap();
        let chunks = writer.close();
        // Each row exceeds the budget on its own, so each gets its own chunk.
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert_eq!(chunk.record_count, 1);
            assert!(chunk.bytes.len() > 1);
        }
    }

    #[test]
    fn test_no_rows_means_no_chunks() {
        let writer = ChunkedCsvWriter::new(1024);
        assert!(writer.close().is_empty());
    }

    #[test]
    fn test_take_finished_chunks_drains() {
        let line = encode_line(["a"]).unwrap();
        let header = encode_line(["x"]).unwrap();
        let mut writer = ChunkedCsvWriter::new(header.len() + line.len());
        writer.write_row(&row(&[("x", "a")])).unwrap();
        writer.write_row(&row(&[("x", "a")])).unwrap();
        let taken = writer.take_finished_chunks();
        assert_eq!(taken.len(), 1);
        assert!(writer.take_finished_chunks().is_empty());
        let rest = writer.close();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].seq, 2);
    }

    #[test]
    fn test_stats_track_rows_and_chunks() {
        let line = encode_line(["a"]).unwrap();
        let header = encode_line(["x"]).unwrap();
        let mut writer = ChunkedCsvWriter::new(header.len() + line.len());
        for _ in 0..3 {
            writer.write_row(&row(&[("x", "a")])).unwrap();
        }
        let stats = writer.stats();
        assert_eq!(stats.rows_written, 3);
        assert_eq!(stats.chunks_finished, 2);
        assert_eq!(stats.bytes_written, 2 * (header.len() + line.len()));
        assert_eq!(writer.open_chunk_size(), header.len() + line.len());
    }
}
