//! JSON row source.
//!
//! The root shape is resolved at construction, before any record is handed
//! out: a sequence root streams its elements; a mapping root streams the
//! sequence selected by `nested_path`, or the first sequence found in
//! document order, or falls back to treating the whole document as a single
//! record; any other root is unsupported.
//!
//! Two parsing strategies exist, chosen by config and fixed for the life of
//! the source. `Streaming` frames one element at a time straight from the
//! bytes, so only the current record is ever materialized. `Document` parses
//! the whole input up front and then iterates; it trades memory for the
//! stricter whole-document validation serde_json performs.

use bytes::Bytes;
use snafu::prelude::*;
use std::collections::VecDeque;
use tracing::debug;

use crate::config::{InputFormat, ParserEngine, SourceConfig};
use crate::error::{
    MalformedDocumentSnafu, MalformedLineSnafu, MalformedRecordSnafu, NestedPathMissingSnafu,
    NestedPathNotSequenceSnafu, SourceError, SyntaxSnafu, UnsupportedRootShapeSnafu,
};
use crate::record::Value;

use super::RowSource;

/// Yields one hierarchical record at a time from JSON or NDJSON bytes.
#[derive(Debug)]
pub struct JsonRowSource {
    rows: Rows,
}

#[derive(Debug)]
enum Rows {
    /// Elements framed from the raw bytes one at a time.
    Scanned(ElementScanner),
    /// Records taken from an up-front document parse.
    Parsed(std::vec::IntoIter<Value>),
    /// The whole document is the one record.
    Single(Option<Value>),
    /// One record per line.
    Lines(LineDecoder),
}

impl JsonRowSource {
    /// Resolve the root shape of `data` and build a record stream over it.
    pub fn new(data: Bytes, config: &SourceConfig) -> Result<Self, SourceError> {
        let rows = match config.format {
            InputFormat::Ndjson => Rows::Lines(LineDecoder::new(data, config.read_batch_size)),
            InputFormat::Json => resolve_root(data, config)?,
        };
        Ok(Self { rows })
    }
}

impl RowSource for JsonRowSource {
    fn next_record(&mut self) -> Result<Option<Value>, SourceError> {
        match &mut self.rows {
            Rows::Scanned(elements) => elements.next_element(),
            Rows::Parsed(values) => Ok(values.next()),
            Rows::Single(value) => Ok(value.take()),
            Rows::Lines(lines) => lines.next_record(),
        }
    }
}

fn resolve_root(data: Bytes, config: &SourceConfig) -> Result<Rows, SourceError> {
    let mut scanner = Scanner::new(data);
    scanner.skip_whitespace();
    let Some(root) = scanner.peek() else {
        return SyntaxSnafu {
            offset: scanner.pos,
            message: "unexpected end of input",
        }
        .fail();
    };

    match root {
        b'[' => {
            // A nested path cannot match inside a sequence root; fail loudly
            // instead of emitting an empty run.
            if let Some(path) = config.nested_path.as_deref() {
                let segment = path.split('.').next().unwrap_or("");
                return NestedPathMissingSnafu { path, segment }.fail();
            }
            match config.engine {
                ParserEngine::Streaming => Ok(Rows::Scanned(ElementScanner::new(scanner, true))),
                ParserEngine::Document => {
                    let root = parse_document(&scanner.data[scanner.pos..])?;
                    let Value::Sequence(items) = root else {
                        return SyntaxSnafu {
                            offset: scanner.pos,
                            message: "expected a sequence",
                        }
                        .fail();
                    };
                    Ok(Rows::Parsed(items.into_iter()))
                }
            }
        }
        b'{' => match (config.engine, config.nested_path.as_deref()) {
            (ParserEngine::Streaming, Some(path)) => {
                scanner.seek_path(path)?;
                Ok(Rows::Scanned(ElementScanner::new(scanner, false)))
            }
            (ParserEngine::Streaming, None) => {
                let root_offset = scanner.pos;
                match scanner.find_sequence()? {
                    Some(offset) => {
                        scanner.pos = offset;
                        Ok(Rows::Scanned(ElementScanner::new(scanner, false)))
                    }
                    None => {
                        debug!("document contains no sequence; treating it as a single record");
                        let record = parse_document(&scanner.data[root_offset..])?;
                        Ok(Rows::Single(Some(record)))
                    }
                }
            }
            (ParserEngine::Document, maybe_path) => {
                let root = parse_document(&scanner.data[scanner.pos..])?;
                match maybe_path {
                    Some(path) => Ok(Rows::Parsed(navigate_path(root, path)?.into_iter())),
                    None => match extract_first_sequence(root) {
                        Ok(items) => Ok(Rows::Parsed(items.into_iter())),
                        Err(record) => {
                            debug!(
                                "document contains no sequence; treating it as a single record"
                            );
                            Ok(Rows::Single(Some(record)))
                        }
                    },
                }
            }
        },
        other => UnsupportedRootShapeSnafu {
            found: other as char,
            offset: scanner.pos,
        }
        .fail(),
    }
}

fn parse_document(data: &[u8]) -> Result<Value, SourceError> {
    serde_json::from_slice(data).context(MalformedDocumentSnafu)
}

/// Follow a dotted path through nested mappings to a sequence.
fn navigate_path(root: Value, path: &str) -> Result<Vec<Value>, SourceError> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Mapping(mut fields) => match fields.shift_remove(segment) {
                Some(value) => value,
                None => return NestedPathMissingSnafu { path, segment }.fail(),
            },
            _ => return NestedPathMissingSnafu { path, segment }.fail(),
        };
    }
    match current {
        Value::Sequence(items) => Ok(items),
        _ => NestedPathNotSequenceSnafu { path }.fail(),
    }
}

/// Take the first sequence in document order, or give the value back intact
/// when the document contains none.
fn extract_first_sequence(value: Value) -> Result<Vec<Value>, Value> {
    match value {
        Value::Sequence(items) => Ok(items),
        Value::Mapping(fields) => {
            let mut rest = indexmap::IndexMap::with_capacity(fields.len());
            let mut found = None;
            for (key, child) in fields {
                if found.is_some() {
                    rest.insert(key, child);
                    continue;
                }
                match extract_first_sequence(child) {
                    Ok(items) => found = Some(items),
                    Err(child) => {
                        rest.insert(key, child);
                    }
                }
            }
            match found {
                Some(items) => Ok(items),
                None => Err(Value::Mapping(rest)),
            }
        }
        scalar => Err(scalar),
    }
}

/// Byte cursor with just enough JSON awareness to frame values: strings with
/// escapes, balanced brackets, and delimiter-terminated literals.
#[derive(Debug)]
struct Scanner {
    data: Bytes,
    pos: usize,
}

impl Scanner {
    fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(byte) = self.peek() {
            if byte.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, byte: u8, message: &'static str) -> Result<(), SourceError> {
        match self.peek() {
            Some(found) if found == byte => {
                self.pos += 1;
                Ok(())
            }
            _ => SyntaxSnafu {
                offset: self.pos,
                message,
            }
            .fail(),
        }
    }

    /// Span of the next complete JSON value, starting at the cursor.
    fn value_span(&mut self) -> Result<(usize, usize), SourceError> {
        let start = self.pos;
        match self.peek() {
            Some(b'"') => self.skip_string()?,
            Some(b'{') | Some(b'[') => self.skip_container()?,
            Some(_) => {
                // Number or literal: runs until a delimiter.
                while let Some(byte) = self.peek() {
                    if matches!(byte, b',' | b']' | b'}') || byte.is_ascii_whitespace() {
                        break;
                    }
                    self.pos += 1;
                }
                ensure!(
                    self.pos > start,
                    SyntaxSnafu {
                        offset: start,
                        message: "expected a value",
                    }
                );
            }
            None => {
                return SyntaxSnafu {
                    offset: start,
                    message: "unexpected end of input",
                }
                .fail();
            }
        }
        Ok((start, self.pos))
    }

    fn skip_string(&mut self) -> Result<(), SourceError> {
        let start = self.pos;
        self.pos += 1;
        let mut escaped = false;
        while let Some(byte) = self.peek() {
            self.pos += 1;
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                return Ok(());
            }
        }
        SyntaxSnafu {
            offset: start,
            message: "unterminated string",
        }
        .fail()
    }

    fn skip_container(&mut self) -> Result<(), SourceError> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(byte) = self.peek() {
            match byte {
                b'"' => {
                    self.skip_string()?;
                    continue;
                }
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos += 1;
                        return Ok(());
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        SyntaxSnafu {
            offset: start,
            message: "unbalanced brackets",
        }
        .fail()
    }

    /// Parse (and unescape) an object key at the cursor.
    fn parse_key(&mut self) -> Result<String, SourceError> {
        let start = self.pos;
        self.skip_string()?;
        serde_json::from_slice(&self.data[start..self.pos])
            .context(MalformedRecordSnafu { offset: start })
    }

    /// Advance through nested mappings along a dotted path, stopping at the
    /// opening bracket of the sequence the final segment names.
    fn seek_path(&mut self, path: &str) -> Result<(), SourceError> {
        let segments: Vec<&str> = path.split('.').collect();
        let count = segments.len();
        for (index, segment) in segments.iter().enumerate() {
            let last = index + 1 == count;
            if self.peek() != Some(b'{') {
                return NestedPathMissingSnafu { path, segment: *segment }.fail();
            }
            self.pos += 1;
            'members: loop {
                self.skip_whitespace();
                match self.peek() {
                    Some(b'}') => {
                        return NestedPathMissingSnafu { path, segment: *segment }.fail();
                    }
                    Some(b'"') => {}
                    _ => {
                        return SyntaxSnafu {
                            offset: self.pos,
                            message: "expected object key",
                        }
                        .fail();
                    }
                }
                let key = self.parse_key()?;
                self.skip_whitespace();
                self.expect(b':', "expected ':' after object key")?;
                self.skip_whitespace();
                if key == *segment {
                    if last {
                        ensure!(
                            self.peek() == Some(b'['),
                            NestedPathNotSequenceSnafu { path }
                        );
                        return Ok(());
                    }
                    break 'members;
                }
                self.value_span()?;
                self.skip_whitespace();
                match self.peek() {
                    Some(b',') => self.pos += 1,
                    Some(b'}') => {
                        return NestedPathMissingSnafu { path, segment: *segment }.fail();
                    }
                    _ => {
                        return SyntaxSnafu {
                            offset: self.pos,
                            message: "expected ',' or '}'",
                        }
                        .fail();
                    }
                }
            }
        }
        // A dotted path always has at least one segment, and the final
        // segment either returns or fails above.
        NestedPathMissingSnafu {
            path,
            segment: String::new(),
        }
        .fail()
    }

    /// Document-order search for the first sequence value under the mapping
    /// at the cursor. Consumes the mapping when none is found.
    fn find_sequence(&mut self) -> Result<Option<usize>, SourceError> {
        self.pos += 1;
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(None);
                }
                Some(b'"') => {}
                _ => {
                    return SyntaxSnafu {
                        offset: self.pos,
                        message: "expected object key",
                    }
                    .fail();
                }
            }
            self.parse_key()?;
            self.skip_whitespace();
            self.expect(b':', "expected ':' after object key")?;
            self.skip_whitespace();
            match self.peek() {
                Some(b'[') => return Ok(Some(self.pos)),
                Some(b'{') => {
                    if let Some(offset) = self.find_sequence()? {
                        return Ok(Some(offset));
                    }
                }
                _ => {
                    self.value_span()?;
                }
            }
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(None);
                }
                _ => {
                    return SyntaxSnafu {
                        offset: self.pos,
                        message: "expected ',' or '}'",
                    }
                    .fail();
                }
            }
        }
    }
}

/// Frames the elements of one sequence directly from the byte stream.
#[derive(Debug)]
struct ElementScanner {
    scanner: Scanner,
    started: bool,
    finished: bool,
    /// Sequence-rooted inputs must not carry data after the closing bracket.
    strict_tail: bool,
}

impl ElementScanner {
    /// The scanner must sit on the sequence's opening bracket.
    fn new(scanner: Scanner, strict_tail: bool) -> Self {
        Self {
            scanner,
            started: false,
            finished: false,
            strict_tail,
        }
    }

    fn next_element(&mut self) -> Result<Option<Value>, SourceError> {
        if self.finished {
            return Ok(None);
        }
        if self.started {
            self.scanner.skip_whitespace();
            match self.scanner.peek() {
                Some(b',') => self.scanner.pos += 1,
                Some(b']') => {
                    self.scanner.pos += 1;
                    return self.close();
                }
                Some(_) => {
                    return SyntaxSnafu {
                        offset: self.scanner.pos,
                        message: "expected ',' or ']'",
                    }
                    .fail();
                }
                None => {
                    return SyntaxSnafu {
                        offset: self.scanner.pos,
                        message: "unterminated sequence",
                    }
                    .fail();
                }
            }
        } else {
            self.started = true;
            self.scanner.pos += 1;
            self.scanner.skip_whitespace();
            if self.scanner.peek() == Some(b']') {
                self.scanner.pos += 1;
                return self.close();
            }
        }
        self.scanner.skip_whitespace();
        let (start, end) = self.scanner.value_span()?;
        let value = serde_json::from_slice(&self.scanner.data[start..end])
            .context(MalformedRecordSnafu { offset: start })?;
        Ok(Some(value))
    }

    fn close(&mut self) -> Result<Option<Value>, SourceError> {
        self.finished = true;
        if self.strict_tail {
            self.scanner.skip_whitespace();
            ensure!(
                self.scanner.peek().is_none(),
                SyntaxSnafu {
                    offset: self.scanner.pos,
                    message: "trailing data after document root",
                }
            );
        }
        Ok(None)
    }
}

/// NDJSON lines, decoded `batch_size` records ahead of the consumer.
#[derive(Debug)]
struct LineDecoder {
    data: Bytes,
    pos: usize,
    line: usize,
    batch: VecDeque<Value>,
    batch_size: usize,
}

impl LineDecoder {
    fn new(data: Bytes, batch_size: usize) -> Self {
        Self {
            data,
            pos: 0,
            line: 0,
            batch: VecDeque::new(),
            batch_size,
        }
    }

    fn refill(&mut self) -> Result<(), SourceError> {
        while self.batch.len() < self.batch_size && self.pos < self.data.len() {
            let rest = &self.data[self.pos..];
            let (line_bytes, advance) = match rest.iter().position(|&b| b == b'\n') {
                Some(newline) => (&rest[..newline], newline + 1),
                None => (rest, rest.len()),
            };
            self.pos += advance;
            self.line += 1;
            let trimmed = line_bytes.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            let value =
                serde_json::from_slice(trimmed).context(MalformedLineSnafu { line: self.line })?;
            self.batch.push_back(value);
        }
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Value>, SourceError> {
        if self.batch.is_empty() {
            self.refill()?;
        }
        Ok(self.batch.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressionFormat;
    use std::collections::HashMap;

    fn source_config(engine: ParserEngine) -> SourceConfig {
        SourceConfig {
            url: String::new(),
            format: InputFormat::Json,
            compression: CompressionFormat::None,
            engine,
            nested_path: None,
            read_batch_size: 1000,
            max_records: None,
            storage_options: HashMap::new(),
        }
    }

    fn drain(input: &str, config: &SourceConfig) -> Vec<Value> {
        let mut source = JsonRowSource::new(Bytes::from(input.to_owned()), config).unwrap();
        let mut records = Vec::new();
        while let Some(record) = source.next_record().unwrap() {
            records.push(record);
        }
        records
    }

    fn engines() -> [ParserEngine; 2] {
        [ParserEngine::Streaming, ParserEngine::Document]
    }

    #[test]
    fn test_sequence_root_streams_elements() {
        for engine in engines() {
            let records = drain(
                r#" [ {"id": 1}, {"id": 2}, 3, "four" ] "#,
                &source_config(engine),
            );
            assert_eq!(records.len(), 4);
            assert!(records[0].is_mapping());
            assert_eq!(records[2], Value::Int(3));
            assert_eq!(records[3], Value::Text("four".into()));
        }
    }

    #[test]
    fn test_empty_sequence_yields_no_records() {
        for engine in engines() {
            assert!(drain("[]", &source_config(engine)).is_empty());
            assert!(drain("  [ ]  ", &source_config(engine)).is_empty());
        }
    }

    #[test]
    fn test_strings_with_brackets_do_not_break_framing() {
        for engine in engines() {
            let records = drain(
                r#"[{"a": "x]},\"{"}, {"b": "[["}]"#,
                &source_config(engine),
            );
            assert_eq!(records.len(), 2);
            let Value::Mapping(fields) = &records[0] else {
                panic!("expected a mapping");
            };
            assert_eq!(fields["a"], Value::Text("x]},\"{".into()));
        }
    }

    #[test]
    fn test_nested_path_selects_inner_sequence() {
        for engine in engines() {
            let mut config = source_config(engine);
            config.nested_path = Some("payload.items".to_string());
            let records = drain(
                r#"{"meta": {"n": 2}, "payload": {"skip": 1, "items": [{"x": 1}, {"x": 2}]}}"#,
                &config,
            );
            assert_eq!(records.len(), 2);
        }
    }

    #[test]
    fn test_nested_path_missing_segment_fails() {
        for engine in engines() {
            let mut config = source_config(engine);
            config.nested_path = Some("payload.rows".to_string());
            let err = JsonRowSource::new(
                Bytes::from_static(br#"{"payload": {"items": []}}"#),
                &config,
            )
            .and_then(|mut source| source.next_record())
            .unwrap_err();
            assert!(matches!(err, SourceError::NestedPathMissing { .. }));
        }
    }

    #[test]
    fn test_nested_path_to_scalar_fails() {
        for engine in engines() {
            let mut config = source_config(engine);
            config.nested_path = Some("count".to_string());
            let err = JsonRowSource::new(Bytes::from_static(br#"{"count": 3}"#), &config)
                .and_then(|mut source| source.next_record())
                .unwrap_err();
            assert!(matches!(err, SourceError::NestedPathNotSequence { .. }));
        }
    }

    #[test]
    fn test_nested_path_on_sequence_root_fails() {
        for engine in engines() {
            let mut config = source_config(engine);
            config.nested_path = Some("items".to_string());
            let err = JsonRowSource::new(Bytes::from_static(b"[1, 2]"), &config)
                .and_then(|mut source| source.next_record())
                .unwrap_err();
            assert!(matches!(err, SourceError::NestedPathMissing { .. }));
        }
    }

    #[test]
    fn test_mapping_root_streams_first_sequence_in_document_order() {
        for engine in engines() {
            let records = drain(
                r#"{"meta": {"inner": [{"x": 1}]}, "later": [{"y": 2}, {"y": 3}]}"#,
                &source_config(engine),
            );
            // The deeper sequence comes first in document order.
            assert_eq!(records.len(), 1);
            let Value::Mapping(fields) = &records[0] else {
                panic!("expected a mapping");
            };
            assert_eq!(fields["x"], Value::Int(1));
        }
    }

    #[test]
    fn test_mapping_root_without_sequences_is_a_single_record() {
        for engine in engines() {
            let records = drain(
                r#"{"id": 9, "name": {"first": "ada"}}"#,
                &source_config(engine),
            );
            assert_eq!(records.len(), 1);
            assert!(records[0].is_mapping());
        }
    }

    #[test]
    fn test_scalar_root_is_unsupported() {
        for engine in engines() {
            let err =
                JsonRowSource::new(Bytes::from_static(b"  42"), &source_config(engine)).unwrap_err();
            let SourceError::UnsupportedRootShape { found, offset } = err else {
                panic!("expected UnsupportedRootShape, got {err:?}");
            };
            assert_eq!(found, '4');
            assert_eq!(offset, 2);
        }
    }

    #[test]
    fn test_empty_input_is_a_syntax_error() {
        for engine in engines() {
            let err = JsonRowSource::new(Bytes::from_static(b"  "), &source_config(engine))
                .unwrap_err();
            assert!(matches!(err, SourceError::Syntax { .. }));
        }
    }

    #[test]
    fn test_malformed_element_reports_offset() {
        let mut source = JsonRowSource::new(
            Bytes::from_static(br#"[{"ok": 1}, {"bad": }]"#),
            &source_config(ParserEngine::Streaming),
        )
        .unwrap();
        assert!(source.next_record().unwrap().is_some());
        let err = source.next_record().unwrap_err();
        let SourceError::MalformedRecord { offset, .. } = err else {
            panic!("expected MalformedRecord, got {err:?}");
        };
        assert_eq!(offset, 12);
    }

    #[test]
    fn test_dangling_comma_is_a_syntax_error() {
        let mut source = JsonRowSource::new(
            Bytes::from_static(b"[1,]"),
            &source_config(ParserEngine::Streaming),
        )
        .unwrap();
        assert!(source.next_record().unwrap().is_some());
        assert!(matches!(
            source.next_record().unwrap_err(),
            SourceError::Syntax { .. }
        ));
    }

    #[test]
    fn test_trailing_data_after_sequence_root_fails() {
        let mut source = JsonRowSource::new(
            Bytes::from_static(b"[1] junk"),
            &source_config(ParserEngine::Streaming),
        )
        .unwrap();
        assert!(source.next_record().unwrap().is_some());
        assert!(matches!(
            source.next_record().unwrap_err(),
            SourceError::Syntax { .. }
        ));

        let err = JsonRowSource::new(
            Bytes::from_static(b"[1] junk"),
            &source_config(ParserEngine::Document),
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::MalformedDocument { .. }));
    }

    #[test]
    fn test_unterminated_sequence_fails() {
        let mut source = JsonRowSource::new(
            Bytes::from_static(b"[1, 2"),
            &source_config(ParserEngine::Streaming),
        )
        .unwrap();
        assert!(source.next_record().unwrap().is_some());
        assert!(source.next_record().unwrap().is_some());
        assert!(matches!(
            source.next_record().unwrap_err(),
            SourceError::Syntax { .. }
        ));
    }

    #[test]
    fn test_ndjson_lines_skip_blanks() {
        let mut config = source_config(ParserEngine::Streaming);
        config.format = InputFormat::Ndjson;
        let records = drain("{\"a\": 1}\n\n  \n{\"a\": 2}\n", &config);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_ndjson_respects_small_batch_size() {
        let mut config = source_config(ParserEngine::Streaming);
        config.format = InputFormat::Ndjson;
        config.read_batch_size = 1;
        let records = drain("{\"a\": 1}\n{\"a\": 2}\n{\"a\": 3}", &config);
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_ndjson_reports_failing_line_number() {
        let mut config = source_config(ParserEngine::Streaming);
        config.format = InputFormat::Ndjson;
        let mut source = JsonRowSource::new(
            Bytes::from_static(b"{\"a\": 1}\n\nnot json\n"),
            &config,
        )
        .unwrap();
        let err = loop {
            match source.next_record() {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("expected a malformed line"),
                Err(err) => break err,
            }
        };
        let SourceError::MalformedLine { line, .. } = err else {
            panic!("expected MalformedLine, got {err:?}");
        };
        assert_eq!(line, 3);
    }
}
