//! Tokenizer for the row-insertion dialect of MediaWiki SQL dumps.
//!
//! A dump starts with a `CREATE TABLE` block listing one backtick-quoted column
//! per line, followed by `INSERT INTO ... VALUES (...),(...);` statements. The
//! tokenizer first discovers the column order from the header, then runs a
//! byte-level state machine over the statements and emits one tuple per
//! parenthesized row, projected onto the columns the caller asked for.
//!
//! All state lives in [`TupleTokenizer`], so input may be split at any byte,
//! including inside a quoted string, an escape sequence or a multi-byte UTF-8
//! character.

use crate::error::{StreamError, TokenizeError};
use crate::transport::ChunkSource;
use memchr::memchr;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use tracing::debug;

/// Field values of one row, ordered as the caller's requested columns.
pub type Tuple = Vec<String>;

const TABLE_MARKER: &[u8] = b"CREATE TABLE";

/// Upper bound on one field value; MediaWiki columns are at most a 64 KiB blob.
pub const MAX_FIELD_BYTES: usize = 1 << 20;

/// Upper bound on one line of the `CREATE TABLE` block.
pub const MAX_HEADER_LINE_BYTES: usize = 64 * 1024;

static COLUMN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*`([^`]+)`").unwrap());

/// Column names in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    columns: Vec<String>,
}

impl ColumnSchema {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Requested columns resolved to schema positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    positions: Vec<usize>,
}

impl Projection {
    pub fn resolve(schema: &ColumnSchema, requested: &[&str]) -> Result<Self, TokenizeError> {
        let positions = requested
            .iter()
            .map(|name| {
                schema
                    .position(name)
                    .ok_or_else(|| TokenizeError::UnknownColumn {
                        column: name.to_string(),
                        available: schema.columns().to_vec(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { positions })
    }

    /// `None` when the row is too short for one of the positions.
    pub fn apply(&self, row: &[String]) -> Option<Tuple> {
        self.positions.iter().map(|&i| row.get(i).cloned()).collect()
    }
}

enum Phase {
    /// Looking for the `CREATE TABLE` line; only a prefix of each line is kept.
    SeekingTable,
    /// Collecting column names until the line starting with `)`.
    Definition(Vec<String>),
    Content,
}

#[derive(Default)]
struct ScanState {
    inside_group: bool,
    inside_string: bool,
    escape_next: bool,
    field: Vec<u8>,
    row: Vec<String>,
}

impl ScanState {
    fn push(&mut self, b: u8) -> Result<(), TokenizeError> {
        if self.field.len() >= MAX_FIELD_BYTES {
            return Err(TokenizeError::FieldTooLong {
                limit: MAX_FIELD_BYTES,
            });
        }
        self.field.push(b);
        Ok(())
    }

    fn flush_field(&mut self) {
        let bytes = std::mem::take(&mut self.field);
        let value = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        self.row.push(value);
    }
}

/// Push-based tokenizer: feed chunks, collect projected tuples.
pub struct TupleTokenizer {
    requested: Vec<String>,
    phase: Phase,
    line: Vec<u8>,
    schema: Option<ColumnSchema>,
    projection: Option<Projection>,
    state: ScanState,
    malformed: u64,
}

impl TupleTokenizer {
    pub fn new(requested: &[&str]) -> Self {
        Self {
            requested: requested.iter().map(|c| c.to_string()).collect(),
            phase: Phase::SeekingTable,
            line: Vec::new(),
            schema: None,
            projection: None,
            state: ScanState::default(),
            malformed: 0,
        }
    }

    /// The discovered schema, once the header has been read.
    pub fn schema(&self) -> Option<&ColumnSchema> {
        self.schema.as_ref()
    }

    /// Rows dropped because they lacked a projected column.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    pub fn feed(&mut self, chunk: &[u8], out: &mut VecDeque<Tuple>) -> Result<(), TokenizeError> {
        let mut rest = chunk;
        while !rest.is_empty() {
            if matches!(self.phase, Phase::Content) {
                return self.scan(rest, out);
            }
            rest = self.feed_header(rest)?;
        }
        Ok(())
    }

    /// Signals end of input. A row still open is emitted best-effort.
    pub fn finish(&mut self, out: &mut VecDeque<Tuple>) -> Result<(), TokenizeError> {
        if !matches!(self.phase, Phase::Content) && !self.line.is_empty() {
            let line = std::mem::take(&mut self.line);
            self.header_line(&line)?;
        }
        if !matches!(self.phase, Phase::Content) {
            return Err(TokenizeError::MissingSchema);
        }
        if self.state.inside_group {
            debug!("Dump ended inside a row, emitting partial tuple");
            self.state.flush_field();
            self.emit(out);
        }
        Ok(())
    }

    /// Consumes header bytes up to and including one line break.
    fn feed_header<'a>(&mut self, chunk: &'a [u8]) -> Result<&'a [u8], TokenizeError> {
        let (segment, rest, complete) = match memchr(b'\n', chunk) {
            Some(i) => (&chunk[..i], &chunk[i + 1..], true),
            None => (chunk, &chunk[chunk.len()..], false),
        };

        if matches!(self.phase, Phase::SeekingTable) {
            let room = TABLE_MARKER.len().saturating_sub(self.line.len());
            self.line.extend_from_slice(&segment[..segment.len().min(room)]);
        } else {
            if self.line.len() + segment.len() > MAX_HEADER_LINE_BYTES {
                return Err(TokenizeError::HeaderLineTooLong {
                    limit: MAX_HEADER_LINE_BYTES,
                });
            }
            self.line.extend_from_slice(segment);
        }

        if complete {
            let line = std::mem::take(&mut self.line);
            self.header_line(&line)?;
        }
        Ok(rest)
    }

    fn header_line(&mut self, line: &[u8]) -> Result<(), TokenizeError> {
        match &mut self.phase {
            Phase::SeekingTable => {
                if line.starts_with(TABLE_MARKER) {
                    self.phase = Phase::Definition(Vec::new());
                }
            }
            Phase::Definition(columns) => {
                if line.starts_with(b")") {
                    let schema = ColumnSchema::new(std::mem::take(columns));
                    let requested: Vec<&str> = self.requested.iter().map(String::as_str).collect();
                    self.projection = Some(Projection::resolve(&schema, &requested)?);
                    debug!(columns = ?schema.columns(), "Discovered dump schema");
                    self.schema = Some(schema);
                    self.phase = Phase::Content;
                } else {
                    let text = String::from_utf8_lossy(line);
                    if let Some(caps) = COLUMN_REGEX.captures(&text) {
                        columns.push(caps[1].to_string());
                    }
                }
            }
            Phase::Content => {}
        }
        Ok(())
    }

    fn scan(&mut self, bytes: &[u8], out: &mut VecDeque<Tuple>) -> Result<(), TokenizeError> {
        let mut i = 0;
        while i < bytes.len() {
            if !self.state.inside_group {
                match memchr(b'(', &bytes[i..]) {
                    Some(offset) => {
                        self.state.inside_group = true;
                        i += offset + 1;
                        continue;
                    }
                    None => return Ok(()),
                }
            }

            let b = bytes[i];
            i += 1;
            let state = &mut self.state;
            if state.inside_string {
                if state.escape_next {
                    state.push(b)?;
                    state.escape_next = false;
                } else if b == b'\\' {
                    state.escape_next = true;
                } else if b == b'\'' {
                    state.inside_string = false;
                } else {
                    state.push(b)?;
                }
                continue;
            }

            match b {
                b'\'' => state.inside_string = true,
                b',' => state.flush_field(),
                b')' => {
                    state.inside_group = false;
                    state.flush_field();
                    self.emit(out);
                }
                b'\n' | b'\r' => {}
                _ => state.push(b)?,
            }
        }
        Ok(())
    }

    fn emit(&mut self, out: &mut VecDeque<Tuple>) {
        let row = std::mem::take(&mut self.state.row);
        self.state.inside_group = false;
        self.state.inside_string = false;
        self.state.escape_next = false;
        let Some(projection) = &self.projection else {
            return;
        };
        match projection.apply(&row) {
            Some(tuple) => out.push_back(tuple),
            None => {
                self.malformed += 1;
                debug!(fields = row.len(), "Dropping malformed row");
            }
        }
    }
}

/// Lazy, non-restartable tuple sequence over a chunk source.
pub struct TupleStream<'s, C> {
    source: &'s mut C,
    tokenizer: TupleTokenizer,
    ready: VecDeque<Tuple>,
    exhausted: bool,
}

impl<'s, C: ChunkSource> TupleStream<'s, C> {
    pub fn new(source: &'s mut C, columns: &[&str]) -> Self {
        Self {
            source,
            tokenizer: TupleTokenizer::new(columns),
            ready: VecDeque::new(),
            exhausted: false,
        }
    }

    pub async fn next_tuple(&mut self) -> Result<Option<Tuple>, StreamError> {
        loop {
            if let Some(tuple) = self.ready.pop_front() {
                return Ok(Some(tuple));
            }
            if self.exhausted {
                return Ok(None);
            }
            match self.source.next_chunk().await? {
                Some(chunk) => self.tokenizer.feed(&chunk, &mut self.ready)?,
                None => {
                    self.exhausted = true;
                    self.tokenizer.finish(&mut self.ready)?;
                }
            }
        }
    }

    /// Reads only as far as the end of the header.
    pub async fn discover_schema(&mut self) -> Result<ColumnSchema, StreamError> {
        while self.tokenizer.schema().is_none() {
            match self.source.next_chunk().await? {
                Some(chunk) => self.tokenizer.feed(&chunk, &mut self.ready)?,
                None => {
                    self.exhausted = true;
                    self.tokenizer.finish(&mut self.ready)?;
                }
            }
        }
        Ok(self.tokenizer.schema().cloned().unwrap_or_else(|| ColumnSchema::new(Vec::new())))
    }

    pub fn bytes_read(&self) -> u64 {
        self.source.bytes_read()
    }

    pub fn total_size(&self) -> u64 {
        self.source.total_size()
    }

    pub fn malformed(&self) -> u64 {
        self.tokenizer.malformed()
    }
}
