//! Error types at the component boundaries.

use thiserror::Error;

/// Errors raised while fetching or decompressing a dump.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed before or while streaming the body
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP error {status} fetching {url}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Body ended before the announced size was received
    #[error("Stream ended at byte {offset} of {total}")]
    Truncated { offset: u64, total: u64 },

    /// Local file error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The gzip stream is corrupt
    #[error("Failed to decompress dump: {0}")]
    Decompress(std::io::Error),

    #[error("Giving up on {url} after {attempts} attempts at byte {offset}: {source}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        offset: u64,
        #[source]
        source: Box<TransportError>,
    },
}

impl TransportError {
    /// Check if retrying from the current offset cannot help.
    ///
    /// Client errors (except 408 and 429), corrupt gzip data, local I/O
    /// failures and malformed requests are fatal. Connection failures,
    /// timeouts, truncated bodies and 5xx answers are transient.
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::HttpStatus { status, .. } => {
                status.is_client_error() && status.as_u16() != 408 && status.as_u16() != 429
            }
            TransportError::Request(e) => e.is_builder() || e.is_redirect(),
            TransportError::Truncated { .. } => false,
            TransportError::Io(_) => true,
            TransportError::Decompress(_) => true,
            TransportError::RetriesExhausted { .. } => true,
        }
    }
}

/// Errors raised while discovering a dump's schema.
#[derive(Debug, Error)]
pub enum TokenizeError {
    #[error("Dump ended before a complete CREATE TABLE statement was found")]
    MissingSchema,

    #[error("Column `{column}` not found in dump schema (available: {})", .available.join(", "))]
    UnknownColumn {
        column: String,
        available: Vec<String>,
    },

    /// A value grew past the limit, usually an unterminated string
    #[error("Field longer than {limit} bytes in dump content")]
    FieldTooLong { limit: usize },

    #[error("Line longer than {limit} bytes in CREATE TABLE block")]
    HeaderLineTooLong { limit: usize },
}

/// Errors returned by a graph sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Neo4j error: {0}")]
    Neo4j(#[from] neo4rs::Error),

    /// Sink-specific failure
    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by a tuple stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Tokenize(#[from] TokenizeError),
}
