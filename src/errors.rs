//! Typed error kinds for each pipeline stage.
//!
//! Library code returns these so callers can `match` on what went wrong;
//! the CLI/bootstrap layer collapses them into `anyhow::Error` at the edge.

use thiserror::Error;

/// Errors raised by the line framer.
#[derive(Debug, Error)]
pub enum FramingError {
    /// Buffered bytes exceeded `max_line_size` without a newline. Fatal for the connection.
    #[error("buffered {buffered} bytes without a newline, exceeding max_line_size {max}")]
    BufferTooLarge { buffered: usize, max: usize },

    /// `close()` was called with a non-empty, non-newline-terminated buffer left over.
    #[error("{} leftover bytes at close without a terminating newline", leftover.len())]
    TruncatedLine { leftover: Vec<u8> },
}

/// Errors raised by the syslog header parser.
#[derive(Debug, Error)]
pub enum SyslogError {
    #[error("unparseable syslog line: {reason}")]
    UnparseableSyslog { reason: String },
}

/// Errors raised by the event grammar parser.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("unparseable event payload: {reason}")]
    UnparseableEvent { reason: String },
}

/// Errors raised while classifying a user-agent string.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// No parser claimed the UA and it did not match the ignore pattern.
    #[error("unknown user agent: {ua}")]
    UnknownUserAgent { ua: String },
}

/// A single registered parser declining to handle its input. Not an error at
/// the classifier level — the dispatcher treats this as "try the next parser".
#[derive(Debug, Error)]
#[error("parser {0} could not parse the input")]
pub struct UnableToParse(pub &'static str);

/// Errors surfaced by an `AnalyticsSink`.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Worth retrying: network hiccup, timeout, token refresh failure, or a
    /// sink-reported transient condition (e.g. 5xx, rate limiting).
    #[error("transient sink error: {0}")]
    Transient(String),

    /// Not worth retrying: malformed request, auth rejected outright, schema mismatch.
    #[error("permanent sink error: {0}")]
    Permanent(String),

    /// The per-attempt deadline elapsed before the sink responded.
    #[error("sink call timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Transient(_) | SinkError::TimedOut(_))
    }
}

/// Errors that abort the whole daemon rather than a single connection or batch.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
}

/// Errors raised by the schema migrator.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema incompatible: {reason}")]
    SchemaIncompatible { reason: String },

    #[error(transparent)]
    Sink(#[from] SinkError),
}
