//! Linehaul — ingests syslog-framed package-download telemetry, normalizes
//! it into typed `Download` records, and batches them to an analytics sink.
//!
//! Each pipeline stage (framing, syslog parsing, event-grammar parsing, UA
//! classification, assembly, connection handling, batching, supervision,
//! schema migration) gets its own module.

pub mod assembler;
pub mod batch;
pub mod connection;
pub mod error_tracker;
pub mod errors;
pub mod event;
pub mod framing;
pub mod migrate;
pub mod models;
pub mod options;
pub mod sink;
pub mod supervisor;
pub mod syslog;
pub mod tls;
pub mod ua;

pub use errors::{
    ClassifierError, EventError, FramingError, SchemaError, SinkError, SupervisorError, SyslogError,
};
pub use models::{Download, File, PackageType, Row, SchemaField, SimpleRequest, UserAgent};
pub use options::Options;
pub use sink::{AnalyticsSink, NoopTokenProvider, ReqwestSink, StaticTokenProvider, TokenProvider};
pub use supervisor::server;
