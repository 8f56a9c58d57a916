//! Connection handler.
//!
//! One task per accepted TCP (or TLS) stream: read, frame, assemble,
//! enqueue. Generic over the stream type so the same loop serves both the
//! plain listener and the TLS listener, written against
//! `AsyncRead + AsyncWrite` rather than duplicated per transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::assembler::{self, Assembled};
use crate::errors::FramingError;
use crate::framing::LineFramer;
use crate::options::constant_time_eq;
use crate::ua::Classifier;

/// Resolve the peer's identity for logging. This must
/// never fail the connection: an unavailable address is reported as an
/// opaque placeholder instead of aborting.
pub fn peer_identity(addr: std::io::Result<std::net::SocketAddr>) -> String {
    addr.map(|a| a.to_string()).unwrap_or_else(|_| "<unknown peer>".to_string())
}

/// Strip the configured token prefix from a frame. Returns `None` (silent
/// drop, no log) if a token is configured and the frame doesn't start with
/// it byte-for-byte.
fn strip_token<'a>(line: &'a [u8], token: Option<&[u8]>) -> Option<&'a [u8]> {
    match token {
        None => Some(line),
        Some(t) => {
            if line.len() < t.len() {
                return None;
            }
            if constant_time_eq(&line[..t.len()], t) {
                Some(&line[t.len()..])
            } else {
                None
            }
        }
    }
}

pub struct ConnectionConfig {
    pub max_line_size: usize,
    pub recv_size: usize,
    pub cleanup_timeout: Duration,
    pub token: Option<Vec<u8>>,
}

/// Run one connection to completion. Never returns an error: every failure
/// mode is logged and the function simply returns rather than propagating.
pub async fn handle<S>(
    mut stream: S,
    peer: String,
    config: Arc<ConnectionConfig>,
    classifier: Arc<Classifier>,
    queue: mpsc::Sender<crate::models::Download>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framer = LineFramer::new(config.max_line_size);
    let mut recv_buf = vec![0u8; config.recv_size];

    loop {
        let read_result = stream.read(&mut recv_buf).await;
        let n = match read_result {
            Ok(0) => {
                close_framer(framer, &peer);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                // Broken/reset streams are treated as EOF, not an error exit;
                // anything else is logged as a genuine fault.
                if is_connection_reset(&e) {
                    close_framer(framer, &peer);
                } else {
                    tracing::error!(peer = %peer, error = %e, "connection read failed");
                }
                break;
            }
        };

        let frames = match framer.receive(&recv_buf[..n]) {
            Ok(frames) => frames,
            Err(FramingError::BufferTooLarge { buffered, max }) => {
                tracing::debug!(peer = %peer, buffered, max, "closing connection: line exceeded max_line_size");
                break;
            }
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "closing connection: framing error");
                break;
            }
        };

        for frame in frames {
            let Some(unwrapped) = strip_token(&frame, config.token.as_deref()) else {
                continue;
            };
            match assembler::assemble(unwrapped, &classifier) {
                Some(Assembled::Download(download)) => {
                    // Backpressure: suspends here when the queue is full.
                    if queue.send(download).await.is_err() {
                        tracing::debug!(peer = %peer, "input queue closed; ending connection");
                        return;
                    }
                }
                Some(Assembled::Simple(simple)) => {
                    tracing::debug!(peer = %peer, project = ?simple.project, "observed simple-index request (not forwarded)");
                }
                None => {}
            }
        }
    }

    shutdown_stream(stream, &peer, config.cleanup_timeout).await;
}

fn close_framer(framer: LineFramer, peer: &str) {
    if let Err(e) = framer.close() {
        tracing::debug!(peer = %peer, error = %e, "connection closed with a truncated trailing line");
    }
}

fn is_connection_reset(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted | std::io::ErrorKind::BrokenPipe
    )
}

/// Best-effort orderly shutdown of the underlying stream, bounded by
/// `cleanup_timeout` (default 30s).
async fn shutdown_stream<S>(mut stream: S, peer: &str, cleanup_timeout: Duration)
where
    S: AsyncWrite + Unpin,
{
    if tokio::time::timeout(cleanup_timeout, stream.shutdown()).await.is_err() {
        tracing::debug!(peer = %peer, "stream shutdown exceeded cleanup_timeout");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_token_matches_prefix_exactly() {
        assert_eq!(strip_token(b"tokpayload", Some(b"tok")), Some(b"payload".as_slice()));
    }

    #[test]
    fn strip_token_rejects_mismatched_prefix() {
        assert_eq!(strip_token(b"xxxpayload", Some(b"tok")), None);
    }

    #[test]
    fn strip_token_rejects_short_line() {
        assert_eq!(strip_token(b"to", Some(b"tok")), None);
    }

    #[test]
    fn no_token_configured_passes_through() {
        assert_eq!(strip_token(b"anything", None), Some(b"anything".as_slice()));
    }

    #[test]
    fn peer_identity_falls_back_to_placeholder_on_error() {
        let err = Err(std::io::Error::new(std::io::ErrorKind::Other, "gone"));
        assert_eq!(peer_identity(err), "<unknown peer>");
    }
}
