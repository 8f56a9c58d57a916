//! Server supervisor.
//!
//! Owns the listener and the per-connection handler tasks under one
//! `tokio::task::JoinSet`, with a `tokio::sync::watch` channel standing in
//! for a wait group plus cancellation signal — the closest stable-Rust
//! equivalent of structured concurrency, since `tokio` has no native
//! nursery type.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;

use crate::batch;
use crate::connection::{self, ConnectionConfig};
use crate::errors::SupervisorError;
use crate::options::Options;
use crate::sink::AnalyticsSink;
use crate::tls;
use crate::ua::default_classifier;

/// `server(sink, table, options)`. `started` is signaled once
/// the listener is bound and accepting, carrying the address actually bound
/// (useful when `options.port == 0` picks an ephemeral port, e.g. in tests);
/// `shutdown` is the observer's cancellation signal (flip to `true` to begin
/// an orderly shutdown).
pub async fn server(
    sink: Arc<dyn AnalyticsSink>,
    table: String,
    options: Options,
    started: Option<oneshot::Sender<std::net::SocketAddr>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SupervisorError> {
    // The bounded input queue.
    let (tx, rx) = mpsc::channel(options.qsize);

    // Start the sender before accepting any connections so the
    // queue always has a consumer.
    let sender_options = Arc::new(options.clone());
    let sender_sink = sink.clone();
    let sender_table = table.clone();
    let sender_handle = tokio::spawn(async move { batch::run(rx, sender_sink, sender_table, sender_options).await });

    let listener = TcpListener::bind((options.bind.as_str(), options.port))
        .await
        .map_err(|e| SupervisorError::Bind {
            addr: format!("{}:{}", options.bind, options.port),
            source: e,
        })?;

    let tls_acceptor = match (&options.tls_certificate, &options.tls_key) {
        (Some(cert), Some(key)) => Some(tls::load_acceptor(cert, key)?),
        (None, None) => None,
        _ => {
            return Err(SupervisorError::TlsConfig(
                "tls_certificate and tls_key must both be set or both be unset".to_string(),
            ))
        }
    };

    let classifier = Arc::new(default_classifier());
    let conn_config = Arc::new(ConnectionConfig {
        max_line_size: options.max_line_size,
        recv_size: options.recv_size,
        cleanup_timeout: options.cleanup_timeout,
        token: options.token.clone(),
    });

    let mut handlers: JoinSet<()> = JoinSet::new();

    if let Some(tx) = started {
        let _ = tx.send(listener.local_addr().map_err(|e| SupervisorError::Bind {
            addr: format!("{}:{}", options.bind, options.port),
            source: e,
        })?);
    }

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                let (socket, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                        continue;
                    }
                };
                let peer = connection::peer_identity(Ok(addr));
                let classifier = classifier.clone();
                let conn_config = conn_config.clone();
                let tx = tx.clone();

                if let Some(acceptor) = &tls_acceptor {
                    let acceptor = acceptor.clone();
                    handlers.spawn(async move {
                        match acceptor.accept(socket).await {
                            Ok(tls_stream) => connection::handle(tls_stream, peer, conn_config, classifier, tx).await,
                            Err(e) => tracing::error!(peer = %peer, error = %e, "TLS handshake failed"),
                        }
                    });
                } else {
                    handlers.spawn(connection::handle(socket, peer, conn_config, classifier, tx));
                }
            }
        }
    }

    // Stop accepting (the listener is dropped on function exit, and
    // we've already left the accept loop), let handlers drain, then close
    // the queue and let the sender finish its in-flight batch.
    drop(tx);
    while handlers.join_next().await.is_some() {}

    if tokio::time::timeout(Duration::from_secs(120), sender_handle).await.is_err() {
        tracing::error!("sender task did not drain within the shutdown grace window; pending sends abandoned");
    }

    Ok(())
}
