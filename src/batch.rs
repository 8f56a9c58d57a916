//! Batcher / Sender.
//!
//! Consumes the bounded input queue, composes time- or size-triggered
//! batches, partitions each by UTC event date, and fires one concurrent send
//! task per date sub-batch with retry+backoff (exponential backoff with
//! jitter, capped wait), generalized from a fixed retry count to the
//! configurable `retry_max_attempts`/`retry_max_wait`/`retry_multiplier`
//! in `Options`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::error_tracker::ConsecutiveErrorTracker;
use crate::errors::SinkError;
use crate::models::{Download, Row};
use crate::options::Options;
use crate::sink::AnalyticsSink;

/// Drain the queue into one batch: append records until `batch_size` is
/// reached or `batch_timeout` elapses, whichever comes first. Returns the
/// batch plus whether the queue was observed closed.
async fn compose_batch(
    queue: &mut mpsc::Receiver<Download>,
    batch_size: usize,
    batch_timeout: Duration,
) -> (Vec<Download>, bool) {
    let mut batch = Vec::with_capacity(batch_size);
    let deadline = tokio::time::Instant::now() + batch_timeout;

    loop {
        if batch.len() >= batch_size {
            return (batch, false);
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return (batch, false);
        }
        tokio::select! {
            item = queue.recv() => {
                match item {
                    Some(download) => batch.push(download),
                    None => return (batch, true),
                }
            }
            _ = tokio::time::sleep(remaining) => return (batch, false),
        }
    }
}

/// Partition a batch by UTC `YYYYMMDD` of each record's event timestamp,
/// preserving arrival order within each date.
fn partition_by_date(batch: Vec<Download>) -> BTreeMap<String, Vec<Download>> {
    let mut partitions: BTreeMap<String, Vec<Download>> = BTreeMap::new();
    for download in batch {
        let date_suffix = download.timestamp.format("%Y%m%d").to_string();
        partitions.entry(date_suffix).or_default().push(download);
    }
    partitions
}

fn to_rows(downloads: &[Download]) -> serde_json::Result<Vec<Row>> {
    downloads.iter().map(|d| Row::from_download(d, Uuid::new_v4())).collect()
}

/// Exponential backoff with jitter, capped at `max_wait`: `multiplier * 2^(attempt-1)`,
/// scaled by a `[0.5, 1.0)` jitter factor.
fn backoff_delay(attempt: u32, multiplier: Duration, max_wait: Duration) -> Duration {
    let base = multiplier.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
    let jitter = 0.5 + rand::thread_rng().gen::<f64>() * 0.5;
    Duration::from_secs_f64((base * jitter).min(max_wait.as_secs_f64()))
}

/// Send one date-partitioned sub-batch with retry. Retry conditions are
/// limited to timeout, broken transport, token-fetch failure, and
/// sink-reported transient failure — i.e. anything
/// `SinkError::is_retryable()` agrees with, plus our own per-attempt timeout.
async fn send_with_retry(
    sink: Arc<dyn AnalyticsSink>,
    table: Arc<str>,
    rows: Vec<Row>,
    date_suffix: String,
    options: Arc<Options>,
    error_tracker: ConsecutiveErrorTracker,
) {
    let row_count = rows.len();
    for attempt in 1..=options.retry_max_attempts {
        let outcome = tokio::time::timeout(options.api_timeout, sink.insert_all(&table, &rows, &date_suffix)).await;

        let error = match outcome {
            Ok(Ok(())) => {
                error_tracker.record_success();
                return;
            }
            Ok(Err(e)) => e,
            Err(_) => SinkError::TimedOut(options.api_timeout),
        };

        if !error.is_retryable() || attempt == options.retry_max_attempts {
            tracing::error!(
                rows = row_count,
                date_suffix = %date_suffix,
                attempt,
                error = %error,
                "Timed out sending {row_count} items; dropping them."
            );
            return;
        }

        // A sink stuck returning transient errors across many batches
        // shouldn't spam logs once per retry; the tracker rate-limits the
        // warn down to the first occurrence and every 100th after.
        if error_tracker.record_error() {
            tracing::warn!(attempt, date_suffix = %date_suffix, error = %error, "sink send failing repeatedly");
        }

        let delay = backoff_delay(attempt, options.retry_multiplier, options.retry_max_wait);
        tracing::debug!(attempt, delay = ?delay, error = %error, "retrying sub-batch send after backoff");
        tokio::time::sleep(delay).await;
    }
}

/// The sender task: exactly one per server instance. Runs
/// until the queue is closed and every outstanding send has drained, which
/// is what lets the supervisor's shutdown sequence wait on it cleanly.
pub async fn run(mut queue: mpsc::Receiver<Download>, sink: Arc<dyn AnalyticsSink>, table: String, options: Arc<Options>) {
    let table: Arc<str> = Arc::from(table);
    let mut send_tasks = JoinSet::new();
    let error_tracker = ConsecutiveErrorTracker::new();

    loop {
        let (batch, closed) = compose_batch(&mut queue, options.batch_size, options.batch_timeout).await;

        if !batch.is_empty() {
            for (date_suffix, downloads) in partition_by_date(batch) {
                let rows = match to_rows(&downloads) {
                    Ok(rows) => rows,
                    Err(e) => {
                        tracing::error!(error = %e, "dropping sub-batch: failed to serialize rows");
                        continue;
                    }
                };
                send_tasks.spawn(send_with_retry(
                    sink.clone(),
                    table.clone(),
                    rows,
                    date_suffix,
                    options.clone(),
                    error_tracker.clone(),
                ));
            }
        }

        // Reap finished sends opportunistically so a long-running server
        // doesn't accumulate an unbounded JoinSet.
        while send_tasks.try_join_next().is_some() {}

        if closed {
            break;
        }
    }

    while send_tasks.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{File, PackageType};
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn sample_download(timestamp: DateTime<Utc>) -> Download {
        Download {
            timestamp,
            url: "/packages/x/y/z.tar.gz".to_string(),
            file: File {
                filename: "z.tar.gz".to_string(),
                project: Some("z".to_string()),
                version: Some("1.0".to_string()),
                package_type: Some(PackageType::Sdist),
            },
            tls_protocol: None,
            tls_cipher: None,
            country_code: None,
            details: None,
        }
    }

    #[test]
    fn partitions_by_utc_date() {
        let a = sample_download("2018-07-20T02:19:19Z".parse().unwrap());
        let b = sample_download("2018-07-20T23:59:59Z".parse().unwrap());
        let c = sample_download("2018-07-21T00:00:01Z".parse().unwrap());
        let partitions = partition_by_date(vec![a, b, c]);
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions["20180720"].len(), 2);
        assert_eq!(partitions["20180721"].len(), 1);
    }

    #[test]
    fn backoff_never_exceeds_max_wait() {
        let multiplier = Duration::from_millis(500);
        let max_wait = Duration::from_secs(60);
        for attempt in 1..20 {
            let delay = backoff_delay(attempt, multiplier, max_wait);
            assert!(delay <= max_wait);
        }
    }

    struct CountingSink {
        calls: AtomicUsize,
        fail_first: usize,
        received: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait::async_trait]
    impl AnalyticsSink for CountingSink {
        async fn insert_all(&self, _table: &str, rows: &[Row], date_suffix: &str) -> Result<(), SinkError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(SinkError::Transient("simulated".to_string()));
            }
            self.received.lock().unwrap().push((date_suffix.to_string(), rows.len()));
            Ok(())
        }

        async fn get_schema(&self, _table: &str) -> Result<Option<Vec<crate::models::SchemaField>>, SinkError> {
            Ok(None)
        }

        async fn update_schema(&self, _table: &str, _schema: &[crate::models::SchemaField]) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let sink = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
            fail_first: 2,
            received: Mutex::new(Vec::new()),
        });
        let mut options = Options::default();
        options.retry_multiplier = Duration::from_millis(1);
        options.retry_max_wait = Duration::from_millis(5);
        let options = Arc::new(options);

        let rows = to_rows(&[sample_download("2018-07-20T02:19:19Z".parse().unwrap())]).unwrap();
        send_with_retry(
            sink.clone(),
            Arc::from("events"),
            rows,
            "20180720".to_string(),
            options,
            ConsecutiveErrorTracker::new(),
        )
        .await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_drains_queue_and_sends_on_close() {
        let sink = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            received: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::channel(16);
        let mut options = Options::default();
        options.batch_size = 100;
        options.batch_timeout = Duration::from_millis(20);
        let options = Arc::new(options);

        for _ in 0..3 {
            tx.send(sample_download("2018-07-20T02:19:19Z".parse().unwrap())).await.unwrap();
        }
        drop(tx);

        run(rx, sink.clone(), "events".to_string(), options).await;

        let received = sink.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].1, 3);
    }
}
