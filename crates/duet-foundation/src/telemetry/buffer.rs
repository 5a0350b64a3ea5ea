//! Failed log buffer
//!
//! Records that could not be delivered are persisted as one JSON array and
//! retried in a batch after the next successful send. Each failed batch bumps
//! the retry count of the records it carried; a record is dropped once its
//! count exceeds the configured maximum.
//!
//! All read-modify-write cycles on the persisted array go through one async
//! mutex, so concurrent failures never lose records. A second mutex keeps two
//! flushes from sending the same snapshot twice.

use super::record::{BufferedLogRecord, LogRecord};
use duet_kernel::storage::{KeyValueStore, load_json, save_json};
use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Storage key of the persisted buffer.
pub const FAILED_RECORDS_KEY: &str = "duet_failed_log_records";

/// Result of one [`LogBuffer::flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered.
    Empty,
    /// This many records were delivered and removed.
    Sent(usize),
    /// Delivery failed; `kept` records remain, `dropped` exceeded the retry cap.
    Failed { kept: usize, dropped: usize },
}

pub struct LogBuffer {
    store: Arc<dyn KeyValueStore>,
    key: String,
    max_retries: u32,
    rmw: Mutex<()>,
    flush_gate: Mutex<()>,
}

impl LogBuffer {
    pub fn new(store: Arc<dyn KeyValueStore>, max_retries: u32) -> Self {
        Self {
            store,
            key: FAILED_RECORDS_KEY.to_string(),
            max_retries,
            rmw: Mutex::new(()),
            flush_gate: Mutex::new(()),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Current buffered records. Storage errors read as an empty buffer.
    pub async fn records(&self) -> Vec<BufferedLogRecord> {
        let _guard = self.rmw.lock().await;
        self.load().await
    }

    /// Buffer a record after its first failed send.
    pub async fn push(&self, record: LogRecord) {
        let _guard = self.rmw.lock().await;
        let mut records = self.load().await;
        records.push(BufferedLogRecord::first_failure(record));
        self.save(&records).await;
        debug!(buffered = records.len(), "log record buffered");
    }

    /// Send every buffered record in one batch through `send`.
    pub async fn flush<F, Fut, E>(&self, send: F) -> FlushOutcome
    where
        F: FnOnce(Vec<LogRecord>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let _gate = self.flush_gate.lock().await;

        let snapshot = {
            let _guard = self.rmw.lock().await;
            self.load().await
        };
        if snapshot.is_empty() {
            return FlushOutcome::Empty;
        }

        let ids: HashSet<Uuid> = snapshot.iter().map(|buffered| buffered.id).collect();
        let batch = snapshot.into_iter().map(|buffered| buffered.record).collect();

        match send(batch).await {
            Ok(()) => {
                let _guard = self.rmw.lock().await;
                let mut records = self.load().await;
                records.retain(|buffered| !ids.contains(&buffered.id));
                self.save(&records).await;
                info!(sent = ids.len(), "buffered log records delivered");
                FlushOutcome::Sent(ids.len())
            }
            Err(e) => {
                let _guard = self.rmw.lock().await;
                let mut records = self.load().await;
                let mut dropped = 0;
                records.retain_mut(|buffered| {
                    if !ids.contains(&buffered.id) {
                        return true;
                    }
                    buffered.retry_count += 1;
                    if buffered.retry_count > self.max_retries {
                        dropped += 1;
                        false
                    } else {
                        true
                    }
                });
                self.save(&records).await;
                warn!(
                    error = %e,
                    kept = ids.len() - dropped,
                    dropped,
                    "failed to send buffered log records"
                );
                FlushOutcome::Failed {
                    kept: ids.len() - dropped,
                    dropped,
                }
            }
        }
    }

    /// Drop every buffered record.
    pub async fn clear(&self) {
        let _guard = self.rmw.lock().await;
        if let Err(e) = self.store.remove(&self.key).await {
            warn!(error = %e, "failed to clear log buffer");
        }
    }

    async fn load(&self) -> Vec<BufferedLogRecord> {
        match load_json::<Vec<BufferedLogRecord>, _>(self.store.as_ref(), &self.key).await {
            Ok(records) => records.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "failed to load log buffer");
                Vec::new()
            }
        }
    }

    async fn save(&self, records: &[BufferedLogRecord]) {
        let result = if records.is_empty() {
            self.store.remove(&self.key).await.map(|_| ())
        } else {
            save_json(self.store.as_ref(), &self.key, records).await
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to persist log buffer");
        }
    }
}
