//! Resilient usage telemetry
//!
//! [`Telemetry::log`] never fails and never blocks the inference path on the
//! network when dispatch is [`TelemetryDispatch::Background`]:
//!
//! 1. disabled → no-op
//! 2. send the current record
//! 3. on success, flush the [`LogBuffer`] in one batch
//! 4. on failure, buffer the record with a retry count of 1
//!
//! Telemetry state is per instance; there is no process-wide switch.

mod buffer;
mod device;
mod record;

pub use buffer::{FAILED_RECORDS_KEY, FlushOutcome, LogBuffer};
pub use device::{
    DEVICE_ID_KEY, DeviceIdExchange, DeviceIdentity, Sha256Exchange, device_metadata,
};
pub use record::{BufferedLogRecord, FRAMEWORK_NAME, LogRecord};

use crate::backend::BackendError;
use crate::config::TelemetryConfig;
use crate::persistence::MemoryStore;
use async_trait::async_trait;
use duet_kernel::inference::{CompletionResult, EmbeddingResult, InferenceMode, TranscriptionResult};
use duet_kernel::storage::KeyValueStore;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Retry cap for buffered records.
pub const MAX_RETRIES: u32 = 3;

/// Delivery channel for log records and device registration.
#[async_trait]
pub trait TelemetryTransport: Send + Sync {
    /// POST a batch. Any non-2xx status is an error.
    async fn send_batch(&self, records: &[LogRecord]) -> Result<(), BackendError>;

    /// Register the device, returning the opaque payload to exchange for an id.
    async fn register_device(
        &self,
        metadata: &HashMap<String, String>,
    ) -> Result<String, BackendError>;
}

/// Whether [`Telemetry::log`] awaits delivery or spawns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryDispatch {
    Inline,
    #[default]
    Background,
}

struct NullTransport;

#[async_trait]
impl TelemetryTransport for NullTransport {
    async fn send_batch(&self, _records: &[LogRecord]) -> Result<(), BackendError> {
        Ok(())
    }

    async fn register_device(
        &self,
        _metadata: &HashMap<String, String>,
    ) -> Result<String, BackendError> {
        Ok(device::TELEMETRY_DISABLED_PAYLOAD.to_string())
    }
}

struct TelemetryInner {
    enabled: bool,
    project_id: Option<String>,
    dispatch: TelemetryDispatch,
    telemetry_token: RwLock<Option<String>>,
    transport: Arc<dyn TelemetryTransport>,
    buffer: LogBuffer,
    device: DeviceIdentity,
}

/// Cheaply cloneable telemetry handle.
#[derive(Clone)]
pub struct Telemetry {
    inner: Arc<TelemetryInner>,
}

pub struct TelemetryBuilder {
    config: TelemetryConfig,
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn TelemetryTransport>,
    exchange: Option<Arc<dyn DeviceIdExchange>>,
}

impl TelemetryBuilder {
    pub fn config(mut self, config: TelemetryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn dispatch(mut self, dispatch: TelemetryDispatch) -> Self {
        self.config.dispatch = dispatch;
        self
    }

    pub fn exchange(mut self, exchange: Arc<dyn DeviceIdExchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    pub fn build(self) -> Telemetry {
        let mut device = DeviceIdentity::new(self.store.clone(), self.transport.clone());
        if let Some(exchange) = self.exchange {
            device = device.with_exchange(exchange);
        }
        Telemetry {
            inner: Arc::new(TelemetryInner {
                enabled: self.config.enabled,
                project_id: self.config.project_id,
                dispatch: self.config.dispatch,
                telemetry_token: RwLock::new(None),
                buffer: LogBuffer::new(self.store, self.config.max_retries),
                transport: self.transport,
                device,
            }),
        }
    }
}

impl Telemetry {
    pub fn builder(
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn TelemetryTransport>,
    ) -> TelemetryBuilder {
        TelemetryBuilder {
            config: TelemetryConfig::default(),
            store,
            transport,
            exchange: None,
        }
    }

    /// Telemetry that records nothing.
    pub fn disabled() -> Self {
        Self::builder(Arc::new(MemoryStore::new()), Arc::new(NullTransport))
            .config(TelemetryConfig {
                enabled: false,
                ..TelemetryConfig::default()
            })
            .build()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn set_telemetry_token(&self, token: impl Into<String>) {
        *self.inner.telemetry_token.write() = Some(token.into());
    }

    pub fn buffer(&self) -> &LogBuffer {
        &self.inner.buffer
    }

    pub async fn device_id(&self) -> Option<String> {
        self.inner.device.device_id(self.inner.enabled).await
    }

    /// Record one event. Never fails.
    pub async fn log(&self, record: LogRecord) {
        if !self.inner.enabled {
            debug!(event = %record.event_type, "telemetry disabled, skipping record");
            return;
        }

        match (self.inner.dispatch, tokio::runtime::Handle::try_current()) {
            (TelemetryDispatch::Background, Ok(runtime)) => {
                let inner = self.inner.clone();
                runtime.spawn(async move { inner.deliver(record).await });
            }
            _ => self.inner.deliver(record).await,
        }
    }

    /// Push buffered records now.
    pub async fn flush(&self) -> FlushOutcome {
        if !self.inner.enabled {
            return FlushOutcome::Empty;
        }
        self.inner.flush_buffer().await
    }

    pub async fn log_init(&self, success: bool, model: &str, message: Option<String>) {
        let record = LogRecord::new("init")
            .with_model(model)
            .with_success(success)
            .with_message(message);
        self.log(record).await;
    }

    pub async fn log_completion(
        &self,
        result: &CompletionResult,
        model: &str,
        response_time_ms: f64,
        mode: InferenceMode,
    ) {
        let record = LogRecord::new("completion")
            .with_model(model)
            .with_success(result.success)
            .with_timing(
                Some(result.time_to_first_token_ms),
                Some(result.tokens_per_second),
            )
            .with_tokens(result.total_tokens)
            .with_response_time(response_time_ms)
            .with_message(result.failure_reason().map(str::to_string))
            .with_mode(mode);
        self.log(record).await;
    }

    pub async fn log_embedding(&self, result: &EmbeddingResult, model: &str) {
        let record = LogRecord::new("embedding")
            .with_model(model)
            .with_success(result.success)
            .with_message(result.error_message.clone());
        self.log(record).await;
    }

    pub async fn log_transcription(
        &self,
        result: &TranscriptionResult,
        model: &str,
        response_time_ms: f64,
        mode: InferenceMode,
    ) {
        let record = LogRecord::new("transcription")
            .with_model(model)
            .with_success(result.success)
            .with_audio_duration(result.total_time_ms as i64)
            .with_response_time(response_time_ms)
            .with_message(result.failure_reason().map(str::to_string))
            .with_mode(mode);
        self.log(record).await;
    }
}

impl TelemetryInner {
    async fn deliver(&self, record: LogRecord) {
        let record = self.enrich(record).await;

        match self.transport.send_batch(std::slice::from_ref(&record)).await {
            Ok(()) => {
                debug!(event = %record.event_type, "log record sent");
                self.flush_buffer().await;
            }
            Err(e) => {
                warn!(event = %record.event_type, error = %e, "log record failed, buffering");
                self.buffer.push(record).await;
            }
        }
    }

    async fn flush_buffer(&self) -> FlushOutcome {
        let transport = self.transport.clone();
        self.buffer
            .flush(|batch| async move { transport.send_batch(&batch).await })
            .await
    }

    async fn enrich(&self, mut record: LogRecord) -> LogRecord {
        if record.project_id.is_none() {
            record.project_id = self.project_id.clone();
        }
        if record.telemetry_token.is_none() {
            record.telemetry_token = self.telemetry_token.read().clone();
        }
        if record.device_id.is_none() {
            record.device_id = self.device.device_id(self.enabled).await;
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Transport that fails any batch containing an event named `doomed`.
    #[derive(Default)]
    struct ScriptedTransport {
        attempts: Mutex<Vec<Vec<String>>>,
        offline: std::sync::atomic::AtomicBool,
    }

    impl ScriptedTransport {
        fn attempts_for(&self, event: &str) -> usize {
            self.attempts
                .lock()
                .iter()
                .filter(|batch| batch.iter().any(|e| e == event))
                .count()
        }
    }

    #[async_trait]
    impl TelemetryTransport for ScriptedTransport {
        async fn send_batch(&self, records: &[LogRecord]) -> Result<(), BackendError> {
            let events: Vec<String> = records.iter().map(|r| r.event_type.clone()).collect();
            let doomed = events.iter().any(|e| e == "doomed");
            self.attempts.lock().push(events);
            if doomed || self.offline.load(std::sync::atomic::Ordering::SeqCst) {
                Err(BackendError::Status {
                    status: 503,
                    body: "unavailable".into(),
                })
            } else {
                Ok(())
            }
        }

        async fn register_device(
            &self,
            _metadata: &HashMap<String, String>,
        ) -> Result<String, BackendError> {
            Ok("payload".into())
        }
    }

    fn telemetry(transport: Arc<ScriptedTransport>) -> Telemetry {
        Telemetry::builder(Arc::new(MemoryStore::new()), transport)
            .config(TelemetryConfig {
                enabled: true,
                project_id: Some("demo".into()),
                dispatch: TelemetryDispatch::Inline,
                max_retries: MAX_RETRIES,
            })
            .build()
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let telemetry = Telemetry::disabled();
        telemetry.log(LogRecord::new("init")).await;
        assert!(telemetry.buffer().records().await.is_empty());
        assert_eq!(telemetry.flush().await, FlushOutcome::Empty);
    }

    #[tokio::test]
    async fn test_record_exceeding_retry_cap_is_dropped() {
        let transport = Arc::new(ScriptedTransport::default());
        let telemetry = telemetry(transport.clone());

        telemetry.log(LogRecord::new("doomed")).await;
        assert_eq!(telemetry.buffer().records().await.len(), 1);

        for _ in 0..MAX_RETRIES {
            telemetry.log(LogRecord::new("completion")).await;
        }

        assert!(telemetry.buffer().records().await.is_empty());
        assert_eq!(transport.attempts_for("doomed"), MAX_RETRIES as usize + 1);
    }

    #[tokio::test]
    async fn test_buffered_records_flush_after_recovery() {
        let transport = Arc::new(ScriptedTransport::default());
        let telemetry = telemetry(transport.clone());

        transport.offline.store(true, std::sync::atomic::Ordering::SeqCst);
        telemetry.log(LogRecord::new("init")).await;
        telemetry.log(LogRecord::new("completion")).await;
        assert_eq!(telemetry.buffer().records().await.len(), 2);

        transport.offline.store(false, std::sync::atomic::Ordering::SeqCst);
        telemetry.log(LogRecord::new("embedding")).await;

        assert!(telemetry.buffer().records().await.is_empty());
        let last = transport.attempts.lock().last().cloned().unwrap();
        assert_eq!(last, vec!["init".to_string(), "completion".to_string()]);
    }

    #[tokio::test]
    async fn test_records_are_enriched() {
        #[derive(Default)]
        struct Capture(Mutex<Vec<LogRecord>>);

        #[async_trait]
        impl TelemetryTransport for Capture {
            async fn send_batch(&self, records: &[LogRecord]) -> Result<(), BackendError> {
                self.0.lock().extend_from_slice(records);
                Ok(())
            }

            async fn register_device(
                &self,
                _metadata: &HashMap<String, String>,
            ) -> Result<String, BackendError> {
                Ok("payload".into())
            }
        }

        let capture = Arc::new(Capture::default());
        let telemetry = Telemetry::builder(Arc::new(MemoryStore::new()), capture.clone())
            .config(TelemetryConfig {
                project_id: Some("demo".into()),
                dispatch: TelemetryDispatch::Inline,
                ..TelemetryConfig::default()
            })
            .build();
        telemetry.set_telemetry_token("tok");

        telemetry.log_init(true, "qwen3-0.6", None).await;

        let sent = capture.0.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].project_id.as_deref(), Some("demo"));
        assert_eq!(sent[0].telemetry_token.as_deref(), Some("tok"));
        assert_eq!(
            sent[0].device_id,
            Sha256Exchange.exchange("payload")
        );
        assert_eq!(sent[0].model.as_deref(), Some("qwen3-0.6"));
    }

    #[tokio::test]
    async fn test_completion_record_carries_mode_and_failure() {
        let transport = Arc::new(ScriptedTransport::default());
        let telemetry = telemetry(transport.clone());
        transport.offline.store(true, std::sync::atomic::Ordering::SeqCst);

        let result = CompletionResult::failure("engine status -1");
        telemetry
            .log_completion(&result, "qwen3-0.6", 12.0, InferenceMode::Remote)
            .await;

        let buffered = telemetry.buffer().records().await;
        assert_eq!(buffered[0].record.mode.as_deref(), Some("REMOTE"));
        assert_eq!(buffered[0].record.success, Some(false));
        assert_eq!(buffered[0].record.message.as_deref(), Some("engine status -1"));
    }
}
