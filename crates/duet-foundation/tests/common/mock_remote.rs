//! Remote provider and telemetry transport doubles.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use duet_foundation::backend::BackendError;
use duet_foundation::remote::{RemoteChatProvider, SpeechProvider};
use duet_foundation::streaming::{StreamToken, TokenSink};
use duet_foundation::telemetry::{LogRecord, TelemetryTransport};
use duet_kernel::error::InferenceError;
use duet_kernel::inference::{ChatMessage, CompletionParams, CompletionResult, TranscriptionResult};
use parking_lot::Mutex;

/// Chat provider answering from a FIFO queue, then with a default success.
pub struct MockRemoteChat {
    model: String,
    queue: Mutex<VecDeque<Result<CompletionResult, InferenceError>>>,
    tokens: Vec<String>,
    calls: Mutex<Vec<(Vec<ChatMessage>, String)>>,
}

impl MockRemoteChat {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            queue: Mutex::new(VecDeque::new()),
            tokens: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond_with(self, text: &str) -> Self {
        self.queue.lock().push_back(Ok(CompletionResult {
            success: true,
            response: Some(text.to_string()),
            total_tokens: 3,
            ..Default::default()
        }));
        self
    }

    pub fn respond_with_error(self, error: InferenceError) -> Self {
        self.queue.lock().push_back(Err(error));
        self
    }

    pub fn stream_tokens(mut self, tokens: &[&str]) -> Self {
        self.tokens = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Bearer tokens of every call, in order.
    pub fn tokens_used(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, token)| token.clone()).collect()
    }
}

#[async_trait]
impl RemoteChatProvider for MockRemoteChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _params: &CompletionParams,
        token: &str,
        sink: Option<&TokenSink>,
    ) -> Result<CompletionResult, InferenceError> {
        self.calls.lock().push((messages.to_vec(), token.to_string()));
        if let Some(sink) = sink {
            for (id, text) in self.tokens.iter().enumerate() {
                let _ = sink.send(StreamToken::new(text.as_str(), id as u32)).await;
            }
        }
        let next = self.queue.lock().pop_front();
        next.unwrap_or_else(|| {
            Ok(CompletionResult {
                success: true,
                response: Some("remote answer".to_string()),
                ..Default::default()
            })
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Speech provider with a fixed outcome.
pub struct MockSpeech {
    outcome: Result<String, InferenceError>,
    warm: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MockSpeech {
    pub fn transcribing(text: &str) -> Self {
        Self {
            outcome: Ok(text.to_string()),
            warm: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: InferenceError) -> Self {
        Self {
            outcome: Err(error),
            warm: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl SpeechProvider for MockSpeech {
    async fn warm_up(&self, _api_key: &str) -> bool {
        self.warm.store(true, Ordering::SeqCst);
        true
    }

    async fn transcribe(
        &self,
        _audio_path: &Path,
        api_key: &str,
    ) -> Result<TranscriptionResult, InferenceError> {
        self.calls.lock().push(api_key.to_string());
        self.outcome.clone().map(|text| TranscriptionResult {
            success: true,
            text: Some(text),
            total_time_ms: 250.0,
            ..Default::default()
        })
    }
}

/// Telemetry sink that records delivered batches and can be switched offline.
#[derive(Default)]
pub struct RecordingTransport {
    offline: AtomicBool,
    delivered: Mutex<Vec<LogRecord>>,
    attempts: Mutex<usize>,
}

impl RecordingTransport {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<LogRecord> {
        self.delivered.lock().clone()
    }

    pub fn delivered_events(&self) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .map(|r| r.event_type.clone())
            .collect()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

#[async_trait]
impl TelemetryTransport for RecordingTransport {
    async fn send_batch(&self, records: &[LogRecord]) -> Result<(), BackendError> {
        *self.attempts.lock() += 1;
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 503,
                body: "offline".to_string(),
            });
        }
        self.delivered.lock().extend_from_slice(records);
        Ok(())
    }

    async fn register_device(
        &self,
        _metadata: &HashMap<String, String>,
    ) -> Result<String, BackendError> {
        Ok("device-payload".to_string())
    }
}
