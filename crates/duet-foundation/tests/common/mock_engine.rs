//! Deterministic native engine and downloader doubles.
//!
//! [`MockEngine`] loads a model when its directory holds files, answers every
//! call with canned JSON, and records what crossed the boundary so tests can
//! assert on payloads, handle lifetimes and call serialization.
//!
//! ```rust,ignore
//! let engine = MockEngine::builder()
//!     .completion(r#"{"response":"hi"}"#)
//!     .stream_tokens(&["h", "i"])
//!     .build();
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use duet_kernel::engine::{EngineHandle, NativeEngine, TokenCallback};
use duet_kernel::error::DownloadError;
use duet_kernel::model::{DownloadTask, ModelDownloader};
use parking_lot::Mutex;

/// One completion call as seen by the engine.
#[derive(Debug, Clone)]
pub struct CompletionCall {
    pub handle: u64,
    pub messages_json: String,
    pub options_json: String,
    pub tools_json: Option<String>,
    pub buffer_len: usize,
    pub streaming: bool,
}

#[derive(Default)]
struct EngineState {
    inits: Vec<PathBuf>,
    destroyed: Vec<u64>,
    live: HashSet<u64>,
    max_live: usize,
    completions: Vec<CompletionCall>,
    embedding_buffers: Vec<usize>,
    transcriptions: Vec<(PathBuf, String)>,
}

pub struct MockEngine {
    completion_json: String,
    completion_status: i32,
    transcription_json: String,
    transcription_status: i32,
    tokens: Vec<String>,
    embedding: Vec<f32>,
    refused: HashSet<String>,
    call_delay: Duration,
    next_handle: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    state: Mutex<EngineState>,
}

pub struct MockEngineBuilder {
    completion_json: String,
    completion_status: i32,
    transcription_json: String,
    transcription_status: i32,
    tokens: Vec<String>,
    embedding: Vec<f32>,
    refused: HashSet<String>,
    call_delay: Duration,
}

impl MockEngineBuilder {
    pub fn completion(mut self, json: impl Into<String>) -> Self {
        self.completion_json = json.into();
        self
    }

    /// Every completion returns a non-positive status.
    pub fn failing_completions(mut self) -> Self {
        self.completion_status = -1;
        self
    }

    pub fn transcription(mut self, json: impl Into<String>) -> Self {
        self.transcription_json = json.into();
        self
    }

    pub fn failing_transcriptions(mut self) -> Self {
        self.transcription_status = -1;
        self
    }

    /// Tokens pushed through the callback before the result is written.
    pub fn stream_tokens(mut self, tokens: &[&str]) -> Self {
        self.tokens = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn embedding(mut self, vector: Vec<f32>) -> Self {
        self.embedding = vector;
        self
    }

    /// Refuse to initialize `slug` even when its files are present.
    pub fn refuse(mut self, slug: &str) -> Self {
        self.refused.insert(slug.to_string());
        self
    }

    /// Hold every completion for `delay` to widen race windows.
    pub fn call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    pub fn build(self) -> Arc<MockEngine> {
        Arc::new(MockEngine {
            completion_json: self.completion_json,
            completion_status: self.completion_status,
            transcription_json: self.transcription_json,
            transcription_status: self.transcription_status,
            tokens: self.tokens,
            embedding: self.embedding,
            refused: self.refused,
            call_delay: self.call_delay,
            next_handle: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            state: Mutex::new(EngineState::default()),
        })
    }
}

impl MockEngine {
    pub fn builder() -> MockEngineBuilder {
        MockEngineBuilder {
            completion_json: r#"{"success":true,"response":"local answer","time_to_first_token_ms":5,"total_time_ms":50,"decode_tokens":10,"total_tokens":12}"#.to_string(),
            completion_status: 1,
            transcription_json: r#"{"success":true,"response":"<|startoftranscript|><|en|> local words<|endoftext|>","total_time_ms":80}"#.to_string(),
            transcription_status: 1,
            tokens: Vec::new(),
            embedding: vec![0.5, 0.5],
            refused: HashSet::new(),
            call_delay: Duration::ZERO,
        }
    }

    pub fn init_paths(&self) -> Vec<PathBuf> {
        self.state.lock().inits.clone()
    }

    pub fn destroyed(&self) -> Vec<u64> {
        self.state.lock().destroyed.clone()
    }

    pub fn live_handles(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Highest number of simultaneously live handles.
    pub fn max_live_handles(&self) -> usize {
        self.state.lock().max_live
    }

    /// Highest number of engine calls running at once.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn completions(&self) -> Vec<CompletionCall> {
        self.state.lock().completions.clone()
    }

    pub fn embedding_buffers(&self) -> Vec<usize> {
        self.state.lock().embedding_buffers.clone()
    }

    pub fn transcriptions(&self) -> Vec<(PathBuf, String)> {
        self.state.lock().transcriptions.clone()
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn write(out: &mut [u8], json: &str) {
        let len = json.len().min(out.len());
        out[..len].copy_from_slice(&json.as_bytes()[..len]);
    }

    fn has_files(path: &Path) -> bool {
        std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }
}

impl NativeEngine for MockEngine {
    fn init(&self, model_path: &Path, _context_size: u32) -> Option<EngineHandle> {
        let mut state = self.state.lock();
        state.inits.push(model_path.to_path_buf());

        let slug = model_path.file_name()?.to_string_lossy().to_string();
        if self.refused.contains(&slug) || !Self::has_files(model_path) {
            return None;
        }

        let raw = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        state.live.insert(raw);
        state.max_live = state.max_live.max(state.live.len());
        EngineHandle::from_raw(raw)
    }

    fn complete(
        &self,
        handle: EngineHandle,
        messages_json: &str,
        out: &mut [u8],
        options_json: &str,
        tools_json: Option<&str>,
        on_token: Option<TokenCallback<'_>>,
    ) -> i32 {
        self.enter();
        self.state.lock().completions.push(CompletionCall {
            handle: handle.as_raw(),
            messages_json: messages_json.to_string(),
            options_json: options_json.to_string(),
            tools_json: tools_json.map(str::to_string),
            buffer_len: out.len(),
            streaming: on_token.is_some(),
        });
        if !self.call_delay.is_zero() {
            std::thread::sleep(self.call_delay);
        }
        if let Some(on_token) = on_token {
            for (id, token) in self.tokens.iter().enumerate() {
                on_token(token, id as u32);
            }
        }
        Self::write(out, &self.completion_json);
        self.leave();
        self.completion_status
    }

    fn embed(&self, _handle: EngineHandle, _text: &str, out: &mut [f32], out_dim: &mut usize) -> i32 {
        self.enter();
        self.state.lock().embedding_buffers.push(out.len());
        let len = self.embedding.len().min(out.len());
        out[..len].copy_from_slice(&self.embedding[..len]);
        *out_dim = self.embedding.len();
        self.leave();
        1
    }

    fn transcribe(
        &self,
        _handle: EngineHandle,
        audio_path: &Path,
        prompt: &str,
        out: &mut [u8],
        _options_json: &str,
        on_token: Option<TokenCallback<'_>>,
    ) -> i32 {
        self.enter();
        self.state
            .lock()
            .transcriptions
            .push((audio_path.to_path_buf(), prompt.to_string()));
        if let Some(on_token) = on_token {
            for (id, token) in self.tokens.iter().enumerate() {
                on_token(token, id as u32);
            }
        }
        Self::write(out, &self.transcription_json);
        self.leave();
        self.transcription_status
    }

    fn destroy(&self, handle: EngineHandle) {
        let mut state = self.state.lock();
        state.live.remove(&handle.as_raw());
        state.destroyed.push(handle.as_raw());
    }
}

/// Downloader that writes a placeholder weights file, or fails on demand.
#[derive(Default)]
pub struct MockDownloader {
    fail: bool,
    fetched: Mutex<Vec<DownloadTask>>,
}

impl MockDownloader {
    pub fn failing() -> Self {
        Self {
            fail: true,
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn fetched(&self) -> Vec<DownloadTask> {
        self.fetched.lock().clone()
    }
}

#[async_trait]
impl ModelDownloader for MockDownloader {
    async fn fetch(&self, task: &DownloadTask, destination: &Path) -> Result<(), DownloadError> {
        self.fetched.lock().push(task.clone());
        // Partial files are written before the failure.
        tokio::fs::write(destination.join(&task.file_name), b"weights")
            .await
            .map_err(|e| DownloadError::Storage {
                slug: task.folder.clone(),
                reason: e.to_string(),
            })?;
        if self.fail {
            return Err(DownloadError::Transfer {
                slug: task.folder.clone(),
                reason: "connection reset by peer".to_string(),
            });
        }
        Ok(())
    }
}
