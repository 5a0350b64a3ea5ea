//! Native engine calls
//!
//! [`NativeRuntime`] moves every engine primitive onto the blocking pool and
//! converts status codes and output buffers into typed results.

mod payload;
mod response;

pub use payload::{
    CompletionPayload, NATIVE_PAYLOAD_SCHEMA_VERSION, PayloadError, TranscriptionPayload,
    embedding_buffer_len,
};
pub use response::{buffer_text, clean_transcript, parse_completion, parse_transcription};

use crate::streaming::{StreamToken, TokenSink};
use duet_kernel::engine::{EngineHandle, NativeEngine, TokenCallback};
use duet_kernel::error::InferenceError;
use duet_kernel::inference::{CompletionResult, TranscriptionResult};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::debug;

fn aborted(operation: &str, e: JoinError) -> InferenceError {
    InferenceError::NativeEngine {
        status: 0,
        context: format!("{operation} task aborted: {e}"),
    }
}

fn check_status(operation: &str, status: i32) -> Result<(), InferenceError> {
    if status > 0 {
        Ok(())
    } else {
        Err(InferenceError::NativeEngine {
            status,
            context: format!("{operation} failed with code {status}"),
        })
    }
}

/// Forward engine tokens into `sink`. A closed channel is ignored.
fn forwarder(sink: TokenSink) -> impl FnMut(&str, u32) + Send {
    move |text: &str, id: u32| {
        let _ = sink.blocking_send(StreamToken::new(text, id));
    }
}

#[derive(Clone)]
pub struct NativeRuntime {
    engine: Arc<dyn NativeEngine>,
}

impl NativeRuntime {
    pub fn new(engine: Arc<dyn NativeEngine>) -> Self {
        Self { engine }
    }

    pub async fn init(&self, model_path: PathBuf, context_size: u32) -> Option<EngineHandle> {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || engine.init(&model_path, context_size))
            .await
            .ok()
            .flatten()
    }

    pub async fn destroy(&self, handle: EngineHandle) {
        let engine = self.engine.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || engine.destroy(handle)).await {
            tracing::warn!(%handle, error = %e, "native destroy task aborted");
        }
    }

    pub async fn complete(
        &self,
        handle: EngineHandle,
        payload: CompletionPayload,
        sink: Option<TokenSink>,
    ) -> Result<CompletionResult, InferenceError> {
        let engine = self.engine.clone();
        let raw = tokio::task::spawn_blocking(move || {
            let mut out = vec![0u8; payload.buffer_len];
            let tools = payload.tools_json.as_deref();
            let status = match sink {
                Some(sink) => {
                    let mut forward = forwarder(sink);
                    let on_token: TokenCallback<'_> = &mut forward;
                    engine.complete(
                        handle,
                        &payload.messages_json,
                        &mut out,
                        &payload.options_json,
                        tools,
                        Some(on_token),
                    )
                }
                None => engine.complete(
                    handle,
                    &payload.messages_json,
                    &mut out,
                    &payload.options_json,
                    tools,
                    None,
                ),
            };
            check_status("completion", status).map(|()| buffer_text(&out))
        })
        .await
        .map_err(|e| aborted("completion", e))??;

        debug!(%handle, bytes = raw.len(), "native completion returned");
        parse_completion(&raw)
    }

    pub async fn embed(
        &self,
        handle: EngineHandle,
        text: String,
        quantization: u32,
    ) -> Result<Vec<f32>, InferenceError> {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || {
            let mut out = vec![0f32; embedding_buffer_len(&text, quantization)];
            let mut dimension = 0usize;
            let status = engine.embed(handle, &text, &mut out, &mut dimension);
            check_status("embedding", status)?;
            if dimension > out.len() {
                return Err(InferenceError::NativeEngine {
                    status,
                    context: format!(
                        "Embedding dimension ({dimension}) exceeds allocated buffer size ({})",
                        out.len()
                    ),
                });
            }
            out.truncate(dimension);
            Ok(out)
        })
        .await
        .map_err(|e| aborted("embedding", e))?
    }

    pub async fn transcribe(
        &self,
        handle: EngineHandle,
        audio_path: PathBuf,
        prompt: String,
        payload: TranscriptionPayload,
        sink: Option<TokenSink>,
    ) -> Result<TranscriptionResult, InferenceError> {
        let engine = self.engine.clone();
        let raw = tokio::task::spawn_blocking(move || {
            let mut out = vec![0u8; payload.buffer_len];
            let status = match sink {
                Some(sink) => {
                    let mut forward = forwarder(sink);
                    let on_token: TokenCallback<'_> = &mut forward;
                    engine.transcribe(
                        handle,
                        &audio_path,
                        &prompt,
                        &mut out,
                        &payload.options_json,
                        Some(on_token),
                    )
                }
                None => engine.transcribe(
                    handle,
                    &audio_path,
                    &prompt,
                    &mut out,
                    &payload.options_json,
                    None,
                ),
            };
            check_status("transcription", status).map(|()| buffer_text(&out))
        })
        .await
        .map_err(|e| aborted("transcription", e))??;

        parse_transcription(&raw)
    }
}
