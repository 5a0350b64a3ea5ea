//! Typed request payloads for the native engine.
//!
//! Every payload is built from typed structs, serialized with `serde_json`
//! and validated before it crosses the engine boundary.

use duet_kernel::error::InferenceError;
use duet_kernel::inference::{
    ChatMessage, CompletionParams, MIN_OUTPUT_BUFFER, TranscriptionParams, output_buffer_len,
};
use duet_kernel::tool::ToolDescriptor;
use serde::Serialize;
use thiserror::Error;

/// Version stamped into every options document.
pub const NATIVE_PAYLOAD_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PayloadError {
    #[error("at least one message is required")]
    EmptyMessages,

    #[error("max_tokens must be greater than zero")]
    ZeroMaxTokens,

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<PayloadError> for InferenceError {
    fn from(err: PayloadError) -> Self {
        InferenceError::Configuration(err.to_string())
    }
}

#[derive(Serialize)]
struct CompletionOptions<'a> {
    schema_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop_sequences: &'a [String],
}

#[derive(Serialize)]
struct TranscriptionOptions<'a> {
    schema_version: u32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop_sequences: &'a [String],
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionPayload {
    pub messages_json: String,
    pub options_json: String,
    /// `None` when no tools are offered.
    pub tools_json: Option<String>,
    /// Output buffer length in bytes.
    pub buffer_len: usize,
}

impl CompletionPayload {
    pub fn build(
        messages: &[ChatMessage],
        params: &CompletionParams,
        tools: &[ToolDescriptor],
        quantization: u32,
    ) -> Result<Self, PayloadError> {
        if messages.is_empty() {
            return Err(PayloadError::EmptyMessages);
        }
        if params.max_tokens == 0 {
            return Err(PayloadError::ZeroMaxTokens);
        }

        let options = CompletionOptions {
            schema_version: NATIVE_PAYLOAD_SCHEMA_VERSION,
            temperature: params.temperature,
            top_k: params.top_k,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
            stop_sequences: &params.stop_sequences,
        };
        let tools_json = if tools.is_empty() {
            None
        } else {
            Some(serde_json::to_string(tools)?)
        };

        Ok(Self {
            messages_json: serde_json::to_string(messages)?,
            options_json: serde_json::to_string(&options)?,
            tools_json,
            buffer_len: output_buffer_len(params.max_tokens as usize, quantization),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionPayload {
    pub options_json: String,
    pub buffer_len: usize,
}

impl TranscriptionPayload {
    pub fn build(params: &TranscriptionParams, quantization: u32) -> Result<Self, PayloadError> {
        if params.max_tokens == 0 {
            return Err(PayloadError::ZeroMaxTokens);
        }
        let options = TranscriptionOptions {
            schema_version: NATIVE_PAYLOAD_SCHEMA_VERSION,
            max_tokens: params.max_tokens,
            stop_sequences: &params.stop_sequences,
        };
        Ok(Self {
            options_json: serde_json::to_string(&options)?,
            buffer_len: output_buffer_len(params.max_tokens as usize, quantization),
        })
    }
}

/// Embedding buffer length in floats: `max(text_len * quantization, 2048)`.
pub fn embedding_buffer_len(text: &str, quantization: u32) -> usize {
    text.len()
        .saturating_mul(quantization as usize)
        .max(MIN_OUTPUT_BUFFER)
}
