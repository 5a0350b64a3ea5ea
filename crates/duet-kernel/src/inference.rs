//! Request and result value objects shared by every inference path.

use crate::tool::{ToolCall, ToolDescriptor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default completion token budget.
pub const DEFAULT_MAX_TOKENS: u32 = 512;

/// Default native context window.
pub const DEFAULT_CONTEXT_SIZE: u32 = 2048;

/// Lower bound for native output buffers, in elements.
pub const MIN_OUTPUT_BUFFER: usize = 2048;

/// Stop sequences understood by the chat templates of the bundled models.
pub const DEFAULT_STOP_SEQUENCES: [&str; 2] = ["<|im_end|>", "<end_of_turn>"];

fn default_stop_sequences() -> Vec<String> {
    DEFAULT_STOP_SEQUENCES.iter().map(|s| s.to_string()).collect()
}

/// Native output buffer length: `max(max_tokens * quantization, 2048)`.
pub fn output_buffer_len(max_tokens: usize, quantization: u32) -> usize {
    max_tokens
        .saturating_mul(quantization as usize)
        .max(MIN_OUTPUT_BUFFER)
}

/// Tokens per second rounded to two decimals, or `0.0` when either input is
/// not positive.
pub fn tokens_per_second(tokens: u32, elapsed_ms: f64) -> f64 {
    if tokens == 0 || elapsed_ms <= 0.0 {
        return 0.0;
    }
    ((tokens as f64 * 1000.0 / elapsed_ms) * 100.0).round() / 100.0
}

/// Where a call is served from, and in which order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InferenceMode {
    #[default]
    Local,
    Remote,
    LocalFirst,
    RemoteFirst,
}

impl fmt::Display for InferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InferenceMode::Local => "LOCAL",
            InferenceMode::Remote => "REMOTE",
            InferenceMode::LocalFirst => "LOCAL_FIRST",
            InferenceMode::RemoteFirst => "REMOTE_FIRST",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for InferenceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "LOCAL" => Ok(InferenceMode::Local),
            "REMOTE" => Ok(InferenceMode::Remote),
            "LOCAL_FIRST" => Ok(InferenceMode::LocalFirst),
            "REMOTE_FIRST" => Ok(InferenceMode::RemoteFirst),
            other => Err(format!("unknown inference mode: {other}")),
        }
    }
}

/// A single chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn is_user(&self) -> bool {
        self.role == "user"
    }
}

/// Completion request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionParams {
    /// Model slug; `None` reuses the last initialized model.
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub top_k: Option<u32>,
    pub top_p: Option<f64>,
    pub max_tokens: u32,
    pub stop_sequences: Vec<String>,
    pub tools: Vec<ToolDescriptor>,
    pub mode: InferenceMode,
    /// Bearer token for the remote chat endpoint.
    pub remote_token: Option<String>,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            model: None,
            temperature: None,
            top_k: None,
            top_p: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            stop_sequences: default_stop_sequences(),
            tools: Vec::new(),
            mode: InferenceMode::Local,
            remote_token: None,
        }
    }
}

impl CompletionParams {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_stop_sequences(mut self, stop: Vec<String>) -> Self {
        self.stop_sequences = stop;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_mode(mut self, mode: InferenceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_remote_token(mut self, token: impl Into<String>) -> Self {
        self.remote_token = Some(token.into());
        self
    }
}

/// Outcome of a completion call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub success: bool,
    /// Generated text on success, failure description otherwise.
    pub response: Option<String>,
    pub time_to_first_token_ms: f64,
    pub total_time_ms: f64,
    pub tokens_per_second: f64,
    pub prefill_tokens: u32,
    pub decode_tokens: u32,
    pub total_tokens: u32,
    pub tool_calls: Vec<ToolCall>,
    /// Path that produced this result.
    pub served_by: Option<InferenceMode>,
}

impl CompletionResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            response: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn served_by(mut self, mode: InferenceMode) -> Self {
        self.served_by = Some(mode);
        self
    }

    /// Failure text, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        if self.success {
            None
        } else {
            self.response.as_deref()
        }
    }
}

/// Transcription request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionParams {
    pub model: Option<String>,
    pub max_tokens: u32,
    pub stop_sequences: Vec<String>,
}

impl Default for TranscriptionParams {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            stop_sequences: default_stop_sequences(),
        }
    }
}

impl TranscriptionParams {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Outcome of a transcription call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub success: bool,
    pub text: Option<String>,
    pub time_to_first_token_ms: f64,
    pub total_time_ms: f64,
    pub tokens_per_second: f64,
    pub error_message: Option<String>,
    pub served_by: Option<InferenceMode>,
}

impl TranscriptionResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn served_by(mut self, mode: InferenceMode) -> Self {
        self.served_by = Some(mode);
        self
    }

    pub fn failure_reason(&self) -> Option<&str> {
        if self.success {
            None
        } else {
            self.error_message.as_deref().or(self.text.as_deref())
        }
    }
}

/// Outcome of an embedding call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub success: bool,
    pub embeddings: Vec<f32>,
    pub dimension: usize,
    pub error_message: Option<String>,
}

impl EmbeddingResult {
    pub fn ok(embeddings: Vec<f32>) -> Self {
        Self {
            success: true,
            dimension: embeddings.len(),
            embeddings,
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Explicit model initialization parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitParams {
    pub model: Option<String>,
    pub context_size: Option<u32>,
}

impl InitParams {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            context_size: None,
        }
    }

    pub fn with_context_size(mut self, context_size: u32) -> Self {
        self.context_size = Some(context_size);
        self
    }

    pub fn context_size_or_default(&self) -> u32 {
        self.context_size.unwrap_or(DEFAULT_CONTEXT_SIZE)
    }
}
