//! OpenAI-compatible chat completions client.

use super::{api_error, http_client, status_error};
use crate::config::RemoteConfig;
use crate::streaming::{StreamToken, TokenSink};
use async_trait::async_trait;
use duet_kernel::error::InferenceError;
use duet_kernel::inference::{ChatMessage, CompletionParams, CompletionResult, tokens_per_second};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

const SERVICE: &str = "Remote chat";

/// Remote completion backend.
#[async_trait]
pub trait RemoteChatProvider: Send + Sync {
    /// Complete `messages` with the provider's configured model. Streams
    /// tokens into `sink` when one is given.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
        token: &str,
        sink: Option<&TokenSink>,
    ) -> Result<CompletionResult, InferenceError>;

    /// Model the provider serves.
    fn model(&self) -> &str;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    stop: &'a [String],
    stream: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatContent>,
    delta: Option<ChatContent>,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    content: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// Chat client for any endpoint speaking the OpenAI `chat/completions` protocol.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleChat {
    http: Client,
    url: String,
    model: String,
}

impl OpenAiCompatibleChat {
    pub fn new(config: &RemoteConfig) -> Result<Self, InferenceError> {
        Ok(Self {
            http: http_client(config.timeout())?,
            url: config.chat_url.clone(),
            model: config.default_model.clone(),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn request<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        params: &'a CompletionParams,
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            stop: &params.stop_sequences,
            stream,
        }
    }

    async fn send(
        &self,
        body: &ChatRequest<'_>,
        token: &str,
    ) -> Result<reqwest::Response, InferenceError> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| api_error(SERVICE, e))?;

        if response.status() != StatusCode::OK {
            return Err(status_error(SERVICE, response).await);
        }
        Ok(response)
    }

    async fn complete_once(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
        token: &str,
    ) -> Result<CompletionResult, InferenceError> {
        let started = Instant::now();
        let response = self
            .send(&self.request(messages, params, false), token)
            .await?;
        let raw = response.text().await.map_err(|e| api_error(SERVICE, e))?;
        let parsed: ChatResponse =
            serde_json::from_str(&raw).map_err(|e| InferenceError::parse("remote", e, &raw))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default();
        let usage = parsed.usage.unwrap_or_default();
        let total_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        Ok(CompletionResult {
            success: true,
            response: Some(content),
            time_to_first_token_ms: 0.0,
            total_time_ms,
            tokens_per_second: tokens_per_second(usage.total_tokens, total_time_ms),
            prefill_tokens: usage.prompt_tokens,
            decode_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            ..Default::default()
        })
    }

    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
        token: &str,
        sink: &TokenSink,
    ) -> Result<CompletionResult, InferenceError> {
        let started = Instant::now();
        let response = self
            .send(&self.request(messages, params, true), token)
            .await?;

        let mut body = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        let mut text = String::new();
        let mut usage = ChatUsage::default();
        let mut ttft_ms = 0.0;

        'read: while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| api_error(SERVICE, e))?;
            pending.extend_from_slice(&chunk);

            while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                let Some(data) = line.trim_end().strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    break 'read;
                }

                let event: ChatResponse = serde_json::from_str(data).map_err(|e| {
                    InferenceError::parse("remote", format!("Unable to parse API response json: {e}"), data)
                })?;
                if let Some(chunk_usage) = event.usage {
                    usage = chunk_usage;
                }
                let delta = event
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta)
                    .and_then(|delta| delta.content);
                if let Some(content) = delta {
                    if ttft_ms == 0.0 {
                        ttft_ms = started.elapsed().as_secs_f64() * 1000.0;
                    }
                    // Offset of the token within the response.
                    let id = text.len() as u32;
                    text.push_str(&content);
                    if sink.send(StreamToken::new(content, id)).await.is_err() {
                        debug!("token consumer dropped, continuing without streaming");
                    }
                }
            }
        }

        let total_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            model = %self.model,
            ttft_ms,
            total_time_ms,
            tokens = usage.total_tokens,
            "remote stream finished"
        );

        Ok(CompletionResult {
            success: true,
            response: Some(text),
            time_to_first_token_ms: ttft_ms,
            total_time_ms,
            tokens_per_second: tokens_per_second(usage.total_tokens, total_time_ms),
            prefill_tokens: usage.prompt_tokens,
            decode_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            ..Default::default()
        })
    }
}

#[async_trait]
impl RemoteChatProvider for OpenAiCompatibleChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
        token: &str,
        sink: Option<&TokenSink>,
    ) -> Result<CompletionResult, InferenceError> {
        debug!(model = %self.model, streaming = sink.is_some(), "remote completion");
        match sink {
            Some(sink) => self.complete_streaming(messages, params, token, sink).await,
            None => self.complete_once(messages, params, token).await,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}
