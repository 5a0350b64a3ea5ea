//! Cloud speech recognition client.
//!
//! Each endpoint is warmed up with one authenticated GET per process before
//! the first transcription; a failed warm-up is retried on the next call.

use super::{api_error, http_client, status_error};
use crate::config::RemoteConfig;
use async_trait::async_trait;
use base64::Engine as _;
use dashmap::DashSet;
use base64::engine::general_purpose::STANDARD;
use duet_kernel::error::InferenceError;
use duet_kernel::inference::TranscriptionResult;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, error, info};

const SERVICE: &str = "Remote speech";

/// Warm-up URLs that answered 200, shared by every client in the process.
static WARM_ENDPOINTS: LazyLock<DashSet<String>> = LazyLock::new(DashSet::new);

/// Remote transcription backend.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Prime the endpoint. Returns whether it is warm.
    async fn warm_up(&self, api_key: &str) -> bool;

    async fn transcribe(
        &self,
        audio_path: &Path,
        api_key: &str,
    ) -> Result<TranscriptionResult, InferenceError>;
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    audio: String,
    language: &'a str,
}

#[derive(Deserialize)]
struct SpeechResponse {
    text: String,
    /// Seconds.
    #[serde(default)]
    total_time: f64,
}

pub struct RemoteSpeechClient {
    http: Client,
    url: String,
    warmup_url: String,
    language: String,
}

impl RemoteSpeechClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, InferenceError> {
        Ok(Self {
            http: http_client(config.timeout())?,
            url: config.speech_url.clone(),
            warmup_url: config.speech_warmup_url.clone(),
            language: "en".to_string(),
        })
    }

    pub fn with_urls(mut self, url: impl Into<String>, warmup_url: impl Into<String>) -> Self {
        self.url = url.into();
        self.warmup_url = warmup_url.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Whether this client's endpoint has been warmed up by any client.
    pub fn is_warmed_up(&self) -> bool {
        WARM_ENDPOINTS.contains(&self.warmup_url)
    }
}

#[async_trait]
impl SpeechProvider for RemoteSpeechClient {
    async fn warm_up(&self, api_key: &str) -> bool {
        if self.is_warmed_up() {
            return true;
        }
        match self.http.get(&self.warmup_url).bearer_auth(api_key).send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                info!("remote speech endpoint warmed up");
                WARM_ENDPOINTS.insert(self.warmup_url.clone());
                true
            }
            Ok(response) => {
                let err = status_error(SERVICE, response).await;
                error!(error = %err, "speech warm-up rejected");
                false
            }
            Err(e) => {
                error!(error = %e, "speech warm-up failed");
                false
            }
        }
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        api_key: &str,
    ) -> Result<TranscriptionResult, InferenceError> {
        if !self.is_warmed_up() {
            self.warm_up(api_key).await;
        }

        let audio = tokio::fs::read(audio_path).await.map_err(|e| {
            InferenceError::Configuration(format!(
                "Unable to read audio file {}: {e}",
                audio_path.display()
            ))
        })?;
        debug!(bytes = audio.len(), path = %audio_path.display(), "uploading audio");

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&SpeechRequest {
                audio: STANDARD.encode(&audio),
                language: &self.language,
            })
            .send()
            .await
            .map_err(|e| api_error(SERVICE, e))?;

        if response.status() != StatusCode::OK {
            return Err(status_error(SERVICE, response).await);
        }

        let raw = response.text().await.map_err(|e| api_error(SERVICE, e))?;
        let parsed: SpeechResponse =
            serde_json::from_str(&raw).map_err(|e| InferenceError::parse("speech", e, &raw))?;

        Ok(TranscriptionResult {
            success: true,
            text: Some(parsed.text),
            total_time_ms: parsed.total_time * 1000.0,
            ..Default::default()
        })
    }
}
