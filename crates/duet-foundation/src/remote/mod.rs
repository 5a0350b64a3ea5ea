//! Remote inference endpoints: OpenAI-compatible chat and cloud speech recognition.

mod chat;
mod speech;

pub use chat::{OpenAiCompatibleChat, RemoteChatProvider};
pub use speech::{RemoteSpeechClient, SpeechProvider};

use duet_kernel::error::InferenceError;
use std::time::Duration;

fn http_client(timeout: Duration) -> Result<reqwest::Client, InferenceError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| InferenceError::Configuration(format!("HTTP client setup failed: {e}")))
}

fn api_error(service: &str, detail: impl std::fmt::Display) -> InferenceError {
    InferenceError::TransientNetwork(format!("{service} API error: {detail}"))
}

async fn status_error(service: &str, response: reqwest::Response) -> InferenceError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    api_error(service, format!("{status} - {body}"))
}
