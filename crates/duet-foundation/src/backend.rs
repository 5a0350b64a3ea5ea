//! Backend HTTP client
//!
//! One `reqwest` client shared by the model catalog and the telemetry sink.
//!
//! | operation            | request                                                        |
//! |----------------------|----------------------------------------------------------------|
//! | model by slug        | `GET  {base}/functions/v1/get-models?slug=..&sdk_name=..&sdk_version=..` |
//! | model list           | `GET  {base}/functions/v1/get-models?sdk_name=..&sdk_version=..` |
//! | voice model list     | `GET  {base}/rest/v1/whisper?select=*`                         |
//! | log batch            | `POST {base}/rest/v1/logs` (200/201 = delivered)               |
//! | device registration  | `POST {base}/functions/v1/device-registration`                 |

use crate::config::BackendConfig;
use crate::registry::CatalogSource;
use crate::telemetry::{LogRecord, TelemetryTransport};
use async_trait::async_trait;
use duet_kernel::error::InferenceError;
use duet_kernel::model::{ModelDescriptor, VoiceModelDescriptor};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Client setup failed: {0}")]
    Client(String),
}

impl From<BackendError> for InferenceError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Decode(reason) => InferenceError::parse("backend", reason, ""),
            BackendError::Client(reason) => InferenceError::Configuration(reason),
            other => InferenceError::TransientNetwork(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct DeviceRegistration<'a> {
    device_data: &'a HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
    api_key: String,
    sdk_name: String,
    sdk_version: String,
    schema_profile: String,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| BackendError::Client(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            sdk_name: config.sdk_name.clone(),
            sdk_version: config.sdk_version.clone(),
            schema_profile: config.schema_profile.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn catalog_request(&self, slug: Option<&str>) -> RequestBuilder {
        let mut query: Vec<(&str, &str)> = Vec::with_capacity(3);
        if let Some(slug) = slug {
            query.push(("slug", slug));
        }
        query.push(("sdk_name", &self.sdk_name));
        query.push(("sdk_version", &self.sdk_version));

        self.http
            .get(self.url("/functions/v1/get-models"))
            .query(&query)
            .bearer_auth(&self.api_key)
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
        let response = Self::ensure_success(response, &[StatusCode::OK]).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn ensure_success(
        response: Response,
        accepted: &[StatusCode],
    ) -> Result<Response, BackendError> {
        let status = response.status();
        if accepted.contains(&status) {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl CatalogSource for BackendClient {
    async fn fetch_model(&self, slug: &str) -> Result<ModelDescriptor, BackendError> {
        let response = self.catalog_request(Some(slug)).send().await?;
        Self::read_json(response).await
    }

    async fn fetch_models(&self) -> Result<Vec<ModelDescriptor>, BackendError> {
        let response = self.catalog_request(None).send().await?;
        Self::read_json(response).await
    }

    async fn fetch_voice_models(&self) -> Result<Vec<VoiceModelDescriptor>, BackendError> {
        let response = self
            .http
            .get(self.url("/rest/v1/whisper"))
            .query(&[("select", "*")])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Accept-Profile", &self.schema_profile)
            .send()
            .await?;
        Self::read_json(response).await
    }
}

#[async_trait]
impl TelemetryTransport for BackendClient {
    async fn send_batch(&self, records: &[LogRecord]) -> Result<(), BackendError> {
        let response = self
            .http
            .post(self.url("/rest/v1/logs"))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=minimal")
            .header("Content-Profile", &self.schema_profile)
            .json(records)
            .send()
            .await?;
        debug!(status = %response.status(), records = records.len(), "log batch response");
        Self::ensure_success(response, &[StatusCode::OK, StatusCode::CREATED]).await?;
        Ok(())
    }

    async fn register_device(
        &self,
        metadata: &HashMap<String, String>,
    ) -> Result<String, BackendError> {
        let response = self
            .http
            .post(self.url("/functions/v1/device-registration"))
            .json(&DeviceRegistration {
                device_data: metadata,
            })
            .send()
            .await?;
        let response = Self::ensure_success(response, &[StatusCode::OK]).await?;
        Ok(response.text().await?)
    }
}
