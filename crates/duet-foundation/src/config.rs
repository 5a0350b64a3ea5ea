//! Duet configuration
//!
//! Loaded from YAML, TOML or JSON with `${ENV}` substitution, then overridden
//! by `DUET_*` environment variables (`DUET_BACKEND__API_KEY`,
//! `DUET_TELEMETRY__ENABLED`, ...). Every section has defaults, so an empty
//! file or no file at all is valid.
//!
//! # Example (duet.yml)
//!
//! ```yaml
//! backend:
//!   base_url: https://catalog.example.com
//!   api_key: ${DUET_CATALOG_KEY}
//!   timeout_secs: 30
//!
//! remote:
//!   chat_url: https://openrouter.ai/api/v1/chat/completions
//!   default_model: qwen/qwen-2.5-7b-instruct
//!
//! telemetry:
//!   enabled: true
//!   project_id: my-app
//!   dispatch: background
//!
//! tool_filter:
//!   strategy: keyword
//!   max_tools: 3
//!   similarity_threshold: 0.3
//!
//! storage:
//!   cache_dir: .duet/cache
//!   models_dir: .duet/models
//! ```

use crate::telemetry::TelemetryDispatch;
use crate::tools::ToolFilterConfig;
use duet_kernel::config::{ConfigResult, load_with_env};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "DUET";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DuetConfig {
    pub backend: BackendConfig,
    pub remote: RemoteConfig,
    pub telemetry: TelemetryConfig,
    pub tool_filter: ToolFilterConfig,
    pub storage: StorageConfig,
}

impl DuetConfig {
    /// Load from an optional file plus `DUET_*` environment overrides.
    pub fn load(path: Option<&str>) -> ConfigResult<Self> {
        load_with_env(path, ENV_PREFIX)
    }
}

/// Model catalog and telemetry backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
    /// Reported to the catalog so it can serve SDK-compatible builds.
    pub sdk_name: String,
    pub sdk_version: String,
    /// Database schema selected through `Accept-Profile` / `Content-Profile`.
    pub schema_profile: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            timeout_secs: 30,
            sdk_name: "rust".to_string(),
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
            schema_profile: "duet".to_string(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Remote chat and speech endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub chat_url: String,
    pub default_model: String,
    pub speech_url: String,
    pub speech_warmup_url: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            chat_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            default_model: "qwen/qwen-2.5-7b-instruct".to_string(),
            speech_url: "https://api.wisprflow.ai/api/v1/dash/api".to_string(),
            speech_warmup_url: "https://api.wisprflow.ai/api/v1/dash/warmup_dash".to_string(),
            timeout_secs: 60,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub project_id: Option<String>,
    pub dispatch: TelemetryDispatch,
    pub max_retries: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            project_id: None,
            dispatch: TelemetryDispatch::Background,
            max_retries: crate::telemetry::MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Key/value blobs: model cache, log buffer, device id.
    pub cache_dir: PathBuf,
    /// One sub-directory per model slug.
    pub models_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".duet/cache"),
            models_dir: PathBuf::from(".duet/models"),
        }
    }
}
