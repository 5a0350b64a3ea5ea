//! Telemetry event records.

use duet_kernel::inference::InferenceMode;
use serde::{Deserialize, Serialize};

pub const FRAMEWORK_NAME: &str = "duet-rust";

/// One usage event, as stored by the logs endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub event_type: String,
    pub project_id: Option<String>,
    pub device_id: Option<String>,
    pub model: Option<String>,
    pub success: Option<bool>,
    /// Time to first token, ms.
    pub ttft: Option<f64>,
    pub tps: Option<f64>,
    /// Wall-clock time of the whole call, ms.
    pub response_time: Option<f64>,
    pub tokens: Option<u32>,
    pub audio_duration: Option<i64>,
    pub message: Option<String>,
    pub telemetry_token: Option<String>,
    pub mode: Option<String>,
    pub framework: String,
    pub framework_version: String,
}

impl LogRecord {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            project_id: None,
            device_id: None,
            model: None,
            success: None,
            ttft: None,
            tps: None,
            response_time: None,
            tokens: None,
            audio_duration: None,
            message: None,
            telemetry_token: None,
            mode: None,
            framework: FRAMEWORK_NAME.to_string(),
            framework_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    pub fn with_timing(mut self, ttft: Option<f64>, tps: Option<f64>) -> Self {
        self.ttft = ttft;
        self.tps = tps;
        self
    }

    pub fn with_response_time(mut self, response_time_ms: f64) -> Self {
        self.response_time = Some(response_time_ms);
        self
    }

    pub fn with_tokens(mut self, tokens: u32) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_audio_duration(mut self, audio_duration_ms: i64) -> Self {
        self.audio_duration = Some(audio_duration_ms);
        self
    }

    pub fn with_mode(mut self, mode: InferenceMode) -> Self {
        self.mode = Some(mode.to_string());
        self
    }
}

/// A record that failed to send and is kept for bounded retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedLogRecord {
    pub id: uuid::Uuid,
    pub record: LogRecord,
    pub retry_count: u32,
    /// Epoch milliseconds of the first failed send.
    pub first_attempt: i64,
}

impl BufferedLogRecord {
    pub fn first_failure(record: LogRecord) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            record,
            retry_count: 1,
            first_attempt: chrono::Utc::now().timestamp_millis(),
        }
    }
}
