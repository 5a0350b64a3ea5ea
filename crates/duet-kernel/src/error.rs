//! Crate-level error types for `duet-kernel`.
//!
//! [`InferenceError`] is the failure taxonomy shared by every inference path.
//! The orchestrators never let it escape their public operations; it is
//! rendered into the `error_message` / `response` of a failed result value
//! instead. [`StoreError`] and [`DownloadError`] cover the two persistence
//! seams.

use thiserror::Error;

/// Failure taxonomy for a single inference attempt.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum InferenceError {
    /// HTTP failure or timeout. Eligible for buffering, retry or mode fallback.
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// Non-positive status code from the native engine.
    #[error("Native engine failed with status {status}: {context}")]
    NativeEngine { status: i32, context: String },

    /// Model files are not present on local storage.
    #[error("Model not found locally: {0}")]
    NotFoundLocally(String),

    /// Malformed engine or remote JSON. `raw` keeps the offending text; its
    /// head is shown in the message.
    #[error("Unable to parse {source_name} response: {reason}{}", raw_excerpt(.raw))]
    Parse {
        source_name: String,
        reason: String,
        raw: String,
    },

    /// Missing API key, missing session, or invalid request parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl InferenceError {
    /// Build a parse failure, keeping the raw payload.
    pub fn parse(
        source_name: impl Into<String>,
        reason: impl ToString,
        raw: impl Into<String>,
    ) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            reason: reason.to_string(),
            raw: raw.into(),
        }
    }

    /// Whether the failure may succeed on a later attempt without changes.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }
}

/// Characters of unparseable output quoted in a parse failure message.
pub const RAW_EXCERPT_CHARS: usize = 200;

fn raw_excerpt(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    let mut excerpt: String = raw.chars().take(RAW_EXCERPT_CHARS).collect();
    if excerpt.len() < raw.len() {
        excerpt.push_str("...");
    }
    format!(" (raw output: {excerpt})")
}

/// Errors raised by a [`crate::storage::KeyValueStore`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key rejected by the backing store.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Result type for key/value store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while fetching model files onto local storage.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum DownloadError {
    /// The catalog has no entry for the slug.
    #[error("Model {0} is not listed in the catalog")]
    NotInCatalog(String),

    /// Transfer failed.
    #[error("Download of {slug} failed: {reason}")]
    Transfer { slug: String, reason: String },

    /// Writing or extracting the files failed.
    #[error("Storing {slug} failed: {reason}")]
    Storage { slug: String, reason: String },
}

impl From<DownloadError> for InferenceError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::NotInCatalog(slug) => InferenceError::NotFoundLocally(slug),
            DownloadError::Transfer { reason, .. } => InferenceError::TransientNetwork(reason),
            other => InferenceError::Configuration(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_keeps_raw_text() {
        let err = InferenceError::parse("native", "expected value", "{not json");
        match &err {
            InferenceError::Parse { raw, .. } => assert_eq!(raw, "{not json"),
            other => panic!("unexpected variant {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "Unable to parse native response: expected value (raw output: {not json)"
        );
    }

    #[test]
    fn parse_error_message_quotes_bounded_raw_head() {
        let empty = InferenceError::parse("backend", "bad body", "");
        assert_eq!(empty.to_string(), "Unable to parse backend response: bad body");

        let long = "é".repeat(RAW_EXCERPT_CHARS + 50);
        let message = InferenceError::parse("native", "eof", long).to_string();
        assert!(message.ends_with("...)"), "{message}");
        assert_eq!(message.matches('é').count(), RAW_EXCERPT_CHARS);
    }

    #[test]
    fn only_network_failures_are_transient() {
        assert!(InferenceError::TransientNetwork("timeout".into()).is_transient());
        assert!(
            !InferenceError::NativeEngine {
                status: -1,
                context: "completion".into()
            }
            .is_transient()
        );
        assert!(!InferenceError::Configuration("no key".into()).is_transient());
    }

    #[test]
    fn download_error_maps_into_taxonomy() {
        let missing: InferenceError = DownloadError::NotInCatalog("qwen3-0.6".into()).into();
        assert_eq!(missing, InferenceError::NotFoundLocally("qwen3-0.6".into()));

        let transfer: InferenceError = DownloadError::Transfer {
            slug: "qwen3-0.6".into(),
            reason: "connection reset".into(),
        }
        .into();
        assert!(transfer.is_transient());
    }
}
