//! # duet-foundation
//!
//! Concrete building blocks of the duet hybrid inference stack:
//!
//! - [`registry`]: model catalog with a cache-first lookup and local file store
//! - [`tools`]: keyword and semantic tool selection
//! - [`telemetry`]: usage logging with a persistent retry buffer
//! - [`orchestrator`]: [`LanguageModel`] and [`SpeechModel`], which route calls
//!   between the local engine and remote providers
//!
//! The native engine and the model downloader are supplied by the host through
//! the seam traits in `duet-kernel`.

// config module
pub mod config;

// persistence module - key/value stores
pub mod persistence;

// backend module - catalog and telemetry HTTP client
pub mod backend;

// registry module - model catalog and local files
pub mod registry;

// tools module - tool filtering
pub mod tools;

// telemetry module - resilient usage logging
pub mod telemetry;

// streaming module - call-scoped token channels
pub mod streaming;

// remote module - OpenAI-compatible chat and cloud speech
pub mod remote;

// native module - engine calls on the blocking pool
pub mod native;

// orchestrator module - local/remote session orchestration
pub mod orchestrator;

pub use backend::{BackendClient, BackendError};
pub use config::{
    BackendConfig, DuetConfig, RemoteConfig, StorageConfig, TelemetryConfig,
};
pub use native::NativeRuntime;
pub use orchestrator::{
    LanguageModel, LanguageModelBuilder, SessionState, SpeechModel, SpeechModelBuilder,
};
pub use persistence::{FileStore, MemoryStore};
pub use registry::{CatalogSource, DirectoryModelStore, ModelRegistry};
pub use remote::{OpenAiCompatibleChat, RemoteChatProvider, RemoteSpeechClient, SpeechProvider};
pub use streaming::{CompletionStream, StreamToken, TokenSink};
pub use telemetry::{LogRecord, Telemetry, TelemetryDispatch, TelemetryTransport};
pub use tools::{Embedder, ToolFilter, ToolFilterConfig, ToolFilterStrategy};
