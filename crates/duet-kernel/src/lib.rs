//! # duet-kernel
//!
//! Shared vocabulary for the duet hybrid inference stack: value objects that
//! cross component boundaries, the typed error taxonomy, and the seam traits
//! behind which the external collaborators live (native engine, model files on
//! disk, key/value persistence).
//!
//! Nothing in this crate performs I/O on its own. Implementations live in
//! `duet-foundation`.

// error module
pub mod error;

// config module
#[cfg(feature = "config")]
pub mod config;

// storage module
pub mod storage;

// model descriptors and on-disk model store seam
pub mod model;

// callable tool descriptors
pub mod tool;

// request / result value objects
pub mod inference;

// native engine boundary
pub mod engine;

pub use engine::{EngineHandle, NativeEngine, TokenCallback};
pub use error::{DownloadError, InferenceError, StoreError, StoreResult};
pub use inference::{
    ChatMessage, CompletionParams, CompletionResult, EmbeddingResult, InferenceMode, InitParams,
    TranscriptionParams, TranscriptionResult,
};
pub use model::{DownloadTask, ModelDescriptor, ModelDownloader, ModelStore, VoiceModelDescriptor};
pub use storage::KeyValueStore;
pub use tool::{ToolCall, ToolDescriptor, ToolFunction, ToolParameter, ToolParametersSchema};
