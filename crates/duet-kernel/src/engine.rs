//! Native inference engine boundary
//!
//! The engine that executes model weights is an opaque capability. It is
//! reached through the narrow, synchronous [`NativeEngine`] trait; callers in
//! `duet-foundation` always invoke it from `tokio::task::spawn_blocking`.
//!
//! Status codes follow the engine convention: a positive value is success and
//! the output buffer holds the result, a non-positive value is failure and no
//! partial output is guaranteed.

use std::fmt;
use std::num::NonZeroU64;
use std::path::Path;

/// Opaque reference to an initialized native model context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(NonZeroU64);

impl EngineHandle {
    /// Wrap a raw engine token. Zero is the engine's null handle.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn as_raw(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

/// Per-call token sink: `(token, token_id)`.
///
/// Scoped to a single engine call, never registered globally.
pub type TokenCallback<'a> = &'a mut (dyn FnMut(&str, u32) + Send);

/// Synchronous native engine primitives.
pub trait NativeEngine: Send + Sync + 'static {
    /// Load the model at `model_path`. `None` means initialization failed.
    fn init(&self, model_path: &Path, context_size: u32) -> Option<EngineHandle>;

    /// Run a chat completion, writing a NUL-padded JSON document into `out`.
    fn complete(
        &self,
        handle: EngineHandle,
        messages_json: &str,
        out: &mut [u8],
        options_json: &str,
        tools_json: Option<&str>,
        on_token: Option<TokenCallback<'_>>,
    ) -> i32;

    /// Embed `text` into `out`, reporting the produced dimension in `out_dim`.
    fn embed(&self, handle: EngineHandle, text: &str, out: &mut [f32], out_dim: &mut usize)
    -> i32;

    /// Transcribe the audio file at `audio_path`.
    fn transcribe(
        &self,
        handle: EngineHandle,
        audio_path: &Path,
        prompt: &str,
        out: &mut [u8],
        options_json: &str,
        on_token: Option<TokenCallback<'_>>,
    ) -> i32;

    /// Release the context. The handle must not be used afterwards.
    fn destroy(&self, handle: EngineHandle);
}
