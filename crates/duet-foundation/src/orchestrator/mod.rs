//! Inference session orchestration
//!
//! [`LanguageModel`] and [`SpeechModel`] route each call to the local engine,
//! the remote provider, or both in order, according to the call's
//! [`InferenceMode`](duet_kernel::inference::InferenceMode):
//!
//! | mode           | first attempt | on failure                     |
//! |----------------|---------------|--------------------------------|
//! | `LOCAL`        | local         | failed result                  |
//! | `REMOTE`       | remote        | failed result                  |
//! | `LOCAL_FIRST`  | local         | remote, then combined failure  |
//! | `REMOTE_FIRST` | remote        | local, then combined failure   |
//!
//! Each orchestrator owns one [`Session`] holding at most one native handle.

mod language;
mod session;
mod speech;

pub use language::{DEFAULT_LANGUAGE_MODEL, LanguageModel, LanguageModelBuilder};
pub use session::{Lease, Session, SessionKind, SessionState};
pub use speech::{DEFAULT_SPEECH_MODEL, DEFAULT_TRANSCRIPTION_PROMPT, SpeechModel, SpeechModelBuilder};
