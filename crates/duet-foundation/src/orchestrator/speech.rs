//! Speech-to-text across the local engine and a cloud speech provider.

use super::session::{Session, SessionKind, SessionState};
use crate::native::{NativeRuntime, TranscriptionPayload};
use crate::registry::ModelRegistry;
use crate::remote::SpeechProvider;
use crate::streaming::{StagedTokens, TokenSink, commit_staged};
use crate::telemetry::Telemetry;
use duet_kernel::engine::NativeEngine;
use duet_kernel::error::{DownloadError, InferenceError};
use duet_kernel::inference::{InferenceMode, InitParams, TranscriptionParams, TranscriptionResult};
use duet_kernel::model::{DEFAULT_QUANTIZATION, VoiceModelDescriptor};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub const DEFAULT_SPEECH_MODEL: &str = "whisper-tiny";

/// Decoder prompt for English transcription without timestamps.
pub const DEFAULT_TRANSCRIPTION_PROMPT: &str =
    "<|startoftranscript|><|en|><|transcribe|><|notimestamps|>";

struct SpeechModelInner {
    session: Session,
    registry: ModelRegistry,
    telemetry: Telemetry,
    remote: Option<Arc<dyn SpeechProvider>>,
    default_model: String,
}

#[derive(Clone)]
pub struct SpeechModel {
    inner: Arc<SpeechModelInner>,
}

pub struct SpeechModelBuilder {
    runtime: NativeRuntime,
    registry: ModelRegistry,
    telemetry: Telemetry,
    remote: Option<Arc<dyn SpeechProvider>>,
    default_model: String,
}

impl SpeechModelBuilder {
    pub fn with_remote(mut self, remote: Arc<dyn SpeechProvider>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn build(self) -> SpeechModel {
        let session = Session::new(
            SessionKind::Speech,
            self.runtime,
            self.registry.clone(),
            self.telemetry.clone(),
        );
        SpeechModel {
            inner: Arc::new(SpeechModelInner {
                session,
                registry: self.registry,
                telemetry: self.telemetry,
                remote: self.remote,
                default_model: self.default_model,
            }),
        }
    }
}

impl SpeechModel {
    pub fn builder(engine: Arc<dyn NativeEngine>, registry: ModelRegistry) -> SpeechModelBuilder {
        SpeechModelBuilder {
            runtime: NativeRuntime::new(engine),
            registry,
            telemetry: Telemetry::disabled(),
            remote: None,
            default_model: DEFAULT_SPEECH_MODEL.to_string(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.session.state()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.session.is_loaded()
    }

    pub async fn list_voice_models(&self) -> Vec<VoiceModelDescriptor> {
        self.inner.registry.list_voice_models().await
    }

    pub async fn is_model_downloaded(&self, model: &str) -> bool {
        self.inner.registry.is_model_downloaded(model).await
    }

    pub async fn download_model(&self, model: &str) -> Result<(), DownloadError> {
        self.inner.registry.download_voice_model(model).await
    }

    pub async fn initialize(&self, params: InitParams) -> Result<(), InferenceError> {
        let model = self.resolve_model(params.model.as_deref());
        self.inner
            .session
            .reinitialize(&model, params.context_size_or_default())
            .await
    }

    pub async fn unload(&self) {
        self.inner.session.unload().await;
    }

    /// Prime the remote endpoint. `false` without a provider.
    pub async fn warm_up(&self, api_key: &str) -> bool {
        match &self.inner.remote {
            Some(remote) => remote.warm_up(api_key).await,
            None => false,
        }
    }

    pub async fn transcribe(
        &self,
        audio_path: &Path,
        prompt: Option<&str>,
        params: &TranscriptionParams,
        mode: InferenceMode,
        api_key: Option<&str>,
    ) -> TranscriptionResult {
        self.transcribe_with_sink(audio_path, prompt, params, mode, api_key, None)
            .await
    }

    /// Transcribe `audio_path` according to `mode`. Never fails: a failed
    /// attempt is reported in the returned result.
    pub async fn transcribe_with_sink(
        &self,
        audio_path: &Path,
        prompt: Option<&str>,
        params: &TranscriptionParams,
        mode: InferenceMode,
        api_key: Option<&str>,
        sink: Option<TokenSink>,
    ) -> TranscriptionResult {
        let started = Instant::now();
        let model = self.resolve_model(params.model.as_deref());
        let prompt = prompt.unwrap_or(DEFAULT_TRANSCRIPTION_PROMPT);

        let outcome = match mode {
            InferenceMode::Local => self
                .transcribe_locally(&model, audio_path, prompt, params, sink)
                .await
                .map(|r| r.served_by(InferenceMode::Local))
                .map_err(|e| e.to_string()),
            InferenceMode::Remote => self
                .transcribe_remotely(audio_path, api_key)
                .await
                .map(|r| r.served_by(InferenceMode::Remote))
                .map_err(|e| e.to_string()),
            InferenceMode::LocalFirst => {
                // Local tokens are held back until the local attempt succeeds.
                let staged = sink.as_ref().map(|_| StagedTokens::new());
                match self
                    .transcribe_locally(&model, audio_path, prompt, params, staged.as_ref().map(StagedTokens::sink))
                    .await
                {
                    Ok(result) => {
                        commit_staged(staged, sink.as_ref()).await;
                        Ok(result.served_by(InferenceMode::Local))
                    }
                    Err(local) => {
                        drop(staged);
                        warn!(model = %model, error = %local, "local transcription failed, trying remote");
                        self.transcribe_remotely(audio_path, api_key)
                            .await
                            .map(|r| r.served_by(InferenceMode::Remote))
                            .map_err(|remote| {
                                format!(
                                    "Local transcription failed: {local}. Remote transcription also failed: {remote}"
                                )
                            })
                    }
                }
            }
            InferenceMode::RemoteFirst => match self.transcribe_remotely(audio_path, api_key).await {
                Ok(result) => Ok(result.served_by(InferenceMode::Remote)),
                Err(remote) => {
                    warn!(error = %remote, "remote transcription failed, trying local");
                    self.transcribe_locally(&model, audio_path, prompt, params, sink)
                        .await
                        .map(|r| r.served_by(InferenceMode::Local))
                        .map_err(|local| {
                            format!(
                                "Remote transcription failed: {remote}. Local transcription also failed: {local}"
                            )
                        })
                }
            },
        };

        let result = outcome.unwrap_or_else(TranscriptionResult::failure);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(model = %model, %mode, success = result.success, elapsed_ms, "transcription finished");
        self.inner
            .telemetry
            .log_transcription(&result, &model, elapsed_ms, result.served_by.unwrap_or(mode))
            .await;
        result
    }

    fn resolve_model(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_string)
            .or_else(|| self.inner.session.last_model())
            .unwrap_or_else(|| self.inner.default_model.clone())
    }

    async fn transcribe_locally(
        &self,
        model: &str,
        audio_path: &Path,
        prompt: &str,
        params: &TranscriptionParams,
        sink: Option<TokenSink>,
    ) -> Result<TranscriptionResult, InferenceError> {
        let payload = TranscriptionPayload::build(params, DEFAULT_QUANTIZATION)?;
        let lease = self.inner.session.ensure(model).await?;
        let _gate = lease.exclusive().await;
        let result = self
            .inner
            .session
            .runtime()
            .transcribe(
                lease.handle(),
                audio_path.to_path_buf(),
                prompt.to_string(),
                payload,
                sink,
            )
            .await?;

        if !result.success {
            return Err(InferenceError::NativeEngine {
                status: 0,
                context: result
                    .failure_reason()
                    .unwrap_or("transcription reported failure")
                    .to_string(),
            });
        }
        Ok(result)
    }

    async fn transcribe_remotely(
        &self,
        audio_path: &Path,
        api_key: Option<&str>,
    ) -> Result<TranscriptionResult, InferenceError> {
        let Some(remote) = &self.inner.remote else {
            warn!("remote transcription requested without a provider");
            return Err(InferenceError::Configuration(
                "Remote transcription requires a remote speech provider.".to_string(),
            ));
        };
        let Some(api_key) = api_key else {
            warn!("remote transcription requested without an API key");
            return Err(InferenceError::Configuration(
                "Remote transcription requires an API key.".to_string(),
            ));
        };
        remote.transcribe(audio_path, api_key).await
    }
}
