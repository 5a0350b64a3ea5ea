//! Shared state built once per command invocation.

use crate::download::HttpDownloader;
use crate::error::CliResult;
use duet_foundation::config::DuetConfig;
use duet_foundation::orchestrator::LanguageModel;
use duet_foundation::persistence::FileStore;
use duet_foundation::registry::{DirectoryModelStore, ModelRegistry};
use duet_foundation::remote::OpenAiCompatibleChat;
use duet_foundation::telemetry::{Telemetry, TelemetryDispatch};
use duet_foundation::BackendClient;
use duet_kernel::engine::{EngineHandle, NativeEngine, TokenCallback};
use duet_kernel::storage::KeyValueStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Stand-in for the native engine this binary does not link. Every load
/// fails. `duet complete` only requests remote completions, so it is never
/// asked to load a model.
pub struct DetachedEngine;

impl NativeEngine for DetachedEngine {
    fn init(&self, _model_path: &Path, _context_size: u32) -> Option<EngineHandle> {
        None
    }

    fn complete(
        &self,
        _handle: EngineHandle,
        _messages_json: &str,
        _out: &mut [u8],
        _options_json: &str,
        _tools_json: Option<&str>,
        _on_token: Option<TokenCallback<'_>>,
    ) -> i32 {
        -1
    }

    fn embed(
        &self,
        _handle: EngineHandle,
        _text: &str,
        _out: &mut [f32],
        _out_dim: &mut usize,
    ) -> i32 {
        -1
    }

    fn transcribe(
        &self,
        _handle: EngineHandle,
        _audio_path: &Path,
        _prompt: &str,
        _out: &mut [u8],
        _options_json: &str,
        _on_token: Option<TokenCallback<'_>>,
    ) -> i32 {
        -1
    }

    fn destroy(&self, _handle: EngineHandle) {}
}

pub struct CliContext {
    pub config: DuetConfig,
    pub registry: ModelRegistry,
    pub telemetry: Telemetry,
    pub models_dir: PathBuf,
}

impl CliContext {
    pub async fn new(config: DuetConfig, show_progress: bool) -> CliResult<Self> {
        debug!(backend = %config.backend.base_url, "configuration loaded");

        let cache: Arc<dyn KeyValueStore> =
            Arc::new(FileStore::open(&config.storage.cache_dir).await?);
        let backend = Arc::new(BackendClient::new(&config.backend)?);

        let models_dir = config.storage.models_dir.clone();
        let store = Arc::new(DirectoryModelStore::new(
            models_dir.clone(),
            Arc::new(HttpDownloader::new(show_progress)),
        ));
        let registry = ModelRegistry::new(backend.clone(), cache.clone(), store);

        let telemetry = Telemetry::builder(cache, backend)
            .config(config.telemetry.clone())
            // The process exits as soon as the command returns.
            .dispatch(TelemetryDispatch::Inline)
            .build();

        Ok(Self {
            config,
            registry,
            telemetry,
            models_dir,
        })
    }

    /// Language model over the detached engine and the configured remote chat.
    pub fn language_model(&self) -> CliResult<LanguageModel> {
        let remote = OpenAiCompatibleChat::new(&self.config.remote)?;
        Ok(
            LanguageModel::builder(Arc::new(DetachedEngine), self.registry.clone())
                .with_remote(Arc::new(remote))
                .with_telemetry(self.telemetry.clone())
                .with_tool_filter(self.config.tool_filter.clone())
                .build(),
        )
    }
}
