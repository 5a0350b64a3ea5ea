//! Text completion and embedding across the local engine and a remote
//! chat provider.

use super::session::{Session, SessionKind, SessionState};
use crate::native::{CompletionPayload, NativeRuntime};
use crate::registry::ModelRegistry;
use crate::remote::RemoteChatProvider;
use crate::streaming::{CompletionStream, StagedTokens, TokenSink, commit_staged, token_channel};
use crate::telemetry::Telemetry;
use crate::tools::{DEFAULT_MAX_TOOLS, Embedder, ToolFilter, ToolFilterConfig};
use async_trait::async_trait;
use duet_kernel::engine::NativeEngine;
use duet_kernel::error::{DownloadError, InferenceError};
use duet_kernel::inference::{
    ChatMessage, CompletionParams, CompletionResult, EmbeddingResult, InferenceMode, InitParams,
    tokens_per_second,
};
use duet_kernel::model::{DEFAULT_QUANTIZATION, ModelDescriptor};
use duet_kernel::tool::ToolDescriptor;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Model used when neither the call nor a previous initialization names one.
pub const DEFAULT_LANGUAGE_MODEL: &str = "qwen3-0.6";

struct LanguageModelInner {
    session: Session,
    registry: ModelRegistry,
    telemetry: Telemetry,
    remote: Option<Arc<dyn RemoteChatProvider>>,
    tool_filter: Option<ToolFilter>,
    default_model: String,
}

/// Hybrid text model. Cloning shares the session.
#[derive(Clone)]
pub struct LanguageModel {
    inner: Arc<LanguageModelInner>,
}

pub struct LanguageModelBuilder {
    runtime: NativeRuntime,
    registry: ModelRegistry,
    telemetry: Telemetry,
    remote: Option<Arc<dyn RemoteChatProvider>>,
    tool_filter: Option<ToolFilter>,
    default_model: String,
}

impl LanguageModelBuilder {
    pub fn with_remote(mut self, remote: Arc<dyn RemoteChatProvider>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_tool_filter(mut self, config: ToolFilterConfig) -> Self {
        self.tool_filter = Some(ToolFilter::new(config));
        self
    }

    /// Offer every tool to the model unfiltered.
    pub fn without_tool_filtering(mut self) -> Self {
        self.tool_filter = None;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn build(self) -> LanguageModel {
        let session = Session::new(
            SessionKind::Text,
            self.runtime,
            self.registry.clone(),
            self.telemetry.clone(),
        );
        LanguageModel {
            inner: Arc::new(LanguageModelInner {
                session,
                registry: self.registry,
                telemetry: self.telemetry,
                remote: self.remote,
                tool_filter: self.tool_filter,
                default_model: self.default_model,
            }),
        }
    }
}

/// Embeds with a fixed model during tool filtering.
struct PinnedEmbedder<'a> {
    model: &'a LanguageModel,
    slug: &'a str,
}

#[async_trait]
impl Embedder for PinnedEmbedder<'_> {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, InferenceError> {
        self.model.embed_vector(self.slug, text).await
    }
}

impl LanguageModel {
    pub fn builder(engine: Arc<dyn NativeEngine>, registry: ModelRegistry) -> LanguageModelBuilder {
        LanguageModelBuilder {
            runtime: NativeRuntime::new(engine),
            registry,
            telemetry: Telemetry::disabled(),
            remote: None,
            tool_filter: Some(ToolFilter::new(ToolFilterConfig::keyword(DEFAULT_MAX_TOOLS))),
            default_model: DEFAULT_LANGUAGE_MODEL.to_string(),
        }
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.inner.telemetry
    }

    pub fn state(&self) -> SessionState {
        self.inner.session.state()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.session.is_loaded()
    }

    /// Model of the last initialization attempt.
    pub fn current_model(&self) -> Option<String> {
        self.inner.session.last_model()
    }

    pub async fn list_models(&self) -> Vec<ModelDescriptor> {
        self.inner.registry.list_models().await
    }

    pub async fn refresh_models(&self) -> Vec<ModelDescriptor> {
        self.inner.registry.refresh_models().await
    }

    pub async fn is_model_downloaded(&self, model: &str) -> bool {
        self.inner.registry.is_model_downloaded(model).await
    }

    pub async fn download_model(&self, model: &str) -> Result<(), DownloadError> {
        self.inner.registry.download_model(model).await
    }

    /// Load `params.model` (or the default) with the requested context size,
    /// replacing whatever is loaded.
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

    pub async fn complete(&self, messages: &[ChatMessage], params: &CompletionParams) -> CompletionResult {
        self.complete_with_sink(messages, params, None).await
    }

    /// Stream tokens while completing. The final result is available from
    /// [`CompletionStream::finish`].
    pub fn complete_stream(&self, messages: Vec<ChatMessage>, params: CompletionParams) -> CompletionStream {
        let (tx, rx) = token_channel();
        let model = self.clone();
        let task = tokio::spawn(async move { model.complete_with_sink(&messages, &params, Some(tx)).await });
        CompletionStream::new(rx, task)
    }

    /// Complete `messages` according to `params.mode`. Never fails: a failed
    /// attempt is reported in the returned result.
    pub async fn complete_with_sink(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
        sink: Option<TokenSink>,
    ) -> CompletionResult {
        let started = Instant::now();
        let model = self.resolve_model(params.model.as_deref());
        let tools = self.select_tools(messages, params, &model).await;
        // Tool-calling responses are returned whole.
        let sink = if tools.is_empty() { sink } else { None };

        let outcome = match params.mode {
            InferenceMode::Local => self
                .complete_locally(&model, messages, params, &tools, sink)
                .await
                .map(|r| r.served_by(InferenceMode::Local))
                .map_err(|e| e.to_string()),
            InferenceMode::Remote => self
                .complete_remotely(messages, params, sink.as_ref())
                .await
                .map(|r| r.served_by(InferenceMode::Remote))
                .map_err(|e| e.to_string()),
            InferenceMode::LocalFirst => {
                // Tokens of the first attempt are held back until it succeeds.
                let staged = sink.as_ref().map(|_| StagedTokens::new());
                match self
                    .complete_locally(&model, messages, params, &tools, staged.as_ref().map(StagedTokens::sink))
                    .await
                {
                    Ok(result) => {
                        commit_staged(staged, sink.as_ref()).await;
                        Ok(result.served_by(InferenceMode::Local))
                    }
                    Err(local) => {
                        drop(staged);
                        warn!(model = %model, error = %local, "local completion failed, trying remote");
                        self.complete_remotely(messages, params, sink.as_ref())
                            .await
                            .map(|r| r.served_by(InferenceMode::Remote))
                            .map_err(|remote| {
                                format!(
                                    "Local inference failed: {local}. Remote inference also failed: {remote}"
                                )
                            })
                    }
                }
            }
            InferenceMode::RemoteFirst => {
                let staged = sink.as_ref().map(|_| StagedTokens::new());
                let staged_sink = staged.as_ref().map(StagedTokens::sink);
                let first = self.complete_remotely(messages, params, staged_sink.as_ref()).await;
                drop(staged_sink);
                match first {
                    Ok(result) => {
                        commit_staged(staged, sink.as_ref()).await;
                        Ok(result.served_by(InferenceMode::Remote))
                    }
                    Err(remote) => {
                        drop(staged);
                        warn!(error = %remote, "remote completion failed, trying local");
                        self.complete_locally(&model, messages, params, &tools, sink)
                            .await
                            .map(|r| r.served_by(InferenceMode::Local))
                            .map_err(|local| {
                                format!(
                                    "Remote inference failed: {remote}. Local inference also failed: {local}"
                                )
                            })
                    }
                }
            }
        };

        let result = outcome.unwrap_or_else(CompletionResult::failure);
        let served_remotely = result.served_by == Some(InferenceMode::Remote);
        let logged_model = match (&self.inner.remote, served_remotely) {
            (Some(remote), true) => remote.model().to_string(),
            _ => model,
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            model = %logged_model,
            mode = %params.mode,
            success = result.success,
            elapsed_ms,
            "completion finished"
        );
        self.inner
            .telemetry
            .log_completion(
                &result,
                &logged_model,
                elapsed_ms,
                result.served_by.unwrap_or(params.mode),
            )
            .await;
        result
    }

    /// Embed `text` with `model`, or the current/default model.
    pub async fn embed(&self, text: &str, model: Option<&str>) -> EmbeddingResult {
        let model = self.resolve_model(model);
        let result = match self.embed_vector(&model, text).await {
            Ok(vector) => EmbeddingResult::ok(vector),
            Err(e) => {
                warn!(model = %model, error = %e, "embedding failed");
                EmbeddingResult::failure(e.to_string())
            }
        };
        self.inner.telemetry.log_embedding(&result, &model).await;
        result
    }

    fn resolve_model(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_string)
            .or_else(|| self.inner.session.last_model())
            .unwrap_or_else(|| self.inner.default_model.clone())
    }

    async fn quantization(&self, model: &str) -> u32 {
        self.inner
            .registry
            .get_model(model)
            .await
            .map(|descriptor| descriptor.quantization)
            .unwrap_or(DEFAULT_QUANTIZATION)
    }

    async fn select_tools(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
        model: &str,
    ) -> Vec<ToolDescriptor> {
        let Some(filter) = &self.inner.tool_filter else {
            return params.tools.clone();
        };
        if params.tools.is_empty() {
            return Vec::new();
        }

        let query = messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .or_else(|| messages.last())
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let embedder = PinnedEmbedder { model: self, slug: model };
        // Remote-only calls never load the local model for filtering.
        let embedder: Option<&dyn Embedder> = match params.mode {
            InferenceMode::Remote => None,
            _ => Some(&embedder),
        };
        let selected = filter.filter_tools(query, &params.tools, embedder).await;
        debug!(
            offered = params.tools.len(),
            selected = selected.len(),
            "tools filtered"
        );
        selected
    }

    async fn complete_locally(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &CompletionParams,
        tools: &[ToolDescriptor],
        sink: Option<TokenSink>,
    ) -> Result<CompletionResult, InferenceError> {
        let quantization = self.quantization(model).await;
        let payload = CompletionPayload::build(messages, params, tools, quantization)?;

        let lease = self.inner.session.ensure(model).await?;
        let _gate = lease.exclusive().await;
        let mut result = self
            .inner
            .session
            .runtime()
            .complete(lease.handle(), payload, sink)
            .await?;

        if !result.success {
            return Err(InferenceError::NativeEngine {
                status: 0,
                context: result
                    .response
                    .take()
                    .unwrap_or_else(|| "completion reported failure".to_string()),
            });
        }
        if result.tokens_per_second == 0.0 {
            result.tokens_per_second = tokens_per_second(result.decode_tokens, result.total_time_ms);
        }
        Ok(result)
    }

    async fn complete_remotely(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
        sink: Option<&TokenSink>,
    ) -> Result<CompletionResult, InferenceError> {
        let Some(remote) = &self.inner.remote else {
            warn!("remote completion requested without a provider");
            return Err(InferenceError::Configuration(
                "Remote inference requires a remote chat provider.".to_string(),
            ));
        };
        let Some(token) = params.remote_token.as_deref() else {
            warn!("remote completion requested without a token");
            return Err(InferenceError::Configuration(
                "Remote inference requires an API token.".to_string(),
            ));
        };
        remote.complete(messages, params, token, sink).await
    }

    async fn embed_vector(&self, model: &str, text: &str) -> Result<Vec<f32>, InferenceError> {
        let quantization = self.quantization(model).await;
        let lease = self.inner.session.ensure(model).await?;
        let _gate = lease.exclusive().await;
        self.inner
            .session
            .runtime()
            .embed(lease.handle(), text.to_string(), quantization)
            .await
    }
}

#[async_trait]
impl Embedder for LanguageModel {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, InferenceError> {
        let model = self.resolve_model(None);
        self.embed_vector(&model, text).await
    }
}
