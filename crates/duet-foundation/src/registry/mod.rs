//! Model registry
//!
//! Catalog lookups backed by a key/value cache. Single models are cached under
//! `duet_model_{slug}`, lists under one blob each. The `is_downloaded` flag is
//! never trusted from either source; it is recomputed against the
//! [`ModelStore`] on every query.

mod store;

pub use store::DirectoryModelStore;

use crate::backend::BackendError;
use async_trait::async_trait;
use duet_kernel::error::DownloadError;
use duet_kernel::model::{DownloadTask, ModelDescriptor, ModelStore, VoiceModelDescriptor};
use duet_kernel::storage::{KeyValueStore, load_json, save_json};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MODELS_KEY: &str = "duet_models";
pub const VOICE_MODELS_KEY: &str = "duet_voice_models";

/// Cache key of a single model descriptor.
pub fn model_key(slug: &str) -> String {
    format!("duet_model_{slug}")
}

/// Remote model catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_model(&self, slug: &str) -> Result<ModelDescriptor, BackendError>;

    async fn fetch_models(&self) -> Result<Vec<ModelDescriptor>, BackendError>;

    async fn fetch_voice_models(&self) -> Result<Vec<VoiceModelDescriptor>, BackendError>;
}

/// Typed view over the key/value store. Errors are logged and swallowed.
#[derive(Clone)]
pub struct ModelCache {
    store: Arc<dyn KeyValueStore>,
}

impl ModelCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn model(&self, slug: &str) -> Option<ModelDescriptor> {
        self.read(&model_key(slug)).await
    }

    pub async fn models(&self) -> Option<Vec<ModelDescriptor>> {
        self.read(MODELS_KEY).await
    }

    pub async fn voice_models(&self) -> Option<Vec<VoiceModelDescriptor>> {
        self.read(VOICE_MODELS_KEY).await
    }

    pub async fn put_model(&self, model: &ModelDescriptor) {
        self.write(&model_key(&model.slug), model).await;
    }

    /// Persist the list blob and every per-slug entry.
    pub async fn put_models(&self, models: &[ModelDescriptor]) {
        self.write(MODELS_KEY, models).await;
        for model in models {
            self.put_model(model).await;
        }
    }

    pub async fn put_voice_models(&self, models: &[VoiceModelDescriptor]) {
        self.write(VOICE_MODELS_KEY, models).await;
    }

    async fn read<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        match load_json(self.store.as_ref(), key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "model cache read failed");
                None
            }
        }
    }

    async fn write<T: serde::Serialize + ?Sized>(&self, key: &str, value: &T) {
        if let Err(e) = save_json(self.store.as_ref(), key, value).await {
            warn!(key, error = %e, "model cache write failed");
        }
    }
}

#[derive(Clone)]
pub struct ModelRegistry {
    catalog: Arc<dyn CatalogSource>,
    cache: ModelCache,
    store: Arc<dyn ModelStore>,
}

impl ModelRegistry {
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        cache_store: Arc<dyn KeyValueStore>,
        store: Arc<dyn ModelStore>,
    ) -> Self {
        Self {
            catalog,
            cache: ModelCache::new(cache_store),
            store,
        }
    }

    pub fn model_store(&self) -> &Arc<dyn ModelStore> {
        &self.store
    }

    /// Cache first, then the catalog. `None` when neither has the slug.
    pub async fn get_model(&self, slug: &str) -> Option<ModelDescriptor> {
        let model = match self.cache.model(slug).await {
            Some(model) => {
                debug!(model = %slug, "model descriptor served from cache");
                model
            }
            None => match self.catalog.fetch_model(slug).await {
                Ok(model) => {
                    self.cache.put_model(&model).await;
                    model
                }
                Err(e) => {
                    warn!(model = %slug, error = %e, "catalog lookup failed");
                    return None;
                }
            },
        };
        Some(self.mark_downloaded(model).await)
    }

    /// Cached list if present, otherwise [`Self::refresh_models`].
    pub async fn list_models(&self) -> Vec<ModelDescriptor> {
        match self.cache.models().await {
            Some(models) if !models.is_empty() => self.mark_all_downloaded(models).await,
            _ => self.refresh_models().await,
        }
    }

    /// Catalog first, falling back to the cached list.
    pub async fn refresh_models(&self) -> Vec<ModelDescriptor> {
        let models = match self.catalog.fetch_models().await {
            Ok(models) => {
                info!(count = models.len(), "model catalog refreshed");
                self.cache.put_models(&models).await;
                models
            }
            Err(e) => {
                warn!(error = %e, "model catalog unavailable, using cache");
                self.cache.models().await.unwrap_or_default()
            }
        };
        self.mark_all_downloaded(models).await
    }

    pub async fn list_voice_models(&self) -> Vec<VoiceModelDescriptor> {
        match self.cache.voice_models().await {
            Some(models) if !models.is_empty() => self.mark_voices_downloaded(models).await,
            _ => self.refresh_voice_models().await,
        }
    }

    pub async fn refresh_voice_models(&self) -> Vec<VoiceModelDescriptor> {
        let models = match self.catalog.fetch_voice_models().await {
            Ok(models) => {
                info!(count = models.len(), "voice model catalog refreshed");
                self.cache.put_voice_models(&models).await;
                models
            }
            Err(e) => {
                warn!(error = %e, "voice model catalog unavailable, using cache");
                self.cache.voice_models().await.unwrap_or_default()
            }
        };
        self.mark_voices_downloaded(models).await
    }

    pub async fn get_voice_model(&self, slug: &str) -> Option<VoiceModelDescriptor> {
        self.list_voice_models()
            .await
            .into_iter()
            .find(|model| model.slug == slug)
    }

    pub async fn is_model_downloaded(&self, slug: &str) -> bool {
        self.store.exists(slug).await
    }

    pub async fn download_task(&self, slug: &str) -> Option<DownloadTask> {
        let model = self.get_model(slug).await?;
        Some(DownloadTask::for_url(model.download_url, model.slug))
    }

    pub async fn voice_download_task(&self, slug: &str) -> Option<DownloadTask> {
        let model = self.get_voice_model(slug).await?;
        let mut task = DownloadTask::for_url(model.download_url, model.slug);
        if !model.file_name.is_empty() {
            task.file_name = model.file_name;
        }
        Some(task)
    }

    /// Fetch a text model's files onto local storage.
    pub async fn download_model(&self, slug: &str) -> Result<(), DownloadError> {
        let task = self
            .download_task(slug)
            .await
            .ok_or_else(|| DownloadError::NotInCatalog(slug.to_string()))?;
        info!(model = %slug, url = %task.url, "downloading model");
        self.store.download(&task).await
    }

    /// Fetch a speech model's files onto local storage.
    pub async fn download_voice_model(&self, slug: &str) -> Result<(), DownloadError> {
        let task = self
            .voice_download_task(slug)
            .await
            .ok_or_else(|| DownloadError::NotInCatalog(slug.to_string()))?;
        info!(model = %slug, url = %task.url, "downloading voice model");
        self.store.download(&task).await
    }

    async fn mark_downloaded(&self, mut model: ModelDescriptor) -> ModelDescriptor {
        model.is_downloaded = self.store.exists(&model.slug).await;
        model
    }

    async fn mark_all_downloaded(&self, models: Vec<ModelDescriptor>) -> Vec<ModelDescriptor> {
        let mut marked = Vec::with_capacity(models.len());
        for model in models {
            marked.push(self.mark_downloaded(model).await);
        }
        marked
    }

    async fn mark_voices_downloaded(
        &self,
        models: Vec<VoiceModelDescriptor>,
    ) -> Vec<VoiceModelDescriptor> {
        let mut marked = Vec::with_capacity(models.len());
        for mut model in models {
            model.is_downloaded = self.store.exists(&model.slug).await;
            marked.push(model);
        }
        marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn descriptor(slug: &str) -> ModelDescriptor {
        ModelDescriptor {
            slug: slug.to_string(),
            name: slug.to_string(),
            download_url: format!("https://cdn.example.com/{slug}.zip?sig=abc"),
            size_mb: 100,
            quantization: 8,
            supports_tool_calling: true,
            supports_vision: false,
            created_at: String::new(),
            is_downloaded: false,
        }
    }

    #[derive(Default)]
    struct FakeCatalog {
        offline: AtomicBool,
        calls: AtomicUsize,
        models: Vec<ModelDescriptor>,
    }

    impl FakeCatalog {
        fn unavailable() -> BackendError {
            BackendError::Status {
                status: 503,
                body: "offline".into(),
            }
        }
    }

    #[async_trait]
    impl CatalogSource for FakeCatalog {
        async fn fetch_model(&self, slug: &str) -> Result<ModelDescriptor, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(Self::unavailable());
            }
            self.models
                .iter()
                .find(|m| m.slug == slug)
                .cloned()
                .ok_or(BackendError::Status {
                    status: 404,
                    body: String::new(),
                })
        }

        async fn fetch_models(&self) -> Result<Vec<ModelDescriptor>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(Self::unavailable());
            }
            Ok(self.models.clone())
        }

        async fn fetch_voice_models(&self) -> Result<Vec<VoiceModelDescriptor>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(Self::unavailable());
            }
            Ok(vec![VoiceModelDescriptor {
                slug: "whisper-tiny".into(),
                download_url: "https://cdn.example.com/w.zip".into(),
                size_mb: 75,
                file_name: "whisper-tiny.zip".into(),
                created_at: String::new(),
                is_downloaded: false,
            }])
        }
    }

    #[derive(Default)]
    struct FakeStore {
        present: Mutex<HashSet<String>>,
        downloads: Mutex<Vec<DownloadTask>>,
    }

    #[async_trait]
    impl ModelStore for FakeStore {
        fn model_path(&self, slug: &str) -> PathBuf {
            PathBuf::from("/models").join(slug)
        }

        async fn exists(&self, slug: &str) -> bool {
            self.present.lock().contains(slug)
        }

        async fn download(&self, task: &DownloadTask) -> Result<(), DownloadError> {
            self.downloads.lock().push(task.clone());
            self.present.lock().insert(task.folder.clone());
            Ok(())
        }
    }

    fn registry(catalog: Arc<FakeCatalog>, store: Arc<FakeStore>) -> ModelRegistry {
        ModelRegistry::new(catalog, Arc::new(MemoryStore::new()), store)
    }

    #[tokio::test]
    async fn test_get_model_caches_catalog_result() {
        let catalog = Arc::new(FakeCatalog {
            models: vec![descriptor("qwen3-0.6")],
            ..Default::default()
        });
        let registry = registry(catalog.clone(), Arc::new(FakeStore::default()));

        assert!(registry.get_model("qwen3-0.6").await.is_some());
        catalog.offline.store(true, Ordering::SeqCst);
        assert!(registry.get_model("qwen3-0.6").await.is_some());
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_model_offline_is_none() {
        let catalog = Arc::new(FakeCatalog::default());
        catalog.offline.store(true, Ordering::SeqCst);
        let registry = registry(catalog, Arc::new(FakeStore::default()));

        assert!(registry.get_model("missing").await.is_none());
        assert!(registry.list_models().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_populates_per_slug_entries() {
        let catalog = Arc::new(FakeCatalog {
            models: vec![descriptor("qwen3-0.6"), descriptor("gemma3-270m")],
            ..Default::default()
        });
        let registry = registry(catalog.clone(), Arc::new(FakeStore::default()));

        assert_eq!(registry.list_models().await.len(), 2);
        catalog.offline.store(true, Ordering::SeqCst);
        assert!(registry.get_model("gemma3-270m").await.is_some());
        assert_eq!(registry.refresh_models().await.len(), 2);
    }

    #[tokio::test]
    async fn test_downloaded_flag_is_recomputed() {
        let catalog = Arc::new(FakeCatalog {
            models: vec![descriptor("qwen3-0.6")],
            ..Default::default()
        });
        let store = Arc::new(FakeStore::default());
        let registry = registry(catalog, store.clone());

        assert!(!registry.get_model("qwen3-0.6").await.unwrap().is_downloaded);
        store.present.lock().insert("qwen3-0.6".into());
        assert!(registry.get_model("qwen3-0.6").await.unwrap().is_downloaded);
        assert!(registry.list_models().await[0].is_downloaded);
    }

    #[tokio::test]
    async fn test_download_model_uses_url_file_name() {
        let catalog = Arc::new(FakeCatalog {
            models: vec![descriptor("qwen3-0.6")],
            ..Default::default()
        });
        let store = Arc::new(FakeStore::default());
        let registry = registry(catalog, store.clone());

        registry.download_model("qwen3-0.6").await.unwrap();
        let task = store.downloads.lock()[0].clone();
        assert_eq!(task.file_name, "qwen3-0.6.zip");
        assert_eq!(task.folder, "qwen3-0.6");
        assert!(registry.is_model_downloaded("qwen3-0.6").await);

        let err = registry.download_model("unknown").await.unwrap_err();
        assert_eq!(err, DownloadError::NotInCatalog("unknown".into()));
    }

    #[tokio::test]
    async fn test_voice_models_fall_back_to_cache() {
        let catalog = Arc::new(FakeCatalog::default());
        let registry = registry(catalog.clone(), Arc::new(FakeStore::default()));

        assert_eq!(registry.list_voice_models().await.len(), 1);
        catalog.offline.store(true, Ordering::SeqCst);
        let voices = registry.refresh_voice_models().await;
        assert_eq!(voices[0].slug, "whisper-tiny");

        let task = registry.voice_download_task("whisper-tiny").await.unwrap();
        assert_eq!(task.file_name, "whisper-tiny.zip");
    }
}
