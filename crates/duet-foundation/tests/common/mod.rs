//! Common test utilities shared across the `duet-foundation` integration tests.
//!
//! This module is **not** a standalone test binary. It is declared with
//! `mod common;` inside each integration test file that needs it.

#![allow(dead_code)]

pub mod mock_engine;
pub mod mock_remote;

use std::sync::Arc;

use async_trait::async_trait;
use duet_foundation::backend::BackendError;
use duet_foundation::persistence::MemoryStore;
use duet_foundation::registry::{CatalogSource, DirectoryModelStore, ModelRegistry};
use duet_kernel::model::{ModelDescriptor, VoiceModelDescriptor};
use tempfile::TempDir;

use mock_engine::MockDownloader;

/// Catalog serving a fixed set of models.
pub struct StaticCatalog {
    models: Vec<ModelDescriptor>,
    voice_models: Vec<VoiceModelDescriptor>,
}

impl StaticCatalog {
    pub fn new(slugs: &[&str], voice_slugs: &[&str]) -> Self {
        Self {
            models: slugs.iter().map(|slug| text_model(slug)).collect(),
            voice_models: voice_slugs.iter().map(|slug| voice_model(slug)).collect(),
        }
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn fetch_model(&self, slug: &str) -> Result<ModelDescriptor, BackendError> {
        self.models
            .iter()
            .find(|m| m.slug == slug)
            .cloned()
            .ok_or(BackendError::Status {
                status: 404,
                body: format!("no model {slug}"),
            })
    }

    async fn fetch_models(&self) -> Result<Vec<ModelDescriptor>, BackendError> {
        Ok(self.models.clone())
    }

    async fn fetch_voice_models(&self) -> Result<Vec<VoiceModelDescriptor>, BackendError> {
        Ok(self.voice_models.clone())
    }
}

pub fn text_model(slug: &str) -> ModelDescriptor {
    ModelDescriptor {
        slug: slug.to_string(),
        name: slug.to_string(),
        download_url: format!("https://cdn.test/models/{slug}.zip?sig=abc"),
        size_mb: 100,
        quantization: 8,
        supports_tool_calling: true,
        supports_vision: false,
        created_at: "2025-01-01T00:00:00Z".to_string(),
        is_downloaded: false,
    }
}

pub fn voice_model(slug: &str) -> VoiceModelDescriptor {
    VoiceModelDescriptor {
        slug: slug.to_string(),
        download_url: format!("https://cdn.test/voice/{slug}.zip"),
        size_mb: 40,
        file_name: format!("{slug}.zip"),
        created_at: "2025-01-01T00:00:00Z".to_string(),
        is_downloaded: false,
    }
}

/// Registry over a temporary model directory.
pub struct RegistryFixture {
    pub registry: ModelRegistry,
    pub downloader: Arc<MockDownloader>,
    pub models_dir: TempDir,
}

impl RegistryFixture {
    pub fn new(downloader: MockDownloader) -> Self {
        let models_dir = tempfile::tempdir().expect("temp dir");
        let downloader = Arc::new(downloader);
        let store = DirectoryModelStore::new(models_dir.path(), downloader.clone());
        let registry = ModelRegistry::new(
            Arc::new(StaticCatalog::new(
                &["qwen3-0.6", "gemma3-270m"],
                &["whisper-tiny"],
            )),
            Arc::new(MemoryStore::new()),
            Arc::new(store),
        );
        Self {
            registry,
            downloader,
            models_dir,
        }
    }

    /// Place model files on disk without going through the downloader.
    pub fn install(&self, slug: &str) {
        let dir = self.models_dir.path().join(slug);
        std::fs::create_dir_all(&dir).expect("model dir");
        std::fs::write(dir.join("weights.bin"), b"weights").expect("weights");
    }
}
