//! Model descriptors and the on-disk model store seam.

use crate::error::DownloadError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Quantization assumed when the catalog does not say otherwise.
pub const DEFAULT_QUANTIZATION: u32 = 8;

fn default_quantization() -> u32 {
    DEFAULT_QUANTIZATION
}

/// Catalog entry for a text model.
///
/// `is_downloaded` is derived from the [`ModelStore`] on every registry
/// query. It is never written to the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    pub download_url: String,
    #[serde(default)]
    pub size_mb: u32,
    #[serde(default = "default_quantization")]
    pub quantization: u32,
    #[serde(default)]
    pub supports_tool_calling: bool,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing)]
    pub is_downloaded: bool,
}

/// Catalog entry for a speech model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceModelDescriptor {
    pub slug: String,
    pub download_url: String,
    #[serde(default)]
    pub size_mb: u32,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing)]
    pub is_downloaded: bool,
}

/// A single archive to fetch and unpack into `folder`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub url: String,
    pub file_name: String,
    pub folder: String,
    pub requires_extraction: bool,
}

impl DownloadTask {
    /// Task for `url` unpacked into the `slug` folder. The file name is the
    /// last path segment of the URL without its query string.
    pub fn for_url(url: impl Into<String>, slug: impl Into<String>) -> Self {
        let url = url.into();
        let file_name = file_name_from_url(&url).to_string();
        Self {
            url,
            file_name,
            folder: slug.into(),
            requires_extraction: true,
        }
    }
}

/// `https://host/a/b/model.zip?sig=1` → `model.zip`.
pub fn file_name_from_url(url: &str) -> &str {
    let without_query = url.split('?').next().unwrap_or(url);
    without_query.rsplit('/').next().unwrap_or(without_query)
}

/// Local storage of model files, keyed by slug.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Directory a model is loaded from.
    fn model_path(&self, slug: &str) -> PathBuf;

    /// Whether the model files are present.
    async fn exists(&self, slug: &str) -> bool;

    /// Fetch and unpack the files described by `task`.
    async fn download(&self, task: &DownloadTask) -> Result<(), DownloadError>;
}

/// External collaborator that transfers and unpacks one archive.
#[async_trait]
pub trait ModelDownloader: Send + Sync {
    async fn fetch(&self, task: &DownloadTask, destination: &Path) -> Result<(), DownloadError>;
}
