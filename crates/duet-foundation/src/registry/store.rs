//! Model files laid out as one directory per slug.

use async_trait::async_trait;
use duet_kernel::error::DownloadError;
use duet_kernel::model::{DownloadTask, ModelDownloader, ModelStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub struct DirectoryModelStore {
    root: PathBuf,
    downloader: Arc<dyn ModelDownloader>,
}

impl DirectoryModelStore {
    pub fn new(root: impl Into<PathBuf>, downloader: Arc<dyn ModelDownloader>) -> Self {
        Self {
            root: root.into(),
            downloader,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ModelStore for DirectoryModelStore {
    fn model_path(&self, slug: &str) -> PathBuf {
        self.root.join(slug)
    }

    /// A model is present when its directory exists and is not empty.
    async fn exists(&self, slug: &str) -> bool {
        let Ok(mut entries) = tokio::fs::read_dir(self.model_path(slug)).await else {
            return false;
        };
        matches!(entries.next_entry().await, Ok(Some(_)))
    }

    async fn download(&self, task: &DownloadTask) -> Result<(), DownloadError> {
        let destination = self.root.join(&task.folder);
        tokio::fs::create_dir_all(&destination)
            .await
            .map_err(|e| DownloadError::Storage {
                slug: task.folder.clone(),
                reason: e.to_string(),
            })?;

        match self.downloader.fetch(task, &destination).await {
            Ok(()) => {
                info!(model = %task.folder, path = %destination.display(), "model stored");
                Ok(())
            }
            Err(e) => {
                warn!(model = %task.folder, error = %e, "model download failed");
                // A half-written directory would read as present.
                let _ = tokio::fs::remove_dir_all(&destination).await;
                Err(e)
            }
        }
    }
}
