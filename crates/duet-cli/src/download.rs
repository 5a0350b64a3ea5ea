//! HTTP model downloader with progress reporting and zip extraction.

use async_trait::async_trait;
use duet_kernel::error::DownloadError;
use duet_kernel::model::{DownloadTask, ModelDownloader};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub struct HttpDownloader {
    http: reqwest::Client,
    show_progress: bool,
}

impl HttpDownloader {
    pub fn new(show_progress: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            show_progress,
        }
    }

    fn progress_bar(&self, total: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total.unwrap_or(0));
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

fn transfer(task: &DownloadTask, reason: impl std::fmt::Display) -> DownloadError {
    DownloadError::Transfer {
        slug: task.folder.clone(),
        reason: reason.to_string(),
    }
}

fn storage(task: &DownloadTask, reason: impl std::fmt::Display) -> DownloadError {
    DownloadError::Storage {
        slug: task.folder.clone(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl ModelDownloader for HttpDownloader {
    async fn fetch(&self, task: &DownloadTask, destination: &Path) -> Result<(), DownloadError> {
        let response = self
            .http
            .get(&task.url)
            .send()
            .await
            .map_err(|e| transfer(task, e))?;
        if !response.status().is_success() {
            return Err(transfer(
                task,
                format!("download failed with status {}", response.status()),
            ));
        }

        let archive_path = destination.join(&task.file_name);
        let mut file = tokio::fs::File::create(&archive_path)
            .await
            .map_err(|e| storage(task, e))?;

        let pb = self.progress_bar(response.content_length());
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| transfer(task, e))?;
            file.write_all(&chunk).await.map_err(|e| storage(task, e))?;
            pb.inc(chunk.len() as u64);
        }
        file.flush().await.map_err(|e| storage(task, e))?;
        drop(file);
        pb.finish_and_clear();

        if !task.requires_extraction {
            return Ok(());
        }

        debug!(archive = %archive_path.display(), "extracting model archive");
        let dest = destination.to_path_buf();
        let zip_path = archive_path.clone();
        tokio::task::spawn_blocking(move || extract_zip(&zip_path, &dest))
            .await
            .map_err(|e| storage(task, e))?
            .map_err(|e| storage(task, e))?;

        tokio::fs::remove_file(&archive_path)
            .await
            .map_err(|e| storage(task, e))
    }
}

/// Unpack `archive` into `dest_dir`, skipping entries that escape it.
fn extract_zip(archive: &Path, dest_dir: &Path) -> Result<(), String> {
    let file = std::fs::File::open(archive).map_err(|e| format!("open archive: {e}"))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| format!("read zip archive: {e}"))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| format!("read zip entry {i}: {e}"))?;

        let Some(outpath) = entry.enclosed_name().map(|path| dest_dir.join(path)) else {
            continue;
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)
                .map_err(|e| format!("create directory '{}': {e}", outpath.display()))?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("create directory '{}': {e}", parent.display()))?;
            }
            let mut outfile = std::fs::File::create(&outpath)
                .map_err(|e| format!("create file '{}': {e}", outpath.display()))?;
            std::io::copy(&mut entry, &mut outfile)
                .map_err(|e| format!("write '{}': {e}", outpath.display()))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use zip::write::SimpleFileOptions;

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn test_fetch_extracts_and_removes_archive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/m/qwen.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_bytes(&[
                ("config.json", b"{}"),
                ("weights/part-0.bin", b"0101"),
            ])))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let task = DownloadTask::for_url(format!("{}/m/qwen.zip?sig=1", server.uri()), "qwen3-0.6");

        HttpDownloader::new(false)
            .fetch(&task, dir.path())
            .await
            .unwrap();

        assert!(dir.path().join("config.json").exists());
        assert_eq!(
            std::fs::read(dir.path().join("weights/part-0.bin")).unwrap(),
            b"0101"
        );
        assert!(!dir.path().join("qwen.zip").exists());
    }

    #[tokio::test]
    async fn test_http_error_is_a_transfer_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let task = DownloadTask::for_url(format!("{}/m/qwen.zip", server.uri()), "qwen3-0.6");

        let err = HttpDownloader::new(false)
            .fetch(&task, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Transfer { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_a_storage_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not a zip".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let task = DownloadTask::for_url(format!("{}/m/qwen.zip", server.uri()), "qwen3-0.6");

        let err = HttpDownloader::new(false)
            .fetch(&task, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Storage { .. }));
    }
}
