//! Artifact storage: persists generated images and hands back the URL to record.

pub mod cleanup;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::ArtifactError;
use crate::generation::GeneratedImage;

pub use cleanup::{CleanupReport, clean_old_artifacts, spawn_cleanup_task};

/// Durable storage for generated images.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Persist the image for `viewing_id` and return the URL clients fetch it from.
    async fn store(
        &self,
        viewing_id: Uuid,
        image: GeneratedImage,
        cancel: &CancellationToken,
    ) -> Result<String, ArtifactError>;
}

/// Writes PNGs under `<static_dir>/<images_subdir>/` on the local filesystem.
///
/// The returned URL mirrors the on-disk layout: `/<static_dir>/<images_subdir>/<id>.png`.
/// Provider-hosted images (`GeneratedImage::Url`) are recorded as-is.
pub struct LocalArtifactSink {
    root: PathBuf,
    url_prefix: String,
}

impl LocalArtifactSink {
    pub fn new(static_dir: &str, images_subdir: &str) -> Self {
        let static_dir = static_dir.trim_matches('/');
        let images_subdir = images_subdir.trim_matches('/');
        Self {
            root: PathBuf::from(static_dir).join(images_subdir),
            url_prefix: format!("/{static_dir}/{images_subdir}"),
        }
    }

    /// Sink rooted at an arbitrary directory, serving under `url_prefix`.
    pub fn with_root(root: impl Into<PathBuf>, url_prefix: &str) -> Self {
        Self {
            root: root.into(),
            url_prefix: format!("/{}", url_prefix.trim_matches('/')),
        }
    }

    /// Directory images are written to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name(viewing_id: Uuid) -> String {
        format!("{viewing_id}.png")
    }

    async fn write_bytes(&self, viewing_id: Uuid, bytes: &[u8]) -> Result<(), ArtifactError> {
        fs::create_dir_all(&self.root).await?;
        let final_path = self.root.join(Self::file_name(viewing_id));
        // Write under a temp name then rename, so readers never see a partial PNG.
        let tmp_path = self.root.join(format!("{viewing_id}.png.tmp"));
        fs::write(&tmp_path, bytes).await?;
        if let Err(e) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactSink for LocalArtifactSink {
    async fn store(
        &self,
        viewing_id: Uuid,
        image: GeneratedImage,
        cancel: &CancellationToken,
    ) -> Result<String, ArtifactError> {
        if cancel.is_cancelled() {
            return Err(ArtifactError::Cancelled);
        }

        let bytes = match image {
            GeneratedImage::Url(url) => return Ok(url),
            GeneratedImage::Bytes(bytes) => bytes,
        };
        if bytes.is_empty() {
            return Err(ArtifactError::Empty(viewing_id.to_string()));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = fs::remove_file(self.root.join(format!("{viewing_id}.png.tmp"))).await;
                return Err(ArtifactError::Cancelled);
            }
            result = self.write_bytes(viewing_id, &bytes) => result?,
        }

        let url = format!("{}/{}", self.url_prefix, Self::file_name(viewing_id));
        debug!(viewing_id = %viewing_id, size = bytes.len(), url = %url, "Image stored");
        Ok(url)
    }
}
