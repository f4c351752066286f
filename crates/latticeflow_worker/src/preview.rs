//! GENERATE_RENDER and DOWNLOAD_TELEGRAM_IMAGES handlers (spec.md §4.10).

use async_trait::async_trait;
use latticeflow_core::error::JobError;
use latticeflow_core::paths::DataLayout;
use latticeflow_db::models::catalog::{ModelKind, PreviewKind, PreviewSource};
use latticeflow_db::models::ingest::AttachmentType;
use latticeflow_db::models::jobs::{Job, JobType};
use latticeflow_db::Store;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::runtime::JobHandler;

const RENDER_TIMEOUT: Duration = Duration::from_secs(30);
const RENDER_SIZE: u32 = 400;
const MAX_RENDERABLE_STL_BYTES: i64 = 100 * 1024 * 1024;
const MAX_TELEGRAM_IMAGES: usize = 10;

/// Internal 3mf paths tried in order, first non-empty hit wins
/// (spec.md §4.10 step 3).
const THREEMF_THUMBNAIL_PATHS: &[&str] = &[
    "Metadata/thumbnail.png",
    "Metadata/plate_1.png",
    "thumbnail.png",
    ".thumbnails/thumbnail.png",
];

#[derive(Deserialize)]
struct DownloadTelegramImagesPayload {
    message_id: String,
}

/// Downloads every PHOTO attachment of a message as a PreviewAsset,
/// grounded on the teacher's download worker for the staging-and-hash
/// shape, generalized to preview storage instead of design files.
pub struct DownloadTelegramImagesHandler {
    store: Arc<Store>,
    chat: Arc<dyn latticeflow_scan::chat_platform::ChatPlatformClient>,
    layout: Arc<DataLayout>,
}

impl DownloadTelegramImagesHandler {
    pub fn new(
        store: Arc<Store>,
        chat: Arc<dyn latticeflow_scan::chat_platform::ChatPlatformClient>,
        layout: Arc<DataLayout>,
    ) -> Self {
        Self { store, chat, layout }
    }
}

#[async_trait]
impl JobHandler for DownloadTelegramImagesHandler {
    fn job_types(&self) -> &[JobType] {
        &[JobType::DownloadTelegramImages]
    }

    async fn process(&self, job: &Job) -> Result<Option<String>, JobError> {
        let design_id = job
            .design_id
            .clone()
            .ok_or_else(|| JobError::non_retryable("telegram image job missing design_id"))?;
        let payload = job
            .payload_json
            .as_deref()
            .ok_or_else(|| JobError::non_retryable("telegram image job missing payload"))?;
        let payload: DownloadTelegramImagesPayload = serde_json::from_str(payload)
            .map_err(|e| JobError::non_retryable(format!("bad payload: {e}")))?;

        let attachments = self
            .store
            .candidate_attachments_for_message(&payload.message_id)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;
        let photos: Vec<_> = attachments
            .into_iter()
            .filter(|a| a.attachment_type == AttachmentType::Photo)
            .take(MAX_TELEGRAM_IMAGES)
            .collect();

        let preview_dir = self.layout.previews_root().join(PreviewSource::Telegram.storage_dirname()).join(&design_id);
        tokio::fs::create_dir_all(&preview_dir)
            .await
            .map_err(|e| JobError::retryable(format!("creating preview dir: {e}")))?;

        let mut downloaded = 0usize;
        for attachment in photos {
            if self
                .store
                .preview_asset_exists_for_upstream_id(&design_id, &attachment.upstream_file_id)
                .await
                .map_err(|e| JobError::retryable(e.to_string()))?
            {
                continue;
            }

            let bytes = self
                .chat
                .download_media(&attachment.upstream_file_id)
                .await
                .map_err(super::download::classify_chat_error)?;

            let ext = sniff_image_extension(&bytes);
            let filename = format!("{}.{ext}", Uuid::new_v4());
            let dest = preview_dir.join(&filename);
            tokio::fs::write(&dest, &bytes)
                .await
                .map_err(|e| JobError::retryable(format!("writing preview: {e}")))?;

            let (width, height) = image::load_from_memory(&bytes)
                .map(|img| (Some(img.width() as i64), Some(img.height() as i64)))
                .unwrap_or((None, None));

            self.store
                .add_preview_asset_with_upstream_id(
                    &design_id,
                    PreviewSource::Telegram,
                    PreviewKind::Thumbnail,
                    &dest.to_string_lossy(),
                    bytes.len() as i64,
                    width,
                    height,
                    Some(&attachment.upstream_file_id),
                )
                .await
                .map_err(|e| JobError::retryable(e.to_string()))?;
            downloaded += 1;
        }

        if downloaded > 0 {
            self.store
                .auto_select_primary_preview(&design_id)
                .await
                .map_err(|e| JobError::retryable(e.to_string()))?;
        }

        Ok(Some(downloaded.to_string()))
    }
}

/// Only `.jpg/.jpeg/.png/.gif/.webp` are kept as-is; anything else is
/// forced to `.jpg` (spec.md §4.10).
fn sniff_image_extension(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => "png",
        Ok(image::ImageFormat::Gif) => "gif",
        Ok(image::ImageFormat::WebP) => "webp",
        Ok(image::ImageFormat::Jpeg) => "jpg",
        _ => "jpg",
    }
}

/// Renders an stl-thumb PNG and/or extracts a 3mf's embedded thumbnail,
/// grounded on the teacher's subprocess-invoking extractor
/// (`casparian::scout::extractor`) for the spawn-with-timeout shape.
pub struct GenerateRenderHandler {
    store: Arc<Store>,
    layout: Arc<DataLayout>,
    renderer_bin: Option<String>,
}

impl GenerateRenderHandler {
    pub fn new(store: Arc<Store>, layout: Arc<DataLayout>, renderer_bin: Option<String>) -> Self {
        Self { store, layout, renderer_bin }
    }
}

#[async_trait]
impl JobHandler for GenerateRenderHandler {
    fn job_types(&self) -> &[JobType] {
        &[JobType::GenerateRender]
    }

    async fn process(&self, job: &Job) -> Result<Option<String>, JobError> {
        let design_id = job
            .design_id
            .clone()
            .ok_or_else(|| JobError::non_retryable("render job missing design_id"))?;

        let files = self
            .store
            .list_design_files(&design_id)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;

        let largest_stl = files
            .iter()
            .filter(|f| f.model_kind == ModelKind::Stl)
            .max_by_key(|f| f.size_bytes);
        let largest_3mf = files
            .iter()
            .filter(|f| f.model_kind == ModelKind::ThreeMf)
            .max_by_key(|f| f.size_bytes);

        let library_root = self.layout.library_root();
        let preview_dir = self.layout.previews_root().join(PreviewSource::Rendered.storage_dirname()).join(&design_id);
        let mut created = false;

        if let Some(stl) = largest_stl {
            if stl.size_bytes <= MAX_RENDERABLE_STL_BYTES {
                if let Some(bin) = &self.renderer_bin {
                    let source_path = library_root.join(&stl.relative_path);
                    if let Some(png_path) = self
                        .render_stl(bin, &source_path, &preview_dir)
                        .await?
                    {
                        let size_bytes = tokio::fs::metadata(&png_path)
                            .await
                            .map(|m| m.len() as i64)
                            .unwrap_or(0);
                        self.store
                            .add_preview_asset(
                                &design_id,
                                PreviewSource::Rendered,
                                PreviewKind::Full,
                                &png_path.to_string_lossy(),
                                size_bytes,
                                Some(RENDER_SIZE as i64),
                                Some(RENDER_SIZE as i64),
                            )
                            .await
                            .map_err(|e| JobError::retryable(e.to_string()))?;
                        created = true;
                    }
                }
            }
        }

        if let Some(threemf) = largest_3mf {
            let source_path = library_root.join(&threemf.relative_path);
            if let Some((bytes, ext)) = extract_3mf_thumbnail(&source_path) {
                let embedded_dir = self.layout.previews_root().join(PreviewSource::Embedded3mf.storage_dirname()).join(&design_id);
                tokio::fs::create_dir_all(&embedded_dir)
                    .await
                    .map_err(|e| JobError::retryable(format!("creating preview dir: {e}")))?;
                let dest = embedded_dir.join(format!("{}.{ext}", Uuid::new_v4()));
                tokio::fs::write(&dest, &bytes)
                    .await
                    .map_err(|e| JobError::retryable(format!("writing embedded thumbnail: {e}")))?;
                self.store
                    .add_preview_asset(
                        &design_id,
                        PreviewSource::Embedded3mf,
                        PreviewKind::Thumbnail,
                        &dest.to_string_lossy(),
                        bytes.len() as i64,
                        None,
                        None,
                    )
                    .await
                    .map_err(|e| JobError::retryable(e.to_string()))?;
                created = true;
            }
        }

        if created {
            self.store
                .auto_select_primary_preview(&design_id)
                .await
                .map_err(|e| JobError::retryable(e.to_string()))?;
        }

        Ok(None)
    }
}

impl GenerateRenderHandler {
    async fn render_stl(
        &self,
        bin: &str,
        source_path: &Path,
        dest_dir: &Path,
    ) -> Result<Option<PathBuf>, JobError> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| JobError::retryable(format!("creating preview dir: {e}")))?;
        let dest = dest_dir.join(format!("{}.png", Uuid::new_v4()));

        let mut command = tokio::process::Command::new(bin);
        command
            .arg(source_path)
            .arg(&dest)
            .arg("--size")
            .arg(RENDER_SIZE.to_string())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        let output = tokio::time::timeout(RENDER_TIMEOUT, command.output())
            .await
            .map_err(|_| JobError::retryable("renderer timed out"))?
            .map_err(|e| JobError::retryable(format!("spawning renderer: {e}")))?;

        if !output.status.success() || !tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            return Ok(None);
        }
        Ok(Some(dest))
    }
}

/// Reads `path`'s zip central directory looking for the first non-empty
/// thumbnail among `THREEMF_THUMBNAIL_PATHS`, returning its bytes and a
/// stored extension (3mf thumbnails are always PNG).
fn extract_3mf_thumbnail(path: &Path) -> Option<(Vec<u8>, &'static str)> {
    let file = std::fs::File::open(path).ok()?;
    let mut archive = zip::ZipArchive::new(file).ok()?;
    for candidate in THREEMF_THUMBNAIL_PATHS {
        if let Ok(mut entry) = archive.by_name(candidate) {
            let mut bytes = Vec::new();
            if std::io::Read::read_to_end(&mut entry, &mut bytes).is_ok() && !bytes.is_empty() {
                return Some((bytes, "png"));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_falls_back_to_jpg_for_unknown_bytes() {
        assert_eq!(sniff_image_extension(b"not-an-image"), "jpg");
    }

    #[test]
    fn threemf_thumbnail_paths_are_tried_in_spec_order() {
        assert_eq!(THREEMF_THUMBNAIL_PATHS[0], "Metadata/thumbnail.png");
        assert_eq!(THREEMF_THUMBNAIL_PATHS.len(), 4);
    }
}
