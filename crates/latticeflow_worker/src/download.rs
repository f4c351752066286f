//! DOWNLOAD_DESIGN and DOWNLOAD_IMPORT_RECORD handlers (spec.md §4.2, §4.11, §4.12).

use async_trait::async_trait;
use latticeflow_core::error::JobError;
use latticeflow_core::paths::DataLayout;
use latticeflow_db::models::catalog::{FileKind, ModelKind};
use latticeflow_db::models::ingest::AttachmentDownloadStatus;
use latticeflow_db::models::jobs::{Job, JobType};
use latticeflow_db::models::imports::{ImportRecordStatus, ImportSourceKind};
use latticeflow_db::store::jobs::EnqueueRequest;
use latticeflow_db::store::NewDesignFile;
use latticeflow_db::Store;
use latticeflow_queue::JobQueue;
use latticeflow_scan::chat_platform::{ChatPlatformClient, ChatPlatformError};
use latticeflow_scan::cloud_drive::{DriveClient, DriveToken};
use latticeflow_scan::forum::ForumClient;
use latticeflow_security::credentials::CredentialCipher;
use latticeflow_security::hashing::sha256_hex;
use serde::Deserialize;
use std::sync::Arc;

use crate::runtime::JobHandler;

const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "7z", "rar", "tar", "gz"];

#[derive(Deserialize)]
struct DownloadDesignPayload {
    design_id: String,
}

/// Downloads every candidate attachment of a Design's preferred chat-
/// platform source into its staging directory and hands the result to
/// extraction or import. Grounded on the teacher's download worker
/// (`casparian_worker::worker::download`) for the
/// staging-then-enqueue-next shape.
pub struct DownloadDesignHandler {
    store: Arc<Store>,
    queue: JobQueue,
    chat: Arc<dyn ChatPlatformClient>,
    layout: Arc<DataLayout>,
}

impl DownloadDesignHandler {
    pub fn new(
        store: Arc<Store>,
        queue: JobQueue,
        chat: Arc<dyn ChatPlatformClient>,
        layout: Arc<DataLayout>,
    ) -> Self {
        Self { store, queue, chat, layout }
    }
}

#[async_trait]
impl JobHandler for DownloadDesignHandler {
    fn job_types(&self) -> &[JobType] {
        &[JobType::DownloadDesign]
    }

    async fn process(&self, job: &Job) -> Result<Option<String>, JobError> {
        let design_id = job
            .design_id
            .clone()
            .ok_or_else(|| JobError::non_retryable("download job missing design_id"))?;
        let payload = job
            .payload_json
            .as_deref()
            .ok_or_else(|| JobError::non_retryable("download job missing payload"))?;
        let payload: DownloadDesignPayload = serde_json::from_str(payload)
            .map_err(|e| JobError::non_retryable(format!("bad payload: {e}")))?;
        if payload.design_id != design_id {
            return Err(JobError::non_retryable("payload design_id does not match job design_id"));
        }

        // spec.md §4.6: load the Design's sources, walk to their Messages,
        // and collect every candidate-design-file Attachment across them.
        let sources = self
            .store
            .list_design_sources(&design_id)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;

        let mut attachments = Vec::new();
        for source in &sources {
            let Some(message_id) = &source.message_id else { continue };
            let candidates = self
                .store
                .candidate_attachments_for_message(message_id)
                .await
                .map_err(|e| JobError::retryable(e.to_string()))?;
            attachments.extend(candidates);
        }
        if attachments.is_empty() {
            return Err(JobError::non_retryable("design has no candidate attachments to download"));
        }

        let staging_dir = self.layout.staging_dir(&design_id);
        tokio::fs::create_dir_all(&staging_dir)
            .await
            .map_err(|e| JobError::retryable(format!("creating staging dir: {e}")))?;

        let total = attachments.len() as i64;
        let mut saw_archive = false;
        for (index, attachment) in attachments.iter().enumerate() {
            if attachment.download_status == AttachmentDownloadStatus::Downloaded {
                continue;
            }

            self.store
                .set_attachment_download_status(&attachment.id, AttachmentDownloadStatus::Downloading, None)
                .await
                .map_err(|e| JobError::retryable(e.to_string()))?;

            let bytes = self
                .chat
                .download_media(&attachment.upstream_file_id)
                .await
                .map_err(classify_chat_error)?;

            let filename = attachment
                .filename
                .clone()
                .unwrap_or_else(|| format!("{}.bin", attachment.upstream_file_id));
            let dest = staging_dir.join(&filename);
            tokio::fs::write(&dest, &bytes)
                .await
                .map_err(|e| JobError::retryable(format!("writing downloaded file: {e}")))?;

            let hash = sha256_hex(&bytes);
            self.store
                .set_attachment_download_status(&attachment.id, AttachmentDownloadStatus::Downloaded, Some(&hash))
                .await
                .map_err(|e| JobError::retryable(e.to_string()))?;

            let extension = attachment.extension.clone().unwrap_or_default().to_ascii_lowercase();
            let is_archive = ARCHIVE_EXTENSIONS.contains(&extension.as_str());
            saw_archive |= is_archive;
            let file_kind = match extension.as_str() {
                "stl" | "3mf" | "obj" | "step" | "stp" => FileKind::Model,
                "zip" | "7z" | "rar" | "tar" | "gz" => FileKind::Archive,
                "png" | "jpg" | "jpeg" | "webp" | "gif" => FileKind::Image,
                _ => FileKind::Other,
            };
            let model_kind = ModelKind::from_extension(&extension);

            self.store
                .add_design_file(
                    &design_id,
                    NewDesignFile {
                        relative_path: filename.clone(),
                        filename,
                        extension,
                        size_bytes: bytes.len() as i64,
                        sha256: hash,
                        file_kind,
                        model_kind,
                        is_from_archive: false,
                    },
                )
                .await
                .map_err(|e| JobError::retryable(e.to_string()))?;

            self.queue
                .update_progress(&job.id, index as i64 + 1, Some(total))
                .await
                .map_err(|e| JobError::retryable(e.to_string()))?;
        }

        let next_type = if saw_archive { JobType::ExtractArchive } else { JobType::ImportToLibrary };
        let next_payload = serde_json::json!({ "staged_path": staging_dir.to_string_lossy() }).to_string();
        self.queue
            .enqueue(EnqueueRequest {
                job_type: next_type,
                design_id: Some(design_id),
                payload_json: Some(next_payload),
                ..Default::default()
            })
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;

        Ok(None)
    }
}

pub(crate) fn classify_chat_error(err: ChatPlatformError) -> JobError {
    match err {
        ChatPlatformError::FloodWait { retry_after_secs } => {
            JobError::retryable(format!("telegram flood wait, retry after {retry_after_secs}s"))
        }
        ChatPlatformError::Transport(msg) => JobError::retryable(msg),
        ChatPlatformError::NotAuthorized
        | ChatPlatformError::PhoneCodeInvalid
        | ChatPlatformError::PhoneCodeExpired
        | ChatPlatformError::SessionPasswordNeeded
        | ChatPlatformError::PhoneNumberInvalid
        | ChatPlatformError::AuthKeyError => {
            JobError::non_retryable(err.to_string())
        }
    }
}

/// Downloads the content behind one `ImportRecord` from whichever kind of
/// import source owns it (cloud drive or forum; bulk-folder entries are
/// already local and never reach this handler).
pub struct DownloadImportRecordHandler {
    store: Arc<Store>,
    queue: JobQueue,
    layout: Arc<DataLayout>,
    drive: Arc<DriveClient>,
    forum: Arc<ForumClient>,
    cipher: Arc<CredentialCipher>,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct DownloadImportRecordPayload {
    import_record_id: String,
}

impl DownloadImportRecordHandler {
    pub fn new(
        store: Arc<Store>,
        queue: JobQueue,
        layout: Arc<DataLayout>,
        drive: Arc<DriveClient>,
        forum: Arc<ForumClient>,
        cipher: Arc<CredentialCipher>,
    ) -> Self {
        Self {
            store,
            queue,
            layout,
            drive,
            forum,
            cipher,
            http: reqwest::Client::new(),
        }
    }

    async fn drive_access_token(&self, credential_id: &str) -> Result<String, JobError> {
        let credential = self
            .store
            .get_credential(credential_id)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;
        let plaintext = self
            .cipher
            .open(&credential.sealed_secret)
            .map_err(|e| JobError::non_retryable(format!("credential decrypt failed: {e}")))?;
        let token: DriveToken = serde_json::from_str(&plaintext)
            .map_err(|e| JobError::non_retryable(format!("corrupt drive token: {e}")))?;

        if !token.needs_refresh() {
            return Ok(token.access_token);
        }

        let refreshed = self
            .drive
            .refresh(&token)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;
        let sealed = self.cipher.seal(
            &serde_json::to_string(&refreshed).expect("DriveToken serializes"),
        );
        self.store
            .rotate_credential(credential_id, &sealed)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;
        Ok(refreshed.access_token)
    }
}

#[async_trait]
impl JobHandler for DownloadImportRecordHandler {
    fn job_types(&self) -> &[JobType] {
        &[JobType::DownloadImportRecord]
    }

    async fn process(&self, job: &Job) -> Result<Option<String>, JobError> {
        let payload = job
            .payload_json
            .as_deref()
            .ok_or_else(|| JobError::non_retryable("download job missing payload"))?;
        let payload: DownloadImportRecordPayload = serde_json::from_str(payload)
            .map_err(|e| JobError::non_retryable(format!("bad payload: {e}")))?;

        let import_record = self
            .store
            .get_import_record(&payload.import_record_id)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;

        let source = self
            .store
            .get_import_source(&import_record.import_source_id)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;

        let staging_dir = self.layout.staging_gdrive_dir(&import_record.id);
        tokio::fs::create_dir_all(&staging_dir)
            .await
            .map_err(|e| JobError::retryable(format!("creating staging dir: {e}")))?;

        match source.kind {
            ImportSourceKind::CloudDrive => {
                let credential_id = source
                    .credential_id
                    .clone()
                    .ok_or_else(|| JobError::non_retryable("cloud drive source has no credential"))?;
                let token = self.drive_access_token(&credential_id).await?;

                let files = self
                    .drive
                    .list_folder_recursive(&token, &import_record.upstream_ref)
                    .await
                    .map_err(|e| JobError::retryable(e.to_string()))?;
                let files: Vec<_> = files.into_iter().filter(|f| !f.is_folder()).collect();

                let fingerprint = latticeflow_security::hashing::content_fingerprint(
                    files.iter().map(|f| (f.name.as_str(), f.size_bytes())),
                );
                if self
                    .link_to_existing_design(&source.id, &import_record.id, &fingerprint)
                    .await?
                {
                    return Ok(None);
                }

                for file in &files {
                    let bytes = self
                        .drive
                        .download_file(&token, &file.id)
                        .await
                        .map_err(|e| JobError::retryable(e.to_string()))?;
                    let dest = staging_dir.join(&file.name);
                    tokio::fs::write(&dest, &bytes)
                        .await
                        .map_err(|e| JobError::retryable(format!("writing {}: {e}", file.name)))?;
                }
            }
            ImportSourceKind::Forum => {
                let attachments = self
                    .forum
                    .topic_attachments(&import_record.upstream_ref)
                    .await
                    .map_err(|e| JobError::retryable(e.to_string()))?;

                let fingerprint = latticeflow_security::hashing::content_fingerprint(
                    attachments.iter().map(|a| (a.filename.as_str(), a.size_bytes)),
                );
                if self
                    .link_to_existing_design(&source.id, &import_record.id, &fingerprint)
                    .await?
                {
                    return Ok(None);
                }

                for attachment in &attachments {
                    let bytes = self
                        .http
                        .get(&attachment.url)
                        .send()
                        .await
                        .and_then(|r| r.error_for_status())
                        .map_err(|e| JobError::retryable(e.to_string()))?
                        .bytes()
                        .await
                        .map_err(|e| JobError::retryable(e.to_string()))?;
                    let dest = staging_dir.join(&attachment.filename);
                    tokio::fs::write(&dest, &bytes)
                        .await
                        .map_err(|e| JobError::retryable(format!("writing {}: {e}", attachment.filename)))?;
                }
            }
            ImportSourceKind::BulkFolder => {
                return Err(JobError::non_retryable(
                    "bulk-folder import records are read in place, not downloaded",
                ));
            }
        }

        self.finalize_downloaded_design(&import_record, &staging_dir).await
    }
}

impl DownloadImportRecordHandler {
    /// spec.md §4.8 pre-download duplicate check: if a sibling record on
    /// the same source already imported identical content, link this
    /// record to that Design instead of downloading again.
    async fn link_to_existing_design(
        &self,
        import_source_id: &str,
        import_record_id: &str,
        fingerprint: &str,
    ) -> Result<bool, JobError> {
        let existing = self
            .store
            .find_import_record_by_fingerprint(import_source_id, fingerprint)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;
        let Some(existing) = existing else { return Ok(false) };
        let Some(design_id) = existing.design_id.clone() else { return Ok(false) };

        self.store
            .set_import_record_status(import_record_id, ImportRecordStatus::Imported, Some(&design_id))
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;
        Ok(true)
    }

    /// Builds the Design/DesignFile rows from what was just downloaded
    /// into `staging_dir`, renames staging to the canonical per-design
    /// directory, and enqueues follow-on work (spec.md §4.6).
    async fn finalize_downloaded_design(
        &self,
        import_record: &latticeflow_db::models::imports::ImportRecord,
        staging_dir: &std::path::Path,
    ) -> Result<Option<String>, JobError> {
        use latticeflow_db::models::catalog::{FileKind, MetadataAuthority, ModelKind};
        use latticeflow_db::store::NewDesignFile;

        let design = self
            .store
            .create_design(&import_record.title, None, MetadataAuthority::User)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;

        self.store
            .add_design_source(&design.id, None, Some(&import_record.id), true)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;

        let mut saw_preview = false;
        for entry in walkdir::WalkDir::new(staging_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let relative_path = entry
                .path()
                .strip_prefix(staging_dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let filename = entry.file_name().to_string_lossy().to_string();
            let extension = std::path::Path::new(&filename)
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();

            let bytes = tokio::fs::read(entry.path())
                .await
                .map_err(|e| JobError::retryable(format!("reading {filename}: {e}")))?;
            let sha256 = latticeflow_security::hashing::sha256_hex(&bytes);
            let size_bytes = bytes.len() as i64;

            let file_kind = match extension.as_str() {
                "stl" | "3mf" | "obj" | "step" | "stp" => FileKind::Model,
                "zip" | "7z" | "rar" | "tar" | "gz" => FileKind::Archive,
                "png" | "jpg" | "jpeg" | "webp" | "gif" => {
                    saw_preview = true;
                    FileKind::Image
                }
                _ => FileKind::Other,
            };
            let model_kind = ModelKind::from_extension(&extension);

            self.store
                .add_design_file(
                    &design.id,
                    NewDesignFile {
                        relative_path,
                        filename,
                        extension,
                        size_bytes,
                        sha256,
                        file_kind,
                        model_kind,
                        is_from_archive: false,
                    },
                )
                .await
                .map_err(|e| JobError::retryable(e.to_string()))?;
        }

        let final_staging_dir = self.layout.staging_dir(&design.id);
        if let Some(parent) = final_staging_dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| JobError::retryable(e.to_string()))?;
        }
        tokio::fs::rename(staging_dir, &final_staging_dir)
            .await
            .map_err(|e| JobError::retryable(format!("moving staging dir: {e}")))?;

        self.store
            .set_import_record_status(&import_record.id, ImportRecordStatus::Imported, Some(&design.id))
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;

        let next_payload = serde_json::json!({ "staged_path": final_staging_dir.to_string_lossy() }).to_string();
        self.queue
            .enqueue(EnqueueRequest {
                job_type: JobType::ImportToLibrary,
                design_id: Some(design.id.clone()),
                payload_json: Some(next_payload),
                ..Default::default()
            })
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;

        if !saw_preview {
            self.queue
                .enqueue(EnqueueRequest {
                    job_type: JobType::GenerateRender,
                    design_id: Some(design.id.clone()),
                    ..Default::default()
                })
                .await
                .map_err(|e| JobError::retryable(e.to_string()))?;
        }

        Ok(None)
    }
}
