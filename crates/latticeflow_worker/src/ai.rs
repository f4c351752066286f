//! `AI_ANALYZE` worker (spec.md §4.13): optional, API-key-gated tagging
//! of a Design from its best previews via an external vision model.

use async_trait::async_trait;
use latticeflow_core::error::JobError;
use latticeflow_core::paths::DataLayout;
use latticeflow_db::models::catalog::PreviewAsset;
use latticeflow_db::models::jobs::{Job, JobType};
use latticeflow_db::models::tags::TagSource;
use latticeflow_db::Store;
use latticeflow_limiter::RateLimiter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::runtime::JobHandler;

const MAX_PREVIEWS: usize = 4;
const MAX_CAPTION_CHARS: usize = 1000;
const MAX_VOCAB_TAGS: i64 = 200;
const DEFAULT_MAX_TAGS_SETTING: &str = "ai_max_tags_per_design";
const DEFAULT_MAX_TAGS: usize = 25;

#[derive(Deserialize)]
struct AiAnalyzePayload {
    design_id: String,
    #[serde(default)]
    force: bool,
}

/// Everything the prompt-building step knows about a Design, handed to
/// the concrete AI client so it can construct the `generateContent` body.
#[derive(Debug, Serialize)]
pub struct PromptContext {
    pub title: String,
    pub designer: Option<String>,
    pub channel: Option<String>,
    pub caption: Option<String>,
    pub existing_tags: Vec<String>,
}

/// The handler's parsed view of `candidates[0].content.parts[0].text`.
#[derive(Debug, Deserialize)]
pub struct ModelResult {
    pub tags: Vec<String>,
    pub best_preview_index: Option<usize>,
}

/// Implemented by the concrete AI vision client; kept as a trait seam so
/// the worker is testable without a live API key, matching the shape of
/// `ChatPlatformClient`.
#[async_trait]
pub trait AiVisionClient: Send + Sync {
    async fn analyze(
        &self,
        context: &PromptContext,
        preview_bytes: &[Vec<u8>],
    ) -> Result<ModelResult, AiClientError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AiClientError {
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("http error: {0}")]
    Http(String),
    #[error("model returned malformed json: {0}")]
    BadResponse(String),
}

pub struct AiAnalyzeHandler {
    store: Arc<Store>,
    layout: Arc<DataLayout>,
    client: Arc<dyn AiVisionClient>,
    limiter: Arc<RateLimiter>,
}

impl AiAnalyzeHandler {
    pub fn new(store: Arc<Store>, layout: Arc<DataLayout>, client: Arc<dyn AiVisionClient>, limiter: Arc<RateLimiter>) -> Self {
        Self { store, layout, client, limiter }
    }

    /// Up to 4 previews, in the spec's creator-provided-first order,
    /// dropping RENDERED once better options exist (spec.md §4.13).
    fn select_previews(mut assets: Vec<PreviewAsset>) -> Vec<PreviewAsset> {
        assets.sort_by_key(|a| a.source.ai_priority());
        let has_non_rendered = assets
            .iter()
            .any(|a| a.source != latticeflow_db::models::catalog::PreviewSource::Rendered);
        if has_non_rendered {
            assets.retain(|a| a.source != latticeflow_db::models::catalog::PreviewSource::Rendered);
        }
        assets.truncate(MAX_PREVIEWS);
        assets
    }

    /// Channel title and caption text from the Design's preferred source,
    /// when it has one (cloud-drive/forum imports have neither).
    async fn preferred_message_context(&self, design_id: &str) -> Result<(Option<String>, Option<String>), JobError> {
        let sources = self
            .store
            .list_design_sources(design_id)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;
        let Some(message_id) = sources
            .iter()
            .find(|s| s.is_preferred)
            .or_else(|| sources.first())
            .and_then(|s| s.message_id.clone())
        else {
            return Ok((None, None));
        };
        let message = self
            .store
            .get_message(&message_id)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;
        let channel = self
            .store
            .get_channel(&message.channel_id)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;
        Ok((Some(channel.title), message.caption_raw))
    }
}

#[async_trait]
impl JobHandler for AiAnalyzeHandler {
    fn job_types(&self) -> &[JobType] {
        &[JobType::AiAnalyze]
    }

    async fn process(&self, job: &Job) -> Result<Option<String>, JobError> {
        let payload = job
            .payload_json
            .as_deref()
            .ok_or_else(|| JobError::non_retryable("ai_analyze job missing payload"))?;
        let payload: AiAnalyzePayload = serde_json::from_str(payload)
            .map_err(|e| JobError::non_retryable(format!("bad payload: {e}")))?;

        if !payload.force
            && self
                .store
                .has_tags_from_source(&payload.design_id, TagSource::AutoAi)
                .await
                .map_err(|e| JobError::retryable(e.to_string()))?
        {
            return Ok(Some("skipped: already ai-tagged".to_string()));
        }

        let design = self
            .store
            .get_design(&payload.design_id)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;

        let assets = self
            .store
            .list_preview_assets(&payload.design_id)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;
        let selected = Self::select_previews(assets);
        if selected.is_empty() {
            return Ok(Some("skipped: no previews available".to_string()));
        }

        self.limiter
            .acquire(&payload.design_id)
            .await
            .map_err(|e| JobError::retryable(format!("ai rate limit: retry after {:?}", e.retry_after)))?;

        let mut preview_bytes = Vec::with_capacity(selected.len());
        for asset in &selected {
            let full_path = self.layout.previews_root().join(&asset.path);
            let bytes = tokio::fs::read(&full_path)
                .await
                .map_err(|e| JobError::retryable(format!("reading preview {}: {e}", asset.path)))?;
            preview_bytes.push(bytes);
        }

        let existing_tags = self
            .store
            .list_top_tags(MAX_VOCAB_TAGS)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;
        let (channel, caption) = self.preferred_message_context(&payload.design_id).await?;

        let context = PromptContext {
            title: design.title.clone(),
            designer: design.designer.clone(),
            channel,
            caption: caption.map(|c| c.chars().take(MAX_CAPTION_CHARS).collect()),
            existing_tags,
        };

        let result = self.client.analyze(&context, &preview_bytes).await.map_err(|e| match e {
            AiClientError::RateLimited { retry_after_secs } => {
                JobError::retryable(format!("ai rate limited, retry after {retry_after_secs}s"))
            }
            AiClientError::Http(msg) => JobError::retryable(msg),
            AiClientError::BadResponse(msg) => JobError::retryable(format!("bad ai response: {msg}")),
        })?;

        let max_tags = self
            .store
            .get_setting::<usize>(DEFAULT_MAX_TAGS_SETTING)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?
            .unwrap_or(DEFAULT_MAX_TAGS);

        for tag in normalize_tags(&result.tags, max_tags) {
            self.store
                .add_tag(&payload.design_id, &tag, TagSource::AutoAi)
                .await
                .map_err(|e| JobError::retryable(e.to_string()))?;
        }

        if let Some(index) = result.best_preview_index {
            if let Some(asset) = selected.get(index) {
                if let Err(e) = self.store.set_primary_preview(&payload.design_id, &asset.id).await {
                    warn!(error = %e, "ai_analyze: setting primary preview failed");
                }
            }
        }

        Ok(None)
    }
}

fn normalize_tags(raw: &[String], max: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for tag in raw {
        let normalized = tag.trim().to_lowercase();
        if normalized.is_empty() || !seen.insert(normalized.clone()) {
            continue;
        }
        out.push(normalized);
        if out.len() >= max {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_tags_dedupes_and_lowercases() {
        let out = normalize_tags(&["Goblin".into(), "goblin".into(), "  Miniature ".into()], 10);
        assert_eq!(out, vec!["goblin".to_string(), "miniature".to_string()]);
    }

    #[test]
    fn normalize_tags_caps_at_max() {
        let raw: Vec<String> = (0..300).map(|i| format!("tag{i}")).collect();
        let out = normalize_tags(&raw, 200);
        assert_eq!(out.len(), 200);
    }
}
