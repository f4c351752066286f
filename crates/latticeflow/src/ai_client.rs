//! Concrete `AiVisionClient` (spec.md §6 "AI vision model" collaborator):
//! a single `generateContent`-shaped POST per analysis, images inlined as
//! base64. The handler builds the `PromptContext` and does its own rate
//! limiting; this client only speaks HTTP.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use latticeflow_worker::ai::{AiClientError, AiVisionClient, ModelResult, PromptContext};
use serde_json::{json, Value};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiVisionClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiVisionClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    fn prompt_text(context: &PromptContext) -> String {
        let existing = if context.existing_tags.is_empty() {
            "none yet".to_string()
        } else {
            context.existing_tags.join(", ")
        };
        format!(
            "You are tagging a 3D-printable design for a personal library. \
             Title: {title}. Designer: {designer}. Source channel: {channel}. \
             Caption: {caption}. Existing tag vocabulary (reuse when it fits): {existing}. \
             Look at the attached preview images and respond with ONLY a JSON object of the \
             shape {{\"tags\": [\"...\"], \"best_preview_index\": 0}} where best_preview_index \
             is the index, into the images as attached, of the most representative preview.",
            title = context.title,
            designer = context.designer.as_deref().unwrap_or("unknown"),
            channel = context.channel.as_deref().unwrap_or("unknown"),
            caption = context.caption.as_deref().unwrap_or("none"),
        )
    }

    fn request_body(context: &PromptContext, preview_bytes: &[Vec<u8>]) -> Value {
        let mut parts = vec![json!({ "text": Self::prompt_text(context) })];
        for bytes in preview_bytes {
            parts.push(json!({
                "inlineData": {
                    "mimeType": "image/jpeg",
                    "data": STANDARD.encode(bytes),
                }
            }));
        }
        json!({ "contents": [{ "parts": parts }] })
    }

    fn extract_text(body: &Value) -> Result<&str, AiClientError> {
        body.get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| AiClientError::BadResponse("missing candidates[0].content.parts[0].text".into()))
    }
}

#[async_trait]
impl AiVisionClient for GeminiVisionClient {
    async fn analyze(&self, context: &PromptContext, preview_bytes: &[Vec<u8>]) -> Result<ModelResult, AiClientError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::request_body(context, preview_bytes))
            .send()
            .await
            .map_err(|e| AiClientError::Http(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return Err(AiClientError::RateLimited { retry_after_secs });
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AiClientError::Http(format!("{status}: {text}")));
        }

        let body: Value = response.json().await.map_err(|e| AiClientError::BadResponse(e.to_string()))?;
        let text = Self::extract_text(&body)?;
        serde_json::from_str(text).map_err(|e| AiClientError::BadResponse(format!("{e}: {text}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context() -> PromptContext {
        PromptContext {
            title: "Goblin Archer".to_string(),
            designer: Some("Acme Minis".to_string()),
            channel: Some("mini-drops".to_string()),
            caption: Some("new goblin pose".to_string()),
            existing_tags: vec!["goblin".into(), "fantasy".into()],
        }
    }

    #[test]
    fn prompt_text_includes_title_and_tags() {
        let text = GeminiVisionClient::prompt_text(&sample_context());
        assert!(text.contains("Goblin Archer"));
        assert!(text.contains("goblin, fantasy"));
    }

    #[test]
    fn request_body_has_one_part_per_image_plus_prompt() {
        let body = GeminiVisionClient::request_body(&sample_context(), &[vec![1, 2, 3], vec![4, 5, 6]]);
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn extract_text_reads_nested_candidate_path() {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"tags\":[]}" }] } }]
        });
        assert_eq!(GeminiVisionClient::extract_text(&body).unwrap(), "{\"tags\":[]}");
    }

    #[test]
    fn extract_text_errors_on_missing_path() {
        let body = json!({ "candidates": [] });
        assert!(GeminiVisionClient::extract_text(&body).is_err());
    }
}
