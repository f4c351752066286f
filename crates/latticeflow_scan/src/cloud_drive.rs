//! Cloud-drive (Google Drive) scanner client (spec.md §4.12, §6).
//!
//! Not in the teacher's stack — `oauth2` + `reqwest` are pack-level
//! enrichment (see DESIGN.md). Retry/backoff shape mirrors the spec's
//! §4.12 rate-limit contract: `min(2·2^attempt, 300)s` ±30% jitter, up
//! to 5 retries on HTTP 429.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive.readonly",
    "https://www.googleapis.com/auth/userinfo.email",
    "openid",
];

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oauth error: {0}")]
    OAuth(String),
    #[error("rate limited after exhausting retries")]
    RateLimitExhausted,
}

pub fn oauth_client(client_id: &str, client_secret: &str, redirect_url: &str) -> Result<BasicClient, DriveError> {
    Ok(BasicClient::new(
        ClientId::new(client_id.to_string()),
        Some(ClientSecret::new(client_secret.to_string())),
        AuthUrl::new(AUTH_URL.to_string()).map_err(|e| DriveError::OAuth(e.to_string()))?,
        Some(TokenUrl::new(TOKEN_URL.to_string()).map_err(|e| DriveError::OAuth(e.to_string()))?),
    )
    .set_redirect_uri(RedirectUrl::new(redirect_url.to_string()).map_err(|e| DriveError::OAuth(e.to_string()))?))
}

pub fn authorization_url(oauth: &BasicClient) -> String {
    let (url, _csrf) = oauth
        .authorize_url(oauth2::CsrfToken::new_random)
        .add_scopes(SCOPES.iter().map(|s| Scope::new(s.to_string())))
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .url();
    url.to_string()
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct DriveToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl DriveToken {
    pub fn needs_refresh(&self) -> bool {
        self.expires_at - Utc::now() < ChronoDuration::minutes(5)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(default)]
    pub size: Option<String>,
    pub parents: Option<Vec<String>>,
}

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn size_bytes(&self) -> u64 {
        self.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
struct FileListResponse {
    files: Vec<DriveFile>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

pub struct DriveClient {
    http: Client,
    oauth: BasicClient,
}

impl DriveClient {
    pub fn new(oauth: BasicClient) -> Self {
        Self {
            http: Client::new(),
            oauth,
        }
    }

    pub async fn refresh(&self, token: &DriveToken) -> Result<DriveToken, DriveError> {
        let response = self
            .oauth
            .exchange_refresh_token(&RefreshToken::new(token.refresh_token.clone()))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| DriveError::OAuth(e.to_string()))?;

        Ok(DriveToken {
            access_token: response.access_token().secret().clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: Utc::now()
                + response
                    .expires_in()
                    .map(|d| ChronoDuration::from_std(d).unwrap_or_default())
                    .unwrap_or_else(|| ChronoDuration::hours(1)),
        })
    }

    /// Batched listing: up to 100 entries per page, recursing into
    /// subfolders breadth-first.
    pub async fn list_folder_recursive(
        &self,
        access_token: &str,
        root_folder_id: &str,
    ) -> Result<Vec<DriveFile>, DriveError> {
        let mut all = Vec::new();
        let mut pending = vec![root_folder_id.to_string()];

        while let Some(folder_id) = pending.pop() {
            let mut page_token: Option<String> = None;
            loop {
                let mut query = self
                    .http
                    .get("https://www.googleapis.com/drive/v3/files")
                    .bearer_auth(access_token)
                    .query(&[
                        ("q", format!("'{folder_id}' in parents and trashed = false")),
                        ("pageSize", "100".to_string()),
                        ("supportsAllDrives", "true".to_string()),
                        ("includeItemsFromAllDrives", "true".to_string()),
                        ("fields", "nextPageToken,files(id,name,mimeType,size,parents)".to_string()),
                    ]);
                if let Some(token) = &page_token {
                    query = query.query(&[("pageToken", token.clone())]);
                }

                let page: FileListResponse = self.send_with_retry_json(query).await?;
                for file in &page.files {
                    if file.is_folder() {
                        pending.push(file.id.clone());
                    }
                }
                all.extend(page.files);

                page_token = page.next_page_token;
                if page_token.is_none() {
                    break;
                }
            }
        }

        Ok(all)
    }

    pub async fn get_start_page_token(&self, access_token: &str) -> Result<String, DriveError> {
        #[derive(Deserialize)]
        struct Resp {
            #[serde(rename = "startPageToken")]
            start_page_token: String,
        }
        let request = self
            .http
            .get("https://www.googleapis.com/drive/v3/changes/startPageToken")
            .bearer_auth(access_token);
        let resp: Resp = self.send_with_retry_json(request).await?;
        Ok(resp.start_page_token)
    }

    pub async fn download_file(&self, access_token: &str, file_id: &str) -> Result<bytes::Bytes, DriveError> {
        let url = format!("https://www.googleapis.com/drive/v3/files/{file_id}?alt=media");
        let request = self.http.get(url).bearer_auth(access_token);
        self.send_with_retry_bytes(request).await
    }

    async fn send_with_retry_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, DriveError> {
        for attempt in 0..5u32 {
            let Some(clone) = request.try_clone() else {
                return Err(DriveError::OAuth("request body not cloneable for retry".into()));
            };
            let response = clone.send().await?;
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                self.wait_backoff(attempt).await;
                continue;
            }
            return response.error_for_status()?.json::<T>().await.map_err(Into::into);
        }
        Err(DriveError::RateLimitExhausted)
    }

    async fn send_with_retry_bytes(&self, request: reqwest::RequestBuilder) -> Result<bytes::Bytes, DriveError> {
        for attempt in 0..5u32 {
            let Some(clone) = request.try_clone() else {
                return Err(DriveError::OAuth("request body not cloneable for retry".into()));
            };
            let response = clone.send().await?;
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                self.wait_backoff(attempt).await;
                continue;
            }
            return response.error_for_status()?.bytes().await.map_err(Into::into);
        }
        Err(DriveError::RateLimitExhausted)
    }

    async fn wait_backoff(&self, attempt: u32) {
        let base = (2.0 * 2f64.powi(attempt as i32)).min(300.0);
        let jitter = rand::thread_rng().gen_range(-0.3..=0.3);
        let secs = (base * (1.0 + jitter)).max(0.0);
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_token_needs_refresh_inside_five_minute_window() {
        let token = DriveToken {
            access_token: "x".into(),
            refresh_token: "y".into(),
            expires_at: Utc::now() + ChronoDuration::minutes(3),
        };
        assert!(token.needs_refresh());
    }

    #[test]
    fn drive_token_does_not_need_refresh_far_from_expiry() {
        let token = DriveToken {
            access_token: "x".into(),
            refresh_token: "y".into(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        };
        assert!(!token.needs_refresh());
    }

    #[test]
    fn folder_mime_type_is_recognized() {
        let file = DriveFile {
            id: "1".into(),
            name: "models".into(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            size: None,
            parents: None,
        };
        assert!(file.is_folder());
        assert_eq!(file.size_bytes(), 0);
    }
}
