//! phpBB forum scanner (spec.md §4.12): login via form post, CSRF token
//! discovery, paginated topic listing, and attachment size parsing.
//!
//! `scraper` + a cookie-jar `reqwest::Client` are pack-level enrichment
//! (see DESIGN.md) — the teacher carries neither.

use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForumError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("login failed: {0}")]
    LoginFailed(String),
    #[error("could not parse page: {0}")]
    ParseFailed(String),
}

pub struct ForumClient {
    http: Client,
    base_url: String,
}

pub struct ForumTopic {
    pub id: String,
    pub title: String,
    pub url: String,
}

pub struct ForumAttachment {
    pub filename: String,
    pub size_bytes: u64,
    pub url: String,
}

impl ForumClient {
    pub fn new(base_url: impl Into<String>, jar: Arc<reqwest::cookie::Jar>) -> Result<Self, ForumError> {
        let http = Client::builder().cookie_provider(jar).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Logs in with a form POST; the CSRF token is scraped from the
    /// login form's hidden `sid` field first. A post-login session is
    /// confirmed by the presence of a logout link on the control panel.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ForumError> {
        let login_page = self
            .http
            .get(format!("{}/ucp.php?mode=login", self.base_url))
            .send()
            .await?
            .text()
            .await?;

        let sid = extract_hidden_field(&login_page, "sid")
            .ok_or_else(|| ForumError::LoginFailed("csrf token not found".into()))?;

        let response = self
            .http
            .post(format!("{}/ucp.php?mode=login", self.base_url))
            .form(&[
                ("username", username),
                ("password", password),
                ("sid", sid.as_str()),
                ("login", "Login"),
            ])
            .send()
            .await?;

        let body = response.text().await?;
        if !has_logout_link(&body) {
            return Err(ForumError::LoginFailed("no logout link after submit".into()));
        }
        Ok(())
    }

    pub async fn is_session_valid(&self) -> Result<bool, ForumError> {
        let body = self
            .http
            .get(format!("{}/ucp.php", self.base_url))
            .send()
            .await?
            .text()
            .await?;
        Ok(has_logout_link(&body))
    }

    pub async fn list_topics(&self, board_id: &str, page: u32) -> Result<Vec<ForumTopic>, ForumError> {
        let start = page * 25;
        let body = self
            .http
            .get(format!("{}/viewforum.php?f={board_id}&start={start}", self.base_url))
            .send()
            .await?
            .text()
            .await?;
        Ok(parse_topics(&body))
    }

    pub async fn topic_attachments(&self, topic_url: &str) -> Result<Vec<ForumAttachment>, ForumError> {
        let body = self.http.get(topic_url).send().await?.text().await?;
        Ok(parse_attachments(&body))
    }
}

fn extract_hidden_field(html: &str, name: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(&format!(r#"input[name="{name}"]"#)).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("value"))
        .map(String::from)
}

fn has_logout_link(html: &str) -> bool {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"a[href*="mode=logout"]"#).unwrap();
    document.select(&selector).next().is_some()
}

fn parse_topics(html: &str) -> Vec<ForumTopic> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a.topictitle") else { return Vec::new() };
    document
        .select(&selector)
        .filter_map(|el| {
            let href = el.value().attr("href")?;
            let id = topic_id_pattern().captures(href)?.name("id")?.as_str().to_string();
            Some(ForumTopic {
                id,
                title: el.text().collect::<String>().trim().to_string(),
                url: href.to_string(),
            })
        })
        .collect()
}

fn topic_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"t=(?P<id>\d+)").unwrap())
}

fn parse_attachments(html: &str) -> Vec<ForumAttachment> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a.postlink, dl.file dt a") else { return Vec::new() };
    document
        .select(&selector)
        .filter_map(|el| {
            let href = el.value().attr("href")?;
            if !href.contains("mode=view") {
                return None;
            }
            let filename = el.text().collect::<String>().trim().to_string();
            let parent_text = el
                .parent()
                .map(|p| scraper::ElementRef::wrap(p).map(|e| e.text().collect::<String>()).unwrap_or_default())
                .unwrap_or_default();
            let size_bytes = parse_human_size(&parent_text).unwrap_or(0);
            Some(ForumAttachment {
                filename,
                size_bytes,
                url: href.to_string(),
            })
        })
        .collect()
}

fn human_size_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?P<value>[\d.]+)\s*(?P<unit>KiB|MiB|GiB|KB|MB|GB)").unwrap())
}

/// Parses sizes like `"35.68 MiB"` into bytes.
pub fn parse_human_size(text: &str) -> Option<u64> {
    let caps = human_size_pattern().captures(text)?;
    let value: f64 = caps["value"].parse().ok()?;
    let multiplier = match &caps["unit"] {
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "KB" => 1000.0,
        "MB" => 1_000_000.0,
        "GB" => 1_000_000_000.0,
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mebibyte_sizes() {
        assert_eq!(parse_human_size("Attachment: goblin.zip (35.68 MiB)"), Some(37_413_191));
    }

    #[test]
    fn parses_kilobyte_sizes() {
        assert_eq!(parse_human_size("500 KB"), Some(500_000));
    }

    #[test]
    fn detects_logout_link() {
        let html = r#"<html><body><a href="ucp.php?mode=logout&sid=abc">Logout</a></body></html>"#;
        assert!(has_logout_link(html));
        assert!(!has_logout_link("<html><body>nothing</body></html>"));
    }

    #[test]
    fn parses_topic_titles_and_ids() {
        let html = r#"<html><body><a class="topictitle" href="viewtopic.php?t=42">Cool Goblin</a></body></html>"#;
        let topics = parse_topics(html);
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].id, "42");
        assert_eq!(topics[0].title, "Cool Goblin");
    }
}
