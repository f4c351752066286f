//! DuplicateCandidate / DiscoveredChannel / Setting / Credential
//! (spec.md §3, §4.8, §4.11, §4.14).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DuplicateCandidateStatus {
    Pending,
    Confirmed,
    Dismissed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    pub id: String,
    pub design_id: String,
    pub other_design_id: String,
    /// 0.0–1.0 similarity score, see spec.md §4.8.
    pub similarity: f64,
    pub status: DuplicateCandidateStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveredChannelStatus {
    New,
    Reviewed,
    Subscribed,
    Ignored,
}

/// spec.md §4.11: how a DiscoveredChannel first surfaced. A channel can
/// be hit by more than one route, hence the set on the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoverySourceType {
    Forward,
    CaptionLink,
    Mention,
    TextLink,
}

/// spec.md §6 `/discovered-channels` list: sort key, always descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveredChannelSort {
    ReferenceCount,
    LastSeen,
    FirstSeen,
}

impl Default for DiscoveredChannelSort {
    fn default() -> Self {
        DiscoveredChannelSort::ReferenceCount
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DiscoveredChannel {
    pub id: String,
    pub peer_id: String,
    pub title: String,
    pub member_count: Option<i64>,
    pub sample_message_count: i64,
    pub design_like_message_count: i64,
    pub reference_count: i64,
    /// JSON array of `DiscoverySourceType` values observed so far.
    pub source_types_json: String,
    pub status: DiscoveredChannelStatus,
    pub discovered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl DiscoveredChannel {
    /// Spec §4.11 heuristic: fraction of sampled messages that look like
    /// design posts, used to rank discovery results.
    pub fn design_density(&self) -> f64 {
        if self.sample_message_count == 0 {
            0.0
        } else {
            self.design_like_message_count as f64 / self.sample_message_count as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalPlatform {
    Thangs,
    Printables,
    Thingiverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchMethod {
    Link,
    Fuzzy,
}

/// spec.md §4.11: one row per (design, platform, external id), created
/// from a detected URL and optionally enriched by a metadata fetch.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExternalMetadataSource {
    pub id: String,
    pub design_id: String,
    pub platform: ExternalPlatform,
    pub external_id: String,
    pub url: String,
    pub confidence: f64,
    pub match_method: MatchMethod,
    pub fetched_title: Option<String>,
    pub fetched_designer: Option<String>,
    /// JSON array of fetched tag strings, if a metadata fetch populated them.
    pub fetched_tags_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value_json: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialKind {
    TelegramSession,
    GoogleDriveOauth,
    ForumSession,
}

/// The `sealed_secret` column holds a `CredentialCipher::seal` output,
/// never plaintext. See `latticeflow_security::credentials`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub kind: CredentialKind,
    pub sealed_secret: String,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn design_density_handles_zero_samples() {
        let ch = DiscoveredChannel {
            id: "d".into(),
            peer_id: "p".into(),
            title: "t".into(),
            member_count: None,
            sample_message_count: 0,
            design_like_message_count: 0,
            reference_count: 1,
            source_types_json: "[]".into(),
            status: DiscoveredChannelStatus::New,
            discovered_at: Utc::now(),
            last_seen_at: Utc::now(),
        };
        assert_eq!(ch.design_density(), 0.0);
    }

    #[test]
    fn design_density_computes_ratio() {
        let ch = DiscoveredChannel {
            id: "d".into(),
            peer_id: "p".into(),
            title: "t".into(),
            member_count: None,
            sample_message_count: 20,
            design_like_message_count: 5,
            reference_count: 1,
            source_types_json: "[]".into(),
            status: DiscoveredChannelStatus::New,
            discovered_at: Utc::now(),
            last_seen_at: Utc::now(),
        };
        assert_eq!(ch.design_density(), 0.25);
    }
}
