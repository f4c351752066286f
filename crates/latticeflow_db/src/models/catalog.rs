//! Design / DesignSource / DesignFile / PreviewAsset (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DesignStatus {
    Discovered,
    Wanted,
    Downloading,
    Downloaded,
    Extracting,
    Extracted,
    Importing,
    Organized,
    Failed,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetadataAuthority {
    System,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum Multicolor {
    Unknown,
    Yes,
    No,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Design {
    pub id: String,
    pub title: String,
    pub designer: Option<String>,
    pub metadata_authority: MetadataAuthority,
    pub status: DesignStatus,
    pub total_bytes: i64,
    pub primary_file_types: String, // JSON array of extensions
    pub multicolor: Multicolor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DesignSource {
    pub id: String,
    pub design_id: String,
    pub message_id: Option<String>,
    pub import_record_id: Option<String>,
    pub rank: i64,
    pub is_preferred: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum FileKind {
    Model,
    Archive,
    Image,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelKind {
    Stl,
    ThreeMf,
    Obj,
    Step,
    Unknown,
}

impl ModelKind {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "stl" => ModelKind::Stl,
            "3mf" => ModelKind::ThreeMf,
            "obj" => ModelKind::Obj,
            "step" | "stp" => ModelKind::Step,
            _ => ModelKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DesignFile {
    pub id: String,
    pub design_id: String,
    pub relative_path: String,
    pub filename: String,
    pub extension: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub file_kind: FileKind,
    pub model_kind: ModelKind,
    pub is_from_archive: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum PreviewSource {
    Telegram,
    Thangs,
    Archive,
    Embedded3mf,
    Rendered,
}

impl PreviewSource {
    /// Lower-is-better priority for `auto_select_primary` (spec.md §4.10).
    pub fn priority(self) -> u8 {
        match self {
            PreviewSource::Rendered => 1,
            PreviewSource::Embedded3mf => 2,
            PreviewSource::Archive => 3,
            PreviewSource::Thangs => 4,
            PreviewSource::Telegram => 5,
        }
    }

    /// Lower-is-better priority for AI-analysis preview selection
    /// (spec.md §4.13). Inverted from `priority()`: the tagger wants
    /// creator-provided photos of the actual printed object over our
    /// own renders, which can show an untextured/unpainted model.
    pub fn ai_priority(self) -> u8 {
        match self {
            PreviewSource::Telegram => 1,
            PreviewSource::Thangs => 2,
            PreviewSource::Archive => 3,
            PreviewSource::Embedded3mf => 4,
            PreviewSource::Rendered => 5,
        }
    }

    pub fn storage_dirname(self) -> &'static str {
        match self {
            PreviewSource::Telegram => "telegram",
            PreviewSource::Thangs => "thangs",
            PreviewSource::Archive => "archive",
            PreviewSource::Embedded3mf => "embedded",
            PreviewSource::Rendered => "rendered",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum PreviewKind {
    Thumbnail,
    Full,
    Gallery,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PreviewAsset {
    pub id: String,
    pub design_id: String,
    pub source: PreviewSource,
    pub kind: PreviewKind,
    pub path: String,
    pub size_bytes: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub upstream_file_id: Option<String>,
    pub is_primary: bool,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_priority_prefers_rendered() {
        assert!(PreviewSource::Rendered.priority() < PreviewSource::Telegram.priority());
        assert!(PreviewSource::Embedded3mf.priority() < PreviewSource::Archive.priority());
    }

    #[test]
    fn model_kind_classification_is_case_insensitive() {
        assert_eq!(ModelKind::from_extension("STL"), ModelKind::Stl);
        assert_eq!(ModelKind::from_extension("3mf"), ModelKind::ThreeMf);
        assert_eq!(ModelKind::from_extension("png"), ModelKind::Unknown);
    }
}
