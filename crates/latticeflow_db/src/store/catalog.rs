//! Design / DesignFile / PreviewAsset repository (spec.md §3, §4.9, §4.10).

use super::Store;
use crate::error::{DbError, Result};
use crate::models::catalog::{
    Design, DesignFile, DesignSource, DesignStatus, FileKind, MetadataAuthority, ModelKind,
    Multicolor, PreviewAsset, PreviewKind, PreviewSource,
};
use latticeflow_core::ids::{DesignFileId, DesignId, DesignSourceId, PreviewAssetId};

pub struct NewDesignFile {
    pub relative_path: String,
    pub filename: String,
    pub extension: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub file_kind: FileKind,
    pub model_kind: ModelKind,
    pub is_from_archive: bool,
}

impl Store {
    pub async fn create_design(
        &self,
        title: &str,
        designer: Option<&str>,
        authority: MetadataAuthority,
    ) -> Result<Design> {
        let id = DesignId::new().to_string();
        sqlx::query(
            "INSERT INTO designs (id, title, designer, metadata_authority, status)
             VALUES (?, ?, ?, ?, 'DISCOVERED')",
        )
        .bind(&id)
        .bind(title)
        .bind(designer)
        .bind(authority)
        .execute(self.pool())
        .await?;
        self.get_design(&id).await
    }

    pub async fn get_design(&self, id: &str) -> Result<Design> {
        sqlx::query_as::<_, Design>("SELECT * FROM designs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DbError::NotFound(format!("design {id}")))
    }

    pub async fn set_design_status(&self, id: &str, status: DesignStatus) -> Result<()> {
        sqlx::query("UPDATE designs SET status = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn add_design_source(
        &self,
        design_id: &str,
        message_id: Option<&str>,
        import_record_id: Option<&str>,
        is_preferred: bool,
    ) -> Result<DesignSource> {
        let id = DesignSourceId::new().to_string();
        let rank: i64 = sqlx::query_scalar("SELECT count(*) FROM design_sources WHERE design_id = ?")
            .bind(design_id)
            .fetch_one(self.pool())
            .await?;
        sqlx::query(
            "INSERT INTO design_sources (id, design_id, message_id, import_record_id, rank, is_preferred)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(design_id)
        .bind(message_id)
        .bind(import_record_id)
        .bind(rank)
        .bind(is_preferred)
        .execute(self.pool())
        .await?;
        sqlx::query_as::<_, DesignSource>("SELECT * FROM design_sources WHERE id = ?")
            .bind(&id)
            .fetch_one(self.pool())
            .await
            .map_err(Into::into)
    }

    pub async fn add_design_file(&self, design_id: &str, file: NewDesignFile) -> Result<DesignFile> {
        let id = DesignFileId::new().to_string();
        sqlx::query(
            "INSERT INTO design_files
                (id, design_id, relative_path, filename, extension, size_bytes, sha256, file_kind, model_kind, is_from_archive)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(design_id)
        .bind(&file.relative_path)
        .bind(&file.filename)
        .bind(&file.extension)
        .bind(file.size_bytes)
        .bind(&file.sha256)
        .bind(file.file_kind)
        .bind(file.model_kind)
        .bind(file.is_from_archive)
        .execute(self.pool())
        .await?;

        sqlx::query(
            "UPDATE designs SET total_bytes = total_bytes + ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(file.size_bytes)
        .bind(design_id)
        .execute(self.pool())
        .await?;

        sqlx::query_as::<_, DesignFile>("SELECT * FROM design_files WHERE id = ?")
            .bind(&id)
            .fetch_one(self.pool())
            .await
            .map_err(Into::into)
    }

    pub async fn list_design_files(&self, design_id: &str) -> Result<Vec<DesignFile>> {
        sqlx::query_as::<_, DesignFile>(
            "SELECT * FROM design_files WHERE design_id = ? ORDER BY relative_path",
        )
        .bind(design_id)
        .fetch_all(self.pool())
        .await
        .map_err(Into::into)
    }

    /// Updates a `DesignFile`'s placement after the Library Importer
    /// moves it out of staging (spec.md §4.9).
    pub async fn set_design_file_placement(
        &self,
        id: &str,
        relative_path: &str,
        filename: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE design_files SET relative_path = ?, filename = ? WHERE id = ?")
            .bind(relative_path)
            .bind(filename)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn list_design_sources(&self, design_id: &str) -> Result<Vec<DesignSource>> {
        sqlx::query_as::<_, DesignSource>(
            "SELECT * FROM design_sources WHERE design_id = ? ORDER BY rank",
        )
        .bind(design_id)
        .fetch_all(self.pool())
        .await
        .map_err(Into::into)
    }

    /// spec.md §4.8 invariant 8: re-points every `source`'s DesignSource
    /// rows onto `target` (continuing `target`'s rank sequence) and
    /// deletes `source`. `target`'s own sources are left untouched.
    pub async fn merge_designs(&self, source_id: &str, target_id: &str) -> Result<()> {
        let mut next_rank: i64 = sqlx::query_scalar("SELECT count(*) FROM design_sources WHERE design_id = ?")
            .bind(target_id)
            .fetch_one(self.pool())
            .await?;
        let moved = self.list_design_sources(source_id).await?;
        for source in moved {
            sqlx::query("UPDATE design_sources SET design_id = ?, rank = ? WHERE id = ?")
                .bind(target_id)
                .bind(next_rank)
                .bind(&source.id)
                .execute(self.pool())
                .await?;
            next_rank += 1;
        }
        sqlx::query("DELETE FROM designs WHERE id = ?")
            .bind(source_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_design_multicolor(&self, design_id: &str, multicolor: Multicolor) -> Result<()> {
        sqlx::query(
            "UPDATE designs SET multicolor = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(multicolor)
        .bind(design_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn add_preview_asset(
        &self,
        design_id: &str,
        source: PreviewSource,
        kind: PreviewKind,
        path: &str,
        size_bytes: i64,
        width: Option<i64>,
        height: Option<i64>,
    ) -> Result<PreviewAsset> {
        self.add_preview_asset_with_upstream_id(design_id, source, kind, path, size_bytes, width, height, None)
            .await
    }

    /// Same as `add_preview_asset`, but records the upstream chat-platform
    /// file id so `DOWNLOAD_TELEGRAM_IMAGES` can dedupe across re-runs.
    pub async fn add_preview_asset_with_upstream_id(
        &self,
        design_id: &str,
        source: PreviewSource,
        kind: PreviewKind,
        path: &str,
        size_bytes: i64,
        width: Option<i64>,
        height: Option<i64>,
        upstream_file_id: Option<&str>,
    ) -> Result<PreviewAsset> {
        let id = PreviewAssetId::new().to_string();
        let sort_order: i64 =
            sqlx::query_scalar("SELECT count(*) FROM preview_assets WHERE design_id = ?")
                .bind(design_id)
                .fetch_one(self.pool())
                .await?;
        sqlx::query(
            "INSERT INTO preview_assets
                (id, design_id, source, kind, path, size_bytes, width, height, upstream_file_id, sort_order)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(design_id)
        .bind(source)
        .bind(kind)
        .bind(path)
        .bind(size_bytes)
        .bind(width)
        .bind(height)
        .bind(upstream_file_id)
        .bind(sort_order)
        .execute(self.pool())
        .await?;
        sqlx::query_as::<_, PreviewAsset>("SELECT * FROM preview_assets WHERE id = ?")
            .bind(&id)
            .fetch_one(self.pool())
            .await
            .map_err(Into::into)
    }

    /// spec.md §4.10: `DOWNLOAD_TELEGRAM_IMAGES` dedupes by upstream file id.
    pub async fn preview_asset_exists_for_upstream_id(
        &self,
        design_id: &str,
        upstream_file_id: &str,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM preview_assets WHERE design_id = ? AND upstream_file_id = ?",
        )
        .bind(design_id)
        .bind(upstream_file_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count > 0)
    }

    pub async fn list_preview_assets(&self, design_id: &str) -> Result<Vec<PreviewAsset>> {
        sqlx::query_as::<_, PreviewAsset>(
            "SELECT * FROM preview_assets WHERE design_id = ? ORDER BY sort_order",
        )
        .bind(design_id)
        .fetch_all(self.pool())
        .await
        .map_err(Into::into)
    }

    /// Picks the lowest-`priority()` asset as primary (spec.md §4.10),
    /// clearing `is_primary` on every sibling first.
    pub async fn auto_select_primary_preview(&self, design_id: &str) -> Result<Option<PreviewAsset>> {
        let assets = self.list_preview_assets(design_id).await?;
        let best = assets.into_iter().min_by_key(|a| a.source.priority());
        let Some(best) = best else { return Ok(None) };

        sqlx::query("UPDATE preview_assets SET is_primary = 0 WHERE design_id = ?")
            .bind(design_id)
            .execute(self.pool())
            .await?;
        sqlx::query("UPDATE preview_assets SET is_primary = 1 WHERE id = ?")
            .bind(&best.id)
            .execute(self.pool())
            .await?;

        sqlx::query_as::<_, PreviewAsset>("SELECT * FROM preview_assets WHERE id = ?")
            .bind(&best.id)
            .fetch_one(self.pool())
            .await
            .map(Some)
            .map_err(Into::into)
    }

    /// Explicit primary override, used by `AI_ANALYZE` when the model
    /// picks a `best_preview_index` different from the priority-based
    /// default (spec.md §4.13).
    pub async fn set_primary_preview(&self, design_id: &str, preview_asset_id: &str) -> Result<()> {
        sqlx::query("UPDATE preview_assets SET is_primary = 0 WHERE design_id = ?")
            .bind(design_id)
            .execute(self.pool())
            .await?;
        sqlx::query("UPDATE preview_assets SET is_primary = 1 WHERE id = ?")
            .bind(preview_asset_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// spec.md §4.14 step 4: the set of live design ids, used to decide
    /// which staging directories are orphaned.
    pub async fn list_design_ids(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT id FROM designs")
            .fetch_all(self.pool())
            .await
            .map_err(Into::into)
    }

    pub async fn list_designs_by_status(&self, status: DesignStatus) -> Result<Vec<Design>> {
        sqlx::query_as::<_, Design>("SELECT * FROM designs WHERE status = ? ORDER BY created_at")
            .bind(status)
            .fetch_all(self.pool())
            .await
            .map_err(Into::into)
    }

    /// `/stats/dashboard`: design counts grouped by status.
    pub async fn count_designs_by_status(&self) -> Result<Vec<(DesignStatus, i64)>> {
        sqlx::query_as("SELECT status, count(*) FROM designs GROUP BY status")
            .fetch_all(self.pool())
            .await
            .map_err(Into::into)
    }

    /// `/stats/dashboard/calendar`: designs discovered per day, most recent first.
    pub async fn designs_discovered_per_day(&self, days: i64) -> Result<Vec<(String, i64)>> {
        sqlx::query_as(
            "SELECT date(created_at) AS day, count(*) FROM designs
             WHERE created_at >= datetime('now', ? || ' days')
             GROUP BY day ORDER BY day DESC",
        )
        .bind(-days)
        .fetch_all(self.pool())
        .await
        .map_err(Into::into)
    }

    /// `/stats/dashboard/storage`: total bytes across every tracked design.
    pub async fn total_library_bytes(&self) -> Result<i64> {
        let total: Option<i64> = sqlx::query_scalar("SELECT sum(total_bytes) FROM designs")
            .fetch_one(self.pool())
            .await?;
        Ok(total.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_design_round_trips() {
        let store = Store::open_in_memory().await.unwrap();
        let design = store
            .create_design("Cool Goblin", None, MetadataAuthority::System)
            .await
            .unwrap();
        assert_eq!(design.status, DesignStatus::Discovered);

        let fetched = store.get_design(&design.id).await.unwrap();
        assert_eq!(fetched.title, "Cool Goblin");
    }

    #[tokio::test]
    async fn adding_a_file_accumulates_total_bytes() {
        let store = Store::open_in_memory().await.unwrap();
        let design = store
            .create_design("Cool Goblin", None, MetadataAuthority::System)
            .await
            .unwrap();
        store
            .add_design_file(
                &design.id,
                NewDesignFile {
                    relative_path: "goblin.stl".into(),
                    filename: "goblin.stl".into(),
                    extension: "stl".into(),
                    size_bytes: 2_097_152,
                    sha256: "deadbeef".into(),
                    file_kind: FileKind::Model,
                    model_kind: ModelKind::Stl,
                    is_from_archive: true,
                },
            )
            .await
            .unwrap();

        let refreshed = store.get_design(&design.id).await.unwrap();
        assert_eq!(refreshed.total_bytes, 2_097_152);
    }

    #[tokio::test]
    async fn auto_select_primary_prefers_rendered_over_telegram() {
        let store = Store::open_in_memory().await.unwrap();
        let design = store
            .create_design("Cool Goblin", None, MetadataAuthority::System)
            .await
            .unwrap();
        store
            .add_preview_asset(&design.id, PreviewSource::Telegram, PreviewKind::Thumbnail, "a.jpg", 10, None, None)
            .await
            .unwrap();
        let rendered = store
            .add_preview_asset(&design.id, PreviewSource::Rendered, PreviewKind::Full, "b.png", 20, Some(512), Some(512))
            .await
            .unwrap();

        let primary = store
            .auto_select_primary_preview(&design.id)
            .await
            .unwrap()
            .expect("a primary asset");
        assert_eq!(primary.id, rendered.id);
        assert!(primary.is_primary);
    }

    #[tokio::test]
    async fn merge_designs_unions_sources_and_deletes_the_source_design() {
        let store = Store::open_in_memory().await.unwrap();
        let target = store.create_design("Cool Goblin", None, MetadataAuthority::System).await.unwrap();
        let source = store.create_design("Cool Goblin (dup)", None, MetadataAuthority::System).await.unwrap();
        store.add_design_source(&target.id, None, Some("import-a"), true).await.unwrap();
        store.add_design_source(&source.id, None, Some("import-b"), true).await.unwrap();

        store.merge_designs(&source.id, &target.id).await.unwrap();

        let sources = store.list_design_sources(&target.id).await.unwrap();
        assert_eq!(sources.len(), 2);
        assert!(store.get_design(&source.id).await.is_err());
    }
}
