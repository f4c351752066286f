//! ImportSource / ImportRecord / ImportProfile repository (spec.md §4.5, §4.6).

use super::Store;
use crate::error::{DbError, Result};
use crate::models::imports::{
    ImportProfile, ImportProfileShape, ImportRecord, ImportRecordStatus, ImportSource,
    ImportSourceKind, ImportSourceStatus,
};
use latticeflow_core::ids::{ImportProfileId, ImportRecordId, ImportSourceId};

impl Store {
    pub async fn create_import_source(
        &self,
        kind: ImportSourceKind,
        display_name: &str,
        config_json: &str,
        credential_id: Option<&str>,
    ) -> Result<ImportSource> {
        let id = ImportSourceId::new().to_string();
        sqlx::query(
            "INSERT INTO import_sources (id, kind, display_name, config_json, credential_id)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(kind)
        .bind(display_name)
        .bind(config_json)
        .bind(credential_id)
        .execute(self.pool())
        .await?;
        self.get_import_source(&id).await
    }

    pub async fn get_import_source(&self, id: &str) -> Result<ImportSource> {
        sqlx::query_as::<_, ImportSource>("SELECT * FROM import_sources WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DbError::NotFound(format!("import source {id}")))
    }

    pub async fn get_import_record(&self, id: &str) -> Result<ImportRecord> {
        sqlx::query_as::<_, ImportRecord>("SELECT * FROM import_records WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DbError::NotFound(format!("import record {id}")))
    }

    pub async fn list_import_sources(&self) -> Result<Vec<ImportSource>> {
        sqlx::query_as::<_, ImportSource>("SELECT * FROM import_sources ORDER BY created_at")
            .fetch_all(self.pool())
            .await
            .map_err(Into::into)
    }

    /// Spec.md §4.2(b): sources due for a sync, i.e. active and past
    /// `last_sync_at + sync_interval_hours`. The interval is read out of
    /// `config_json` by the caller; this only applies the time gate on
    /// `last_sync_at` the caller supplies per-source via `cutoff`.
    pub async fn is_import_source_due(&self, id: &str, cutoff: chrono::DateTime<chrono::Utc>) -> Result<bool> {
        let source = self.get_import_source(id).await?;
        if source.status != ImportSourceStatus::Active {
            return Ok(false);
        }
        Ok(match source.last_sync_at {
            Some(last) => last < cutoff,
            None => true,
        })
    }

    pub async fn record_import_source_sync(&self, id: &str, cursor: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE import_sources SET last_sync_at = datetime('now'), last_sync_cursor = COALESCE(?, last_sync_cursor), last_error = NULL WHERE id = ?",
        )
        .bind(cursor)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn record_import_source_error(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE import_sources SET status = 'ERROR', last_error = ? WHERE id = ?")
            .bind(error)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn upsert_import_record(
        &self,
        import_source_id: &str,
        upstream_ref: &str,
        title: &str,
        content_fingerprint: Option<&str>,
    ) -> Result<ImportRecord> {
        if let Some(existing) = sqlx::query_as::<_, ImportRecord>(
            "SELECT * FROM import_records WHERE import_source_id = ? AND upstream_ref = ?",
        )
        .bind(import_source_id)
        .bind(upstream_ref)
        .fetch_optional(self.pool())
        .await?
        {
            return Ok(existing);
        }

        let id = ImportRecordId::new().to_string();
        sqlx::query(
            "INSERT INTO import_records (id, import_source_id, upstream_ref, title, content_fingerprint)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(import_source_id)
        .bind(upstream_ref)
        .bind(title)
        .bind(content_fingerprint)
        .execute(self.pool())
        .await?;
        sqlx::query_as::<_, ImportRecord>("SELECT * FROM import_records WHERE id = ?")
            .bind(&id)
            .fetch_one(self.pool())
            .await
            .map_err(Into::into)
    }

    pub async fn set_import_record_status(
        &self,
        id: &str,
        status: ImportRecordStatus,
        design_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE import_records SET status = ?, design_id = COALESCE(?, design_id), updated_at = datetime('now') WHERE id = ?",
        )
        .bind(status)
        .bind(design_id)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn find_import_record_by_fingerprint(
        &self,
        import_source_id: &str,
        fingerprint: &str,
    ) -> Result<Option<ImportRecord>> {
        sqlx::query_as::<_, ImportRecord>(
            "SELECT * FROM import_records WHERE import_source_id = ? AND content_fingerprint = ? AND design_id IS NOT NULL",
        )
        .bind(import_source_id)
        .bind(fingerprint)
        .fetch_optional(self.pool())
        .await
        .map_err(Into::into)
    }

    /// spec.md §4.14 step 3: an ImportRecord whose `design_id` points at a
    /// Design that no longer exists (deleted) goes back to its
    /// not-yet-imported state so a future sync can pick it up again.
    pub async fn reset_orphaned_import_records(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE import_records SET status = 'DISCOVERED', design_id = NULL
             WHERE design_id IS NOT NULL
               AND design_id NOT IN (SELECT id FROM designs)",
        )
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_import_profile(
        &self,
        import_source_id: &str,
        shape: ImportProfileShape,
        sample_size: i64,
        confidence: f64,
    ) -> Result<ImportProfile> {
        let id = ImportProfileId::new().to_string();
        sqlx::query(
            "INSERT INTO import_profiles (id, import_source_id, shape, sample_size, confidence)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(import_source_id)
        .bind(shape)
        .bind(sample_size)
        .bind(confidence)
        .execute(self.pool())
        .await?;
        sqlx::query_as::<_, ImportProfile>("SELECT * FROM import_profiles WHERE id = ?")
            .bind(&id)
            .fetch_one(self.pool())
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_import_record_is_idempotent_on_upstream_ref() {
        let store = Store::open_in_memory().await.unwrap();
        let source = store
            .create_import_source(ImportSourceKind::BulkFolder, "Garage NAS", "{}", None)
            .await
            .unwrap();
        let a = store
            .upsert_import_record(&source.id, "models/goblin", "Goblin", None)
            .await
            .unwrap();
        let b = store
            .upsert_import_record(&source.id, "models/goblin", "Goblin Renamed", None)
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn never_synced_source_is_due() {
        let store = Store::open_in_memory().await.unwrap();
        let source = store
            .create_import_source(ImportSourceKind::BulkFolder, "Garage NAS", "{}", None)
            .await
            .unwrap();
        assert!(store
            .is_import_source_due(&source.id, chrono::Utc::now())
            .await
            .unwrap());
    }
}
