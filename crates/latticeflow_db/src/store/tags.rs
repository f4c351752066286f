//! Tag repository (spec.md §4.11, §4.13).

use super::Store;
use crate::error::Result;
use crate::models::tags::{Tag, TagSource};
use latticeflow_core::ids::TagId;

impl Store {
    /// Idempotent on (design_id, value); re-tagging with the same value
    /// is a no-op rather than an error.
    pub async fn add_tag(&self, design_id: &str, value: &str, source: TagSource) -> Result<Tag> {
        if let Some(existing) =
            sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE design_id = ? AND value = ?")
                .bind(design_id)
                .bind(value)
                .fetch_optional(self.pool())
                .await?
        {
            return Ok(existing);
        }

        let id = TagId::new().to_string();
        sqlx::query("INSERT INTO tags (id, design_id, value, source) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(design_id)
            .bind(value)
            .bind(source)
            .execute(self.pool())
            .await?;
        sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE id = ?")
            .bind(&id)
            .fetch_one(self.pool())
            .await
            .map_err(Into::into)
    }

    pub async fn list_tags(&self, design_id: &str) -> Result<Vec<Tag>> {
        sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE design_id = ? ORDER BY created_at")
            .bind(design_id)
            .fetch_all(self.pool())
            .await
            .map_err(Into::into)
    }

    pub async fn has_tags_from_source(&self, design_id: &str, source: TagSource) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM tags WHERE design_id = ? AND source = ?")
            .bind(design_id)
            .bind(source)
            .fetch_one(self.pool())
            .await?;
        Ok(count > 0)
    }

    /// Most frequently used tag values across the whole catalog, used as
    /// vocabulary hints in the AI tagging prompt (spec.md §4.13).
    pub async fn list_top_tags(&self, limit: i64) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT value FROM tags GROUP BY value ORDER BY count(*) DESC, value LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::MetadataAuthority;

    #[tokio::test]
    async fn adding_the_same_tag_twice_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        let design = store.create_design("Goblin", None, MetadataAuthority::System).await.unwrap();
        let a = store.add_tag(&design.id, "miniature", TagSource::AutoAi).await.unwrap();
        let b = store.add_tag(&design.id, "miniature", TagSource::AutoAi).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.list_tags(&design.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn has_tags_from_source_detects_prior_ai_tagging() {
        let store = Store::open_in_memory().await.unwrap();
        let design = store.create_design("Goblin", None, MetadataAuthority::System).await.unwrap();
        assert!(!store.has_tags_from_source(&design.id, TagSource::AutoAi).await.unwrap());
        store.add_tag(&design.id, "fantasy", TagSource::AutoAi).await.unwrap();
        assert!(store.has_tags_from_source(&design.id, TagSource::AutoAi).await.unwrap());
    }
}
