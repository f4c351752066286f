//! Duplicate candidate repository (spec.md §4.8).

use super::Store;
use crate::error::Result;
use crate::models::misc::{DuplicateCandidate, DuplicateCandidateStatus};
use latticeflow_core::ids::DuplicateCandidateId;

impl Store {
    pub async fn record_duplicate_candidate(
        &self,
        design_id: &str,
        other_design_id: &str,
        similarity: f64,
    ) -> Result<DuplicateCandidate> {
        let id = DuplicateCandidateId::new().to_string();
        sqlx::query(
            "INSERT INTO duplicate_candidates (id, design_id, other_design_id, similarity)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(design_id)
        .bind(other_design_id)
        .bind(similarity)
        .execute(self.pool())
        .await?;
        sqlx::query_as::<_, DuplicateCandidate>("SELECT * FROM duplicate_candidates WHERE id = ?")
            .bind(&id)
            .fetch_one(self.pool())
            .await
            .map_err(Into::into)
    }

    pub async fn list_pending_duplicate_candidates(&self) -> Result<Vec<DuplicateCandidate>> {
        sqlx::query_as::<_, DuplicateCandidate>(
            "SELECT * FROM duplicate_candidates WHERE status = 'PENDING' ORDER BY similarity DESC",
        )
        .fetch_all(self.pool())
        .await
        .map_err(Into::into)
    }

    pub async fn resolve_duplicate_candidate(
        &self,
        id: &str,
        status: DuplicateCandidateStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE duplicate_candidates SET status = ?, resolved_at = datetime('now') WHERE id = ?",
        )
        .bind(status)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_candidates_are_ranked_by_similarity() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .record_duplicate_candidate("a", "b", 0.6)
            .await
            .unwrap();
        store
            .record_duplicate_candidate("a", "c", 0.95)
            .await
            .unwrap();

        let pending = store.list_pending_duplicate_candidates().await.unwrap();
        assert_eq!(pending[0].other_design_id, "c");
    }
}
