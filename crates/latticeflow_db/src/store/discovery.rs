//! Discovered-channel repository (spec.md §4.11 second half, §6).

use super::Store;
use crate::error::Result;
use crate::models::misc::{
    DiscoveredChannel, DiscoveredChannelSort, DiscoveredChannelStatus, DiscoverySourceType,
};
use latticeflow_core::ids::DiscoveredChannelId;

impl Store {
    /// spec.md §4.11: a hit for a peer that isn't already a monitored
    /// Channel either creates a new row (`reference_count=1`) or bumps an
    /// existing one's `reference_count` and unions in `source_type`.
    pub async fn upsert_discovered_channel(
        &self,
        peer_id: &str,
        title: &str,
        member_count: Option<i64>,
        source_type: DiscoverySourceType,
    ) -> Result<DiscoveredChannel> {
        if let Some(existing) = sqlx::query_as::<_, DiscoveredChannel>(
            "SELECT * FROM discovered_channels WHERE peer_id = ?",
        )
        .bind(peer_id)
        .fetch_optional(self.pool())
        .await?
        {
            let mut types: Vec<DiscoverySourceType> =
                serde_json::from_str(&existing.source_types_json).unwrap_or_default();
            if !types.contains(&source_type) {
                types.push(source_type);
            }
            let types_json = serde_json::to_string(&types).unwrap_or_else(|_| "[]".to_string());
            sqlx::query(
                "UPDATE discovered_channels
                    SET reference_count = reference_count + 1, source_types_json = ?,
                        last_seen_at = datetime('now')
                 WHERE id = ?",
            )
            .bind(&types_json)
            .bind(&existing.id)
            .execute(self.pool())
            .await?;
            return self.get_discovered_channel(&existing.id).await;
        }

        let id = DiscoveredChannelId::new().to_string();
        let types_json = serde_json::to_string(&[source_type]).unwrap_or_else(|_| "[]".to_string());
        sqlx::query(
            "INSERT INTO discovered_channels
                (id, peer_id, title, member_count, reference_count, source_types_json)
             VALUES (?, ?, ?, ?, 1, ?)",
        )
        .bind(&id)
        .bind(peer_id)
        .bind(title)
        .bind(member_count)
        .bind(&types_json)
        .execute(self.pool())
        .await?;
        self.get_discovered_channel(&id).await
    }

    pub async fn get_discovered_channel(&self, id: &str) -> Result<DiscoveredChannel> {
        sqlx::query_as::<_, DiscoveredChannel>("SELECT * FROM discovered_channels WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| crate::error::DbError::NotFound(format!("discovered channel {id}")))
    }

    pub async fn list_discovered_channels(&self, status: Option<DiscoveredChannelStatus>) -> Result<Vec<DiscoveredChannel>> {
        match status {
            Some(status) => sqlx::query_as::<_, DiscoveredChannel>(
                "SELECT * FROM discovered_channels WHERE status = ? ORDER BY discovered_at DESC",
            )
            .bind(status)
            .fetch_all(self.pool())
            .await
            .map_err(Into::into),
            None => sqlx::query_as::<_, DiscoveredChannel>(
                "SELECT * FROM discovered_channels ORDER BY discovered_at DESC",
            )
            .fetch_all(self.pool())
            .await
            .map_err(Into::into),
        }
    }

    /// spec.md §6 `/discovered-channels`: paginated, sorted by one of
    /// `reference_count`, `last_seen`, or `first_seen` (default), each
    /// descending so the most interesting rows come first.
    pub async fn list_discovered_channels_page(
        &self,
        sort: DiscoveredChannelSort,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DiscoveredChannel>> {
        let column = match sort {
            DiscoveredChannelSort::ReferenceCount => "reference_count",
            DiscoveredChannelSort::LastSeen => "last_seen_at",
            DiscoveredChannelSort::FirstSeen => "discovered_at",
        };
        let sql = format!(
            "SELECT * FROM discovered_channels ORDER BY {column} DESC LIMIT ? OFFSET ?"
        );
        sqlx::query_as::<_, DiscoveredChannel>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .map_err(Into::into)
    }

    pub async fn count_discovered_channels(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT count(*) FROM discovered_channels")
            .fetch_one(self.pool())
            .await
            .map_err(Into::into)
    }

    /// spec.md §6 `/discovered-channels` add: promotes a discovered peer
    /// straight to a monitored `Channel` and drops the discovery row, the
    /// same terminal state a user manually subscribing would reach.
    pub async fn promote_discovered_channel(
        &self,
        id: &str,
        download_mode: crate::models::ingest::DownloadMode,
    ) -> Result<crate::models::ingest::Channel> {
        let discovered = self.get_discovered_channel(id).await?;
        let channel = self
            .upsert_channel(&discovered.peer_id, &discovered.title, None)
            .await?;
        self.set_channel_download_mode(&channel.id, download_mode).await?;
        self.delete_discovered_channel(id).await?;
        self.get_channel(&channel.id).await
    }

    pub async fn set_discovered_channel_status(&self, id: &str, status: DiscoveredChannelStatus) -> Result<()> {
        sqlx::query("UPDATE discovered_channels SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn delete_discovered_channel(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM discovered_channels WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// spec.md §4.11: create-or-update an `ExternalMetadataSource` for a
    /// detected (platform, external_id) hit on a Design.
    pub async fn upsert_external_metadata_source(
        &self,
        design_id: &str,
        platform: crate::models::misc::ExternalPlatform,
        external_id: &str,
        url: &str,
        confidence: f64,
        match_method: crate::models::misc::MatchMethod,
    ) -> Result<crate::models::misc::ExternalMetadataSource> {
        if let Some(existing) = sqlx::query_as::<_, crate::models::misc::ExternalMetadataSource>(
            "SELECT * FROM external_metadata_sources WHERE design_id = ? AND platform = ? AND external_id = ?",
        )
        .bind(design_id)
        .bind(platform)
        .bind(external_id)
        .fetch_optional(self.pool())
        .await?
        {
            return Ok(existing);
        }

        let id = latticeflow_core::ids::ExternalMetadataSourceId::new().to_string();
        sqlx::query(
            "INSERT INTO external_metadata_sources
                (id, design_id, platform, external_id, url, confidence, match_method)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(design_id)
        .bind(platform)
        .bind(external_id)
        .bind(url)
        .bind(confidence)
        .bind(match_method)
        .execute(self.pool())
        .await?;
        sqlx::query_as::<_, crate::models::misc::ExternalMetadataSource>(
            "SELECT * FROM external_metadata_sources WHERE id = ?",
        )
        .bind(&id)
        .fetch_one(self.pool())
        .await
        .map_err(Into::into)
    }

    pub async fn list_external_metadata_sources(
        &self,
        design_id: &str,
    ) -> Result<Vec<crate::models::misc::ExternalMetadataSource>> {
        sqlx::query_as::<_, crate::models::misc::ExternalMetadataSource>(
            "SELECT * FROM external_metadata_sources WHERE design_id = ? ORDER BY created_at",
        )
        .bind(design_id)
        .fetch_all(self.pool())
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_is_idempotent_on_peer_id() {
        let store = Store::open_in_memory().await.unwrap();
        let a = store
            .upsert_discovered_channel("peer-9", "3D Finds", Some(500), DiscoverySourceType::Mention)
            .await
            .unwrap();
        let b = store
            .upsert_discovered_channel("peer-9", "3D Finds Renamed", Some(600), DiscoverySourceType::CaptionLink)
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.reference_count, 2);
        let types: Vec<DiscoverySourceType> = serde_json::from_str(&b.source_types_json).unwrap();
        assert_eq!(types.len(), 2);
    }

    #[tokio::test]
    async fn promote_creates_channel_and_drops_discovery_row() {
        let store = Store::open_in_memory().await.unwrap();
        let discovered = store
            .upsert_discovered_channel("peer-5", "Minis", None, DiscoverySourceType::Forward)
            .await
            .unwrap();

        let channel = store
            .promote_discovered_channel(&discovered.id, crate::models::ingest::DownloadMode::DownloadAllNew)
            .await
            .unwrap();

        assert_eq!(channel.peer_id, "peer-5");
        assert_eq!(channel.download_mode, crate::models::ingest::DownloadMode::DownloadAllNew);
        assert!(store.get_discovered_channel(&discovered.id).await.is_err());
    }

    #[tokio::test]
    async fn page_sorts_by_reference_count_descending() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .upsert_discovered_channel("peer-a", "A", None, DiscoverySourceType::Mention)
            .await
            .unwrap();
        let b = store
            .upsert_discovered_channel("peer-b", "B", None, DiscoverySourceType::Mention)
            .await
            .unwrap();
        store
            .upsert_discovered_channel("peer-b", "B", None, DiscoverySourceType::CaptionLink)
            .await
            .unwrap();

        let page = store
            .list_discovered_channels_page(DiscoveredChannelSort::ReferenceCount, 10, 0)
            .await
            .unwrap();
        assert_eq!(page[0].id, b.id);
    }
}
