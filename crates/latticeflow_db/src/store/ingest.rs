//! Channel / Message / Attachment repository (spec.md §4.11).

use super::Store;
use crate::error::{DbError, Result};
use crate::models::ingest::{
    Attachment, AttachmentDownloadStatus, AttachmentType, Channel, DownloadMode, Message,
};
use latticeflow_core::ids::{AttachmentId, ChannelId, MessageId};

impl Store {
    pub async fn upsert_channel(
        &self,
        peer_id: &str,
        title: &str,
        username: Option<&str>,
    ) -> Result<Channel> {
        if let Some(existing) = self.find_channel_by_peer_id(peer_id).await? {
            return Ok(existing);
        }
        let id = ChannelId::new().to_string();
        sqlx::query(
            "INSERT INTO channels (id, peer_id, username, title) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(peer_id)
        .bind(username)
        .bind(title)
        .execute(self.pool())
        .await?;
        self.get_channel(&id).await
    }

    pub async fn find_channel_by_peer_id(&self, peer_id: &str) -> Result<Option<Channel>> {
        sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE peer_id = ?")
            .bind(peer_id)
            .fetch_optional(self.pool())
            .await
            .map_err(Into::into)
    }

    pub async fn get_channel(&self, id: &str) -> Result<Channel> {
        sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DbError::NotFound(format!("channel {id}")))
    }

    pub async fn get_message(&self, id: &str) -> Result<Message> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DbError::NotFound(format!("message {id}")))
    }

    pub async fn get_attachment(&self, id: &str) -> Result<Attachment> {
        sqlx::query_as::<_, Attachment>("SELECT * FROM attachments WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DbError::NotFound(format!("attachment {id}")))
    }

    pub async fn set_channel_download_mode(&self, id: &str, mode: DownloadMode) -> Result<()> {
        sqlx::query(
            "UPDATE channels SET download_mode = ?, download_mode_enabled_at = datetime('now') WHERE id = ?",
        )
        .bind(mode)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_subscribed_channels(&self) -> Result<Vec<Channel>> {
        let channels: Vec<Channel> = sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE enabled = 1")
            .fetch_all(self.pool())
            .await?;
        Ok(channels.into_iter().filter(Channel::should_subscribe).collect())
    }

    pub async fn record_message(
        &self,
        channel_id: &str,
        upstream_message_id: i64,
        caption_raw: Option<&str>,
        caption_normalized: Option<&str>,
        posted_at: chrono::DateTime<chrono::Utc>,
        author_label: Option<&str>,
    ) -> Result<Message> {
        let id = MessageId::new().to_string();
        sqlx::query(
            "INSERT INTO messages
                (id, channel_id, upstream_message_id, caption_raw, caption_normalized, posted_at, author_label)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(channel_id)
        .bind(upstream_message_id)
        .bind(caption_raw)
        .bind(caption_normalized)
        .bind(posted_at)
        .bind(author_label)
        .execute(self.pool())
        .await?;

        sqlx::query(
            "UPDATE channels SET last_ingested_message_id = ?, last_sync_at = datetime('now') WHERE id = ?",
        )
        .bind(upstream_message_id)
        .bind(channel_id)
        .execute(self.pool())
        .await?;

        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
            .bind(&id)
            .fetch_one(self.pool())
            .await
            .map_err(Into::into)
    }

    pub async fn add_attachment(
        &self,
        message_id: &str,
        upstream_file_id: &str,
        attachment_type: AttachmentType,
        filename: Option<&str>,
        extension: Option<&str>,
        size_bytes: Option<i64>,
        mime_type: Option<&str>,
        is_candidate_design_file: bool,
    ) -> Result<Attachment> {
        let id = AttachmentId::new().to_string();
        sqlx::query(
            "INSERT INTO attachments
                (id, message_id, upstream_file_id, attachment_type, filename, extension, size_bytes, mime_type, is_candidate_design_file)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(message_id)
        .bind(upstream_file_id)
        .bind(attachment_type)
        .bind(filename)
        .bind(extension)
        .bind(size_bytes)
        .bind(mime_type)
        .bind(is_candidate_design_file)
        .execute(self.pool())
        .await?;
        sqlx::query_as::<_, Attachment>("SELECT * FROM attachments WHERE id = ?")
            .bind(&id)
            .fetch_one(self.pool())
            .await
            .map_err(Into::into)
    }

    pub async fn candidate_attachments_for_message(&self, message_id: &str) -> Result<Vec<Attachment>> {
        sqlx::query_as::<_, Attachment>(
            "SELECT * FROM attachments WHERE message_id = ? AND is_candidate_design_file = 1",
        )
        .bind(message_id)
        .fetch_all(self.pool())
        .await
        .map_err(Into::into)
    }

    pub async fn set_attachment_download_status(
        &self,
        id: &str,
        status: AttachmentDownloadStatus,
        content_hash: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE attachments SET download_status = ?, content_hash = COALESCE(?, content_hash) WHERE id = ?",
        )
        .bind(status)
        .bind(content_hash)
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
    async fn upsert_channel_is_idempotent_on_peer_id() {
        let store = Store::open_in_memory().await.unwrap();
        let a = store.upsert_channel("peer-1", "Demo", None).await.unwrap();
        let b = store.upsert_channel("peer-1", "Demo Renamed", None).await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn manual_channels_are_excluded_from_subscribed_list() {
        let store = Store::open_in_memory().await.unwrap();
        let ch = store.upsert_channel("peer-1", "Demo", None).await.unwrap();
        assert!(store.list_subscribed_channels().await.unwrap().is_empty());

        store
            .set_channel_download_mode(&ch.id, DownloadMode::DownloadAll)
            .await
            .unwrap();
        assert_eq!(store.list_subscribed_channels().await.unwrap().len(), 1);
    }
}
