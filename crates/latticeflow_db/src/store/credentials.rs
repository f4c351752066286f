//! Credential repository (spec.md §4.6, §6 telegram auth / cloud-drive OAuth).
//!
//! Rows hold an already-sealed secret; sealing/opening is the caller's
//! job via `latticeflow_security::credentials::CredentialCipher`.

use super::Store;
use crate::error::{DbError, Result};
use crate::models::misc::{Credential, CredentialKind};
use latticeflow_core::ids::CredentialId;

impl Store {
    pub async fn store_credential(&self, kind: CredentialKind, sealed_secret: &str) -> Result<Credential> {
        let id = CredentialId::new().to_string();
        sqlx::query("INSERT INTO credentials (id, kind, sealed_secret) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(kind)
            .bind(sealed_secret)
            .execute(self.pool())
            .await?;
        self.get_credential(&id).await
    }

    pub async fn get_credential(&self, id: &str) -> Result<Credential> {
        sqlx::query_as::<_, Credential>("SELECT * FROM credentials WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DbError::NotFound(format!("credential {id}")))
    }

    pub async fn rotate_credential(&self, id: &str, sealed_secret: &str) -> Result<()> {
        sqlx::query(
            "UPDATE credentials SET sealed_secret = ?, rotated_at = datetime('now') WHERE id = ?",
        )
        .bind(sealed_secret)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn find_credential_by_kind(&self, kind: CredentialKind) -> Result<Option<Credential>> {
        sqlx::query_as::<_, Credential>(
            "SELECT * FROM credentials WHERE kind = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(kind)
        .fetch_optional(self.pool())
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_rotate_credential() {
        let store = Store::open_in_memory().await.unwrap();
        let cred = store
            .store_credential(CredentialKind::TelegramSession, "sealed-v1")
            .await
            .unwrap();
        store.rotate_credential(&cred.id, "sealed-v2").await.unwrap();

        let refreshed = store.get_credential(&cred.id).await.unwrap();
        assert_eq!(refreshed.sealed_secret, "sealed-v2");
        assert!(refreshed.rotated_at.is_some());
    }
}
