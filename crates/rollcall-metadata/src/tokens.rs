//! Relational token repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rollcall_auth::{StoredToken, TokenKind, TokenRepository};
use rollcall_core::{Error, Result};
use sqlx::sqlite::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::query::{decode_timestamp, encode_timestamp};

type TokenRow = (String, String, String, String, String, String);

pub struct SqlTokenRepository {
    pool: SqlitePool,
}

impl SqlTokenRepository {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let repository = Self { pool };
        repository.init().await?;
        Ok(repository)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_tokens (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                token_hash TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_user_tokens_owner ON user_tokens(user_id, kind)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(())
    }

    fn to_token(row: TokenRow) -> Result<StoredToken> {
        let parse_id = |text: &str| {
            Uuid::parse_str(text).map_err(|e| Error::DatabaseError(format!("bad token row: {}", e)))
        };
        let kind = TokenKind::parse(&row.2)
            .ok_or_else(|| Error::DatabaseError(format!("unknown token kind '{}'", row.2)))?;
        Ok(StoredToken {
            id: parse_id(&row.0)?,
            user_id: parse_id(&row.1)?,
            kind,
            token_hash: row.3,
            expires_at: decode_timestamp(&row.4)?,
            created_at: decode_timestamp(&row.5)?,
        })
    }
}

#[async_trait]
impl TokenRepository for SqlTokenRepository {
    async fn find_for_user(&self, user_id: Uuid, kind: TokenKind) -> Result<Vec<StoredToken>> {
        let rows: Vec<TokenRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, kind, token_hash, expires_at, created_at
            FROM user_tokens WHERE user_id = ? AND kind = ?
            ORDER BY expires_at
            "#,
        )
        .bind(user_id.to_string())
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        rows.into_iter().map(Self::to_token).collect()
    }

    async fn save(&self, token: &StoredToken) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_tokens (id, user_id, kind, token_hash, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                token_hash = excluded.token_hash,
                expires_at = excluded.expires_at,
                created_at = excluded.created_at
            "#,
        )
        .bind(token.id.to_string())
        .bind(token.user_id.to_string())
        .bind(token.kind.as_str())
        .bind(&token.token_hash)
        .bind(encode_timestamp(&token.expires_at))
        .bind(encode_timestamp(&token.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        debug!("Saved {} token {}", token.kind, token.id);
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_tokens WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_for_user(&self, user_id: Uuid, kind: TokenKind) -> Result<usize> {
        let result = sqlx::query("DELETE FROM user_tokens WHERE user_id = ? AND kind = ?")
            .bind(user_id.to_string())
            .bind(kind.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(result.rows_affected() as usize)
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query("DELETE FROM user_tokens WHERE expires_at <= ?")
            .bind(encode_timestamp(&now))
            .execute(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect_memory;
    use chrono::Duration;
    use rollcall_auth::{LogOnThrottle, TokenStore};
    use rollcall_core::config::TokenConfig;
    use rollcall_crypto::CredentialHasher;
    use std::sync::Arc;

    async fn repository() -> SqlTokenRepository {
        SqlTokenRepository::new(connect_memory().await.unwrap())
            .await
            .unwrap()
    }

    fn token(user_id: Uuid, kind: TokenKind, expires_in: Duration) -> StoredToken {
        let now = Utc::now();
        StoredToken {
            id: Uuid::new_v4(),
            user_id,
            kind,
            token_hash: "$0$abcdabcdabcdabcd00".into(),
            expires_at: now + expires_in,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_save_is_upsert() {
        let repo = repository().await;
        let user = Uuid::new_v4();
        let mut stored = token(user, TokenKind::Cookie, Duration::hours(1));
        repo.save(&stored).await.unwrap();

        stored.token_hash = "$0$efghefghefghefgh11".into();
        repo.save(&stored).await.unwrap();

        let found = repo.find_for_user(user, TokenKind::Cookie).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].token_hash, stored.token_hash);
        assert!(repo
            .find_for_user(user, TokenKind::PasswordReset)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_removal() {
        let repo = repository().await;
        let user = Uuid::new_v4();
        let live = token(user, TokenKind::Cookie, Duration::hours(1));
        let expired = token(user, TokenKind::PasswordReset, Duration::hours(-1));
        let other = token(Uuid::new_v4(), TokenKind::Cookie, Duration::hours(1));
        for t in [&live, &expired, &other] {
            repo.save(t).await.unwrap();
        }

        assert_eq!(repo.remove_expired(Utc::now()).await.unwrap(), 1);
        assert_eq!(repo.remove_for_user(user, TokenKind::Cookie).await.unwrap(), 1);
        assert!(repo.remove(other.id).await.unwrap());
        assert!(!repo.remove(other.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_token_store_over_sql() {
        let repo: Arc<dyn TokenRepository> = Arc::new(repository().await);
        let store = TokenStore::new(
            repo.clone(),
            CredentialHasher::new(10).unwrap(),
            Arc::new(LogOnThrottle::default()),
            &TokenConfig::default(),
        );
        let user = Uuid::new_v4();
        let first = store.create(user, TokenKind::Cookie).await.unwrap();
        let second = store.create(user, TokenKind::Cookie).await.unwrap();
        assert_eq!(repo.find_for_user(user, TokenKind::Cookie).await.unwrap().len(), 1);

        assert!(store
            .find_one("bob", user, TokenKind::Cookie, &second.identifier)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_one("bob", user, TokenKind::Cookie, &first.identifier)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.throttle().info("bob").unwrap().failed_attempts(), 1);
    }
}
