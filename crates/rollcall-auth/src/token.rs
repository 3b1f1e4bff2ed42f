//! Session and password-reset tokens
//!
//! Only a hash of each token identifier is stored. The plaintext leaves the
//! store exactly once, when the token is created. Each user holds at most
//! one token of each kind; creating another resets the existing one in
//! place.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use rollcall_core::config::TokenConfig;
use rollcall_core::{Error, Result};
use rollcall_crypto::{generate_token_identifier, CredentialHasher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::throttle::LogOnThrottle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Cookie,
    PasswordReset,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cookie => "cookie",
            Self::PasswordReset => "password_reset",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cookie" => Some(Self::Cookie),
            "password_reset" => Some(Self::PasswordReset),
            _ => None,
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TokenKind,
    /// Encoded credential of the identifier
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl StoredToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A freshly minted token; `identifier` is the only copy of the plaintext.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub user_id: Uuid,
    pub kind: TokenKind,
    pub identifier: String,
    pub expires_at: DateTime<Utc>,
}

/// Persistence for hashed tokens.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn find_for_user(&self, user_id: Uuid, kind: TokenKind) -> Result<Vec<StoredToken>>;

    /// Insert or replace by token id
    async fn save(&self, token: &StoredToken) -> Result<()>;

    async fn remove(&self, id: Uuid) -> Result<bool>;

    async fn remove_for_user(&self, user_id: Uuid, kind: TokenKind) -> Result<usize>;

    /// Delete every expired token regardless of owner.
    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

#[derive(Default)]
pub struct MemoryTokenRepository {
    tokens: RwLock<HashMap<Uuid, StoredToken>>,
}

impl MemoryTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }
}

#[async_trait]
impl TokenRepository for MemoryTokenRepository {
    async fn find_for_user(&self, user_id: Uuid, kind: TokenKind) -> Result<Vec<StoredToken>> {
        Ok(self
            .tokens
            .read()
            .values()
            .filter(|t| t.user_id == user_id && t.kind == kind)
            .cloned()
            .collect())
    }

    async fn save(&self, token: &StoredToken) -> Result<()> {
        self.tokens.write().insert(token.id, token.clone());
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        Ok(self.tokens.write().remove(&id).is_some())
    }

    async fn remove_for_user(&self, user_id: Uuid, kind: TokenKind) -> Result<usize> {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, t| !(t.user_id == user_id && t.kind == kind));
        Ok(before - tokens.len())
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, t| !t.is_expired_at(now));
        Ok(before - tokens.len())
    }
}

pub struct TokenStore {
    repository: Arc<dyn TokenRepository>,
    hasher: CredentialHasher,
    throttle: Arc<LogOnThrottle>,
    cookie_lifetime: Duration,
    reset_lifetime: Duration,
    cleanup_interval: std::time::Duration,
    last_cleanup: Mutex<Option<Instant>>,
}

impl TokenStore {
    pub fn new(
        repository: Arc<dyn TokenRepository>,
        hasher: CredentialHasher,
        throttle: Arc<LogOnThrottle>,
        config: &TokenConfig,
    ) -> Self {
        Self {
            repository,
            hasher,
            throttle,
            cookie_lifetime: Duration::seconds(config.cookie_lifetime_secs as i64),
            reset_lifetime: Duration::seconds(config.reset_lifetime_secs as i64),
            cleanup_interval: std::time::Duration::from_secs(config.cleanup_interval_secs),
            last_cleanup: Mutex::new(None),
        }
    }

    pub fn throttle(&self) -> &Arc<LogOnThrottle> {
        &self.throttle
    }

    fn lifetime(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Cookie => self.cookie_lifetime,
            TokenKind::PasswordReset => self.reset_lifetime,
        }
    }

    /// Mint a token for `user_id`, replacing any existing token of that kind.
    pub async fn create(&self, user_id: Uuid, kind: TokenKind) -> Result<IssuedToken> {
        let now = Utc::now();
        let identifier = generate_token_identifier();
        let token_hash = self
            .hasher
            .encrypt(&identifier, None)
            .map_err(|e| Error::InternalError(e.to_string()))?;
        let expires_at = now + self.lifetime(kind);

        let mut existing = self.repository.find_for_user(user_id, kind).await?;
        existing.sort_by_key(|t| t.expires_at);
        let token = match existing.pop() {
            Some(current) => {
                for stale in existing {
                    self.repository.remove(stale.id).await?;
                }
                StoredToken {
                    token_hash,
                    expires_at,
                    created_at: now,
                    ..current
                }
            }
            None => StoredToken {
                id: Uuid::new_v4(),
                user_id,
                kind,
                token_hash,
                expires_at,
                created_at: now,
            },
        };
        self.repository.save(&token).await?;
        debug!("Issued {} token for user {}", kind, user_id);

        Ok(IssuedToken {
            user_id,
            kind,
            identifier,
            expires_at,
        })
    }

    /// Look up the live token of `user_id` matching `candidate`.
    ///
    /// A candidate that does not match counts as a failed attempt against
    /// `identity` in the shared throttle.
    pub async fn find_one(
        &self,
        identity: &str,
        user_id: Uuid,
        kind: TokenKind,
        candidate: &str,
    ) -> Result<Option<StoredToken>> {
        self.maybe_cleanup().await;

        let now = Utc::now();
        let latest = self
            .repository
            .find_for_user(user_id, kind)
            .await?
            .into_iter()
            .max_by_key(|t| t.expires_at);

        match latest {
            Some(token) if token.is_expired_at(now) => {
                debug!("{} token for user {} has expired", kind, user_id);
                Ok(None)
            }
            Some(token) if self.hasher.verify(candidate, &token.token_hash) => Ok(Some(token)),
            _ => {
                self.throttle.record_failure(identity, candidate);
                Ok(None)
            }
        }
    }

    pub async fn remove(&self, user_id: Uuid, kind: TokenKind) -> Result<usize> {
        self.repository.remove_for_user(user_id, kind).await
    }

    /// Delete every expired token and every elapsed throttle entry now.
    pub async fn cleanup(&self) -> Result<usize> {
        let now = Utc::now();
        self.throttle.sweep_at(now);
        let removed = self.repository.remove_expired(now).await?;
        *self.last_cleanup.lock() = Some(Instant::now());
        if removed > 0 {
            info!("Removed {} expired tokens", removed);
        }
        Ok(removed)
    }

    /// Sweep at most once per cleanup interval; failures are logged only.
    async fn maybe_cleanup(&self) {
        let due = {
            let mut last = self.last_cleanup.lock();
            match *last {
                Some(at) if at.elapsed() < self.cleanup_interval => false,
                _ => {
                    *last = Some(Instant::now());
                    true
                }
            }
        };
        if due {
            if let Err(e) = self.cleanup().await {
                warn!("Token cleanup failed: {}", e);
            }
        }
    }
}
