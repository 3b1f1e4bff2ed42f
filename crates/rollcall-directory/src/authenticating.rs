//! Directory wrapper that authenticates requests
//!
//! Credentials come either from a basic-auth header or from a session
//! cookie issued by [`AuthenticatingDirectory::create_session`]. Failed
//! attempts never error: they resolve to the anonymous user and count
//! against the shared log-on throttle. While an identity is locked out the
//! attempt is delayed until the lockout has passed.

use async_trait::async_trait;
use rollcall_auth::credentials::AUTHORIZATION_HEADER;
use rollcall_auth::{
    decode_session_cookie, encode_session_cookie, parse_basic_auth, AuthRequest, AuthResponse,
    IssuedToken, LogOnThrottle, TokenKind, TokenStore,
};
use rollcall_core::config::TokenConfig;
use rollcall_core::types::{FilterExpression, NewUser, User};
use rollcall_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::outcome::OperationOutcome;
use crate::traits::{FindQuery, UserDirectory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Basic ...` on every request
    Basic,
    /// Session cookie carrying the user name and a token identifier
    Cookie,
}

pub struct AuthenticatingDirectory<D> {
    inner: D,
    tokens: Arc<TokenStore>,
    scheme: AuthScheme,
    cookie_name: String,
}

impl<D: UserDirectory> AuthenticatingDirectory<D> {
    pub fn new(inner: D, tokens: Arc<TokenStore>, scheme: AuthScheme, config: &TokenConfig) -> Self {
        Self {
            inner,
            tokens,
            scheme,
            cookie_name: config.cookie_name.clone(),
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    fn throttle(&self) -> &LogOnThrottle {
        self.tokens.throttle()
    }

    /// Hold the caller back until `identity` is no longer locked out.
    async fn wait_for_lockout(&self, identity: &str) {
        if let Some(remaining) = self.throttle().remaining_lockout(identity) {
            warn!(
                "Log-on for {} delayed {}ms by lockout",
                identity,
                remaining.as_millis()
            );
            tokio::time::sleep(remaining).await;
        }
    }

    async fn lookup(&mut self, user_name: &str) -> Option<User> {
        match self.inner.find_by_user_name(user_name).await {
            Ok(user) => user,
            Err(e) => {
                warn!("User lookup for {} failed: {}", user_name, e.diagnostic());
                None
            }
        }
    }

    /// Check a user name and password, returning the anonymous user on any
    /// failure.
    pub async fn log_on(&mut self, user_name: &str, password: &str) -> User {
        if user_name.trim().is_empty() {
            return User::anonymous();
        }
        self.wait_for_lockout(user_name).await;

        let Some(user) = self.lookup(user_name).await else {
            self.throttle().record_failure(user_name, password);
            return User::anonymous();
        };
        let verified = match self.inner.verify_password(&user, password).await {
            Ok(verified) => verified,
            Err(e) => {
                warn!("Password check for {} failed: {}", user_name, e.diagnostic());
                false
            }
        };
        if !verified {
            self.throttle().record_failure(user_name, password);
            return User::anonymous();
        }

        self.throttle().reset(user_name);
        info!("User {} logged on", user.user_name);
        user
    }

    /// The user a request is authenticated as.
    pub async fn current_user<R: AuthRequest + ?Sized>(&mut self, request: &R) -> User {
        match self.scheme {
            AuthScheme::Basic => {
                let Some(credentials) = request
                    .header(AUTHORIZATION_HEADER)
                    .and_then(|h| parse_basic_auth(&h))
                else {
                    return User::anonymous();
                };
                self.log_on(&credentials.user_name, &credentials.password).await
            }
            AuthScheme::Cookie => {
                let Some((user_name, identifier)) = request
                    .cookie(&self.cookie_name)
                    .and_then(|c| decode_session_cookie(&c))
                else {
                    return User::anonymous();
                };
                self.resume_session(&user_name, &identifier).await
            }
        }
    }

    async fn resume_session(&mut self, user_name: &str, identifier: &str) -> User {
        self.wait_for_lockout(user_name).await;

        let Some(user) = self.lookup(user_name).await else {
            self.throttle().record_failure(user_name, identifier);
            return User::anonymous();
        };
        match self
            .tokens
            .find_one(user_name, user.id, TokenKind::Cookie, identifier)
            .await
        {
            Ok(Some(_)) => {
                self.throttle().reset(user_name);
                user
            }
            Ok(None) => User::anonymous(),
            Err(e) => {
                warn!("Session lookup for {} failed: {}", user_name, e.diagnostic());
                User::anonymous()
            }
        }
    }

    /// Issue a session token for `user` and set it as a cookie.
    pub async fn create_session<W: AuthResponse + ?Sized>(
        &self,
        user: &User,
        response: &mut W,
    ) -> Result<IssuedToken> {
        if user.is_anonymous() {
            return Err(Error::NotSupported("session for the anonymous user".into()));
        }
        let issued = self.tokens.create(user.id, TokenKind::Cookie).await?;
        let value = encode_session_cookie(&user.user_name, &issued.identifier);
        response.set_cookie(&self.cookie_name, &value, issued.expires_at);
        Ok(issued)
    }

    pub async fn log_off<W: AuthResponse + ?Sized>(&self, user: &User, response: &mut W) -> Result<()> {
        response.remove_cookie(&self.cookie_name);
        if user.is_anonymous() {
            return Ok(());
        }
        self.tokens.remove(user.id, TokenKind::Cookie).await?;
        debug!("User {} logged off", user.user_name);
        Ok(())
    }

    /// Mint a password reset token; `None` when the user does not exist.
    pub async fn request_password_reset(&mut self, user_name: &str) -> Result<Option<IssuedToken>> {
        let Some(user) = self.inner.find_by_user_name(user_name).await? else {
            return Ok(None);
        };
        user.ensure_writable("password reset")?;
        let issued = self.tokens.create(user.id, TokenKind::PasswordReset).await?;
        Ok(Some(issued))
    }

    /// Set a new password using a reset token. The token is spent on success.
    pub async fn reset_password(
        &mut self,
        user_name: &str,
        identifier: &str,
        new_password: &str,
    ) -> Result<bool> {
        self.wait_for_lockout(user_name).await;

        let Some(user) = self.inner.find_by_user_name(user_name).await? else {
            self.throttle().record_failure(user_name, identifier);
            return Ok(false);
        };
        let token = self
            .tokens
            .find_one(user_name, user.id, TokenKind::PasswordReset, identifier)
            .await?;
        if token.is_none() {
            return Ok(false);
        }
        if !self.inner.change_password(user.id, new_password).await? {
            return Ok(false);
        }
        self.tokens.remove(user.id, TokenKind::PasswordReset).await?;
        self.throttle().reset(user_name);
        info!("Password of {} reset", user.user_name);
        Ok(true)
    }
}

async fn remove_tokens(tokens: &TokenStore, id: Uuid) {
    for kind in [TokenKind::Cookie, TokenKind::PasswordReset] {
        if let Err(e) = tokens.remove(id, kind).await {
            warn!("Removing {} tokens of {} failed: {}", kind, id, e);
        }
    }
}

#[async_trait]
impl<D: UserDirectory> UserDirectory for AuthenticatingDirectory<D> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn find(&mut self, query: &FindQuery) -> Result<Vec<User>> {
        self.inner.find(query).await
    }

    async fn find_distinct_values(
        &mut self,
        field: &str,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<String>> {
        self.inner.find_distinct_values(field, filter).await
    }

    async fn add(&mut self, user: NewUser) -> Result<User> {
        self.inner.add(user).await
    }

    async fn update(&mut self, user: &User) -> Result<()> {
        self.inner.update(user).await
    }

    async fn try_remove(&mut self, id: Uuid) -> Result<OperationOutcome> {
        let outcome = self.inner.try_remove(id).await?;
        if outcome.is_done() {
            remove_tokens(&self.tokens, id).await;
        }
        Ok(outcome)
    }

    async fn try_change_password(&mut self, id: Uuid, password: &str) -> Result<OperationOutcome> {
        self.inner.try_change_password(id, password).await
    }

    async fn try_add_to_group(&mut self, id: Uuid, group: &str) -> Result<OperationOutcome> {
        self.inner.try_add_to_group(id, group).await
    }

    async fn try_remove_from_group(&mut self, id: Uuid, group: &str) -> Result<OperationOutcome> {
        self.inner.try_remove_from_group(id, group).await
    }

    async fn verify_password(&mut self, user: &User, password: &str) -> Result<bool> {
        self.inner.verify_password(user, password).await
    }

    fn clear_cache(&mut self) {
        self.inner.clear_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Directory;
    use crate::test_utils::{seeded_backend, TestBackend};
    use rollcall_auth::{encode_basic_auth, MemoryTokenRepository, SimpleRequest, SimpleResponse};
    use rollcall_crypto::CredentialHasher;
    use std::time::Duration;

    type TestDirectory = AuthenticatingDirectory<Directory<TestBackend>>;

    fn directory(scheme: AuthScheme) -> (TestDirectory, Arc<MemoryTokenRepository>) {
        let repository = Arc::new(MemoryTokenRepository::new());
        let config = TokenConfig::default();
        let tokens = TokenStore::new(
            repository.clone(),
            CredentialHasher::new(10).unwrap(),
            Arc::new(LogOnThrottle::default()),
            &config,
        );
        let dir = AuthenticatingDirectory::new(
            Directory::new(seeded_backend(3, true)),
            Arc::new(tokens),
            scheme,
            &config,
        );
        (dir, repository)
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_on_success_and_failure() {
        let (mut dir, _) = directory(AuthScheme::Basic);

        let user = dir.log_on("user01", "secret1").await;
        assert_eq!(user.user_name, "user01");
        assert!(dir.throttle().info("user01").is_none());

        assert!(dir.log_on("user01", "nope").await.is_anonymous());
        assert_eq!(dir.throttle().info("user01").unwrap().failed_attempts(), 1);

        assert!(dir.log_on("nobody", "x").await.is_anonymous());
        assert!(dir.throttle().info("nobody").is_some());
        assert!(dir.log_on("", "x").await.is_anonymous());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lockout_delays_next_attempt() {
        let (mut dir, _) = directory(AuthScheme::Basic);
        assert!(dir.log_on("user02", "wrong").await.is_anonymous());

        let started = tokio::time::Instant::now();
        let user = dir.log_on("user02", "secret2").await;
        assert_eq!(user.user_name, "user02");
        assert!(started.elapsed() >= Duration::from_secs(6));
        assert!(dir.throttle().info("user02").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_basic_auth_request() {
        let (mut dir, _) = directory(AuthScheme::Basic);
        let request = SimpleRequest::new()
            .with_header(AUTHORIZATION_HEADER, encode_basic_auth("user00", "secret0"));
        assert_eq!(dir.current_user(&request).await.user_name, "user00");

        let bad = SimpleRequest::new().with_header(AUTHORIZATION_HEADER, "Bearer abc");
        assert!(dir.current_user(&bad).await.is_anonymous());
        assert!(dir.current_user(&SimpleRequest::new()).await.is_anonymous());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cookie_session_round_trip() {
        let (mut dir, repository) = directory(AuthScheme::Cookie);
        let cookie_name = TokenConfig::default().cookie_name;

        let user = dir.log_on("user01", "secret1").await;
        let mut response = SimpleResponse::new();
        dir.create_session(&user, &mut response).await.unwrap();
        let cookie = response.cookie(&cookie_name).unwrap().to_string();
        assert_eq!(repository.len(), 1);

        let request = SimpleRequest::new().with_cookie(&cookie_name, cookie.clone());
        assert_eq!(dir.current_user(&request).await.id, user.id);

        // A second session replaces the first token
        let mut again = SimpleResponse::new();
        dir.create_session(&user, &mut again).await.unwrap();
        assert_eq!(repository.len(), 1);
        assert!(dir.current_user(&request).await.is_anonymous());
        assert!(dir.throttle().info("user01").is_some());

        let fresh = SimpleRequest::new()
            .with_cookie(&cookie_name, again.cookie(&cookie_name).unwrap());
        dir.log_off(&user, &mut again).await.unwrap();
        assert!(again.removed.contains(&cookie_name));
        assert!(dir.current_user(&fresh).await.is_anonymous());
        assert!(repository.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_anonymous_gets_no_session() {
        let (dir, _) = directory(AuthScheme::Cookie);
        let mut response = SimpleResponse::new();
        let err = dir.create_session(&User::anonymous(), &mut response).await;
        assert!(err.unwrap_err().is_not_supported());
        assert!(response.cookies.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_password_reset_is_single_use() {
        let (mut dir, _) = directory(AuthScheme::Basic);
        assert!(dir.request_password_reset("ghost").await.unwrap().is_none());

        let issued = dir.request_password_reset("user00").await.unwrap().unwrap();
        assert!(!dir.reset_password("user00", "guess", "hijack").await.unwrap());
        assert!(dir
            .reset_password("user00", &issued.identifier, "fresh-secret")
            .await
            .unwrap());
        assert!(!dir
            .reset_password("user00", &issued.identifier, "again")
            .await
            .unwrap());

        assert!(dir.log_on("user00", "secret0").await.is_anonymous());
        assert_eq!(dir.log_on("user00", "fresh-secret").await.user_name, "user00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_drops_tokens() {
        let (mut dir, repository) = directory(AuthScheme::Cookie);
        let user = dir.log_on("user02", "secret2").await;
        let mut response = SimpleResponse::new();
        dir.create_session(&user, &mut response).await.unwrap();
        dir.request_password_reset("user02").await.unwrap();
        assert_eq!(repository.len(), 2);

        assert!(dir.remove(user.id).await.unwrap());
        assert!(repository.is_empty());
        assert!(dir.log_on("user02", "secret2").await.is_anonymous());
    }
}
