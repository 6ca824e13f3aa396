use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use super::policy::{normalize_email, validate_email_format, validate_password};
use super::token::{generate_jwt, validate_jwt, Claims};
use super::{AuthError, AuthProvider};
use crate::types::{AuthEvent, AuthStateChange, Session, User};

struct Account {
    user: User,
    password: String,
}

struct MemoryState {
    /// Keyed by normalized email
    accounts: HashMap<String, Account>,
    /// Refresh token -> account key
    refresh_tokens: HashMap<String, String>,
    cached: Option<Session>,
    token_ttl: chrono::Duration,
}

/// Process-local auth provider with auto-confirmed accounts and locally
/// signed tokens. Used by tests and the `memory` store driver.
pub struct MemoryAuthProvider {
    secret: Vec<u8>,
    require_confirmation: bool,
    offline: AtomicBool,
    state: Mutex<MemoryState>,
    events: broadcast::Sender<AuthStateChange>,
}

impl Default for MemoryAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuthProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            secret: Uuid::new_v4().as_bytes().to_vec(),
            require_confirmation: false,
            offline: AtomicBool::new(false),
            state: Mutex::new(MemoryState {
                accounts: HashMap::new(),
                refresh_tokens: HashMap::new(),
                cached: None,
                token_ttl: chrono::Duration::hours(1),
            }),
            events,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = secret.into();
        self
    }

    pub fn with_token_ttl(self, ttl: chrono::Duration) -> Self {
        self.set_token_ttl(ttl);
        self
    }

    /// Sign-up leaves the account unconfirmed and returns no session
    pub fn with_email_confirmation(mut self, required: bool) -> Self {
        self.require_confirmation = required;
        self
    }

    pub fn set_token_ttl(&self, ttl: chrono::Duration) {
        self.lock().token_ttl = ttl;
    }

    /// Simulate an unreachable provider
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Create an account without signing in
    pub fn register(&self, email: &str, password: &str) -> Result<User, AuthError> {
        validate_email_format(email.trim()).map_err(AuthError::PolicyViolation)?;
        validate_password(password).map_err(AuthError::PolicyViolation)?;

        let key = normalize_email(email);
        let mut state = self.lock();
        if state.accounts.contains_key(&key) {
            return Err(AuthError::DuplicateEmail);
        }

        let user = User { id: Uuid::new_v4().to_string(), email: key.clone() };
        state.accounts.insert(key, Account { user: user.clone(), password: password.to_string() });
        info!("Registered account {}", user.email);
        Ok(user)
    }

    /// Check an access token minted by this provider
    pub fn verify(&self, access_token: &str) -> Result<User, AuthError> {
        let claims = validate_jwt(access_token, &self.secret).map_err(|e| {
            debug!("Rejected access token: {}", e);
            AuthError::SessionExpired
        })?;
        Ok(User { id: claims.sub, email: claims.email })
    }

    /// Revoke every session, as an administrator would. Pushed as `SignedOut`.
    pub fn revoke_all(&self) {
        {
            let mut state = self.lock();
            state.refresh_tokens.clear();
            state.cached = None;
        }
        info!("Revoked all sessions");
        let _ = self.events.send(AuthStateChange::signed_out());
    }

    /// Invalidate refresh tokens but leave access tokens alone
    pub fn revoke_refresh_tokens(&self) {
        self.lock().refresh_tokens.clear();
    }

    /// Reissue the cached session's tokens, as a background refresh would.
    /// Pushed as `TokenRefreshed`.
    pub fn rotate_tokens(&self) -> Option<Session> {
        let session = {
            let mut state = self.lock();
            let user = state.cached.as_ref()?.user.clone();
            let key = normalize_email(&user.email);
            if let Some(old) = state.cached.as_ref().and_then(|s| s.refresh_token.clone()) {
                state.refresh_tokens.remove(&old);
            }
            let session = self.mint(&mut state, &user, key).ok()?;
            state.cached = Some(session.clone());
            session
        };

        let _ = self
            .events
            .send(AuthStateChange::new(AuthEvent::TokenRefreshed, Some(session.clone())));
        Some(session)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_online(&self) -> Result<(), AuthError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AuthError::Unavailable("auth provider is offline".to_string()));
        }
        Ok(())
    }

    fn mint(&self, state: &mut MemoryState, user: &User, key: String) -> Result<Session, AuthError> {
        let claims = Claims::new(user, state.token_ttl);
        let access_token = generate_jwt(&claims, &self.secret).map_err(|e| AuthError::Provider {
            status: 500,
            message: e.to_string(),
        })?;

        let refresh_token = Uuid::new_v4().simple().to_string();
        state.refresh_tokens.insert(refresh_token.clone(), key);

        Ok(Session {
            access_token,
            refresh_token: Some(refresh_token),
            expires_at: claims.expires_at(),
            user: user.clone(),
        })
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self.lock().cached.clone())
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.ensure_online()?;

        let key = normalize_email(email);
        let mut state = self.lock();
        let user = match state.accounts.get(&key) {
            Some(account) if account.password == password => account.user.clone(),
            _ => return Err(AuthError::InvalidCredentials),
        };

        let session = self.mint(&mut state, &user, key)?;
        state.cached = Some(session.clone());
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.ensure_online()?;

        let user = self.register(email, password)?;
        if self.require_confirmation {
            return Err(AuthError::ConfirmationRequired(user.email));
        }

        let mut state = self.lock();
        let key = normalize_email(&user.email);
        let session = self.mint(&mut state, &user, key)?;
        state.cached = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self, session: &Session) -> Result<(), AuthError> {
        self.ensure_online()?;

        let mut state = self.lock();
        if let Some(token) = &session.refresh_token {
            state.refresh_tokens.remove(token);
        }
        if state.cached.as_ref().map(|s| &s.user.id) == Some(&session.user.id) {
            state.cached = None;
        }
        Ok(())
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError> {
        self.ensure_online()?;

        let mut state = self.lock();
        let key = state
            .refresh_tokens
            .remove(refresh_token)
            .ok_or(AuthError::SessionExpired)?;
        let user = match state.accounts.get(&key) {
            Some(account) => account.user.clone(),
            None => return Err(AuthError::SessionExpired),
        };

        let session = self.mint(&mut state, &user, key)?;
        state.cached = Some(session.clone());
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_email_is_rejected_case_insensitively() {
        let provider = MemoryAuthProvider::new();
        provider.sign_up("a@x.com", "hunter22").await.unwrap();
        let err = provider.sign_up("A@X.com", "hunter22").await.unwrap_err();
        assert_eq!(err, AuthError::DuplicateEmail);
    }

    #[tokio::test]
    async fn weak_password_is_a_policy_violation() {
        let provider = MemoryAuthProvider::new();
        let err = provider.sign_up("a@x.com", "123").await.unwrap_err();
        assert!(matches!(err, AuthError::PolicyViolation(_)));
    }

    #[tokio::test]
    async fn confirmation_mode_returns_no_session() {
        let provider = MemoryAuthProvider::new().with_email_confirmation(true);
        let err = provider.sign_up("a@x.com", "hunter22").await.unwrap_err();
        assert_eq!(err, AuthError::ConfirmationRequired("a@x.com".into()));
        assert!(provider.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refresh_tokens_are_single_use() {
        let provider = MemoryAuthProvider::new();
        let session = provider.sign_up("a@x.com", "hunter22").await.unwrap();
        let token = session.refresh_token.clone().unwrap();

        let fresh = provider.refresh_session(&token).await.unwrap();
        assert_eq!(fresh.user, session.user);
        assert_eq!(provider.refresh_session(&token).await.unwrap_err(), AuthError::SessionExpired);
    }

    #[tokio::test]
    async fn minted_tokens_verify_against_the_provider() {
        let provider = MemoryAuthProvider::new().with_secret("s3cret");
        let session = provider.sign_up("a@x.com", "hunter22").await.unwrap();
        assert_eq!(provider.verify(&session.access_token).unwrap(), session.user);
        assert!(provider.verify("garbage").is_err());
    }

    #[tokio::test]
    async fn offline_provider_is_unavailable() {
        let provider = MemoryAuthProvider::new();
        provider.set_offline(true);
        let err = provider.sign_in_with_password("a@x.com", "hunter22").await.unwrap_err();
        assert!(matches!(err, AuthError::Unavailable(_)));
    }
}
