// gotrue.rs - Hosted auth service over HTTP
//
// Endpoints (relative to the backend base URL):
//   POST /auth/v1/token?grant_type=password
//   POST /auth/v1/token?grant_type=refresh_token
//   POST /auth/v1/signup
//   POST /auth/v1/logout

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::token::peek_expiry;
use super::{AuthError, AuthProvider};
use crate::types::{AuthEvent, AuthStateChange, Session, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    PasswordGrant,
    RefreshGrant,
    SignUp,
    Logout,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: WireUser,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// The service has used several error shapes over time
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorBody {
    fn code(&self) -> &str {
        self.error_code.as_deref().or(self.error.as_deref()).unwrap_or("")
    }

    fn text(&self) -> String {
        self.error_description
            .as_deref()
            .or(self.msg.as_deref())
            .or(self.message.as_deref())
            .or(self.error.as_deref())
            .unwrap_or("")
            .to_string()
    }
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|at| Utc.timestamp_opt(at, 0).single())
            .or_else(|| self.expires_in.map(|secs| Utc::now() + chrono::Duration::seconds(secs)))
            .or_else(|| peek_expiry(&self.access_token));

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: User {
                id: self.user.id,
                email: self.user.email.unwrap_or_default(),
            },
        }
    }
}

/// Map a non-success response to the error the caller should see
fn classify(operation: Operation, status: StatusCode, body: &ErrorBody) -> AuthError {
    let code = body.code().to_ascii_lowercase();
    let text = body.text();
    let lowered = text.to_ascii_lowercase();

    if status.is_server_error() {
        return AuthError::Unavailable(format!("{}: {}", status, text));
    }

    match operation {
        Operation::PasswordGrant
            if code == "invalid_grant"
                || code == "invalid_credentials"
                || lowered.contains("invalid login credentials") =>
        {
            AuthError::InvalidCredentials
        }
        Operation::RefreshGrant
            if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED =>
        {
            AuthError::SessionExpired
        }
        Operation::SignUp
            if code == "user_already_exists"
                || code == "email_exists"
                || lowered.contains("already registered") =>
        {
            AuthError::DuplicateEmail
        }
        Operation::SignUp
            if status == StatusCode::UNPROCESSABLE_ENTITY
                || code == "weak_password"
                || code == "validation_failed"
                || code == "signup_disabled" =>
        {
            AuthError::PolicyViolation(text)
        }
        _ => AuthError::Provider {
            status: status.as_u16(),
            message: text,
        },
    }
}

/// Auth adapter for the hosted backend.
///
/// Keeps its own session cache (memory, optionally mirrored to a file) the
/// way browser clients keep one in local storage.
pub struct GoTrueProvider {
    client: Client,
    base_url: String,
    anon_key: String,
    session_file: Option<PathBuf>,
    cached: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthStateChange>,
}

impl GoTrueProvider {
    pub fn new(base_url: url::Url, anon_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, anon_key)
    }

    pub fn with_client(client: Client, base_url: url::Url, anon_key: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            session_file: None,
            cached: Mutex::new(None),
            events,
        }
    }

    /// Mirror the session cache to `path` (owner-only permissions on Unix)
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    /// Refresh the cached session in the background shortly before it
    /// expires. Outcomes are pushed through `on_auth_state_change`.
    pub fn spawn_auto_refresh(self: &Arc<Self>, tick: Duration, leeway: chrono::Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                let provider = match weak.upgrade() {
                    Some(provider) => provider,
                    None => break,
                };
                provider.refresh_if_due(leeway).await;
            }
        })
    }

    async fn refresh_if_due(&self, leeway: chrono::Duration) {
        let cached = self.lock_cache().clone();
        let due = match cached {
            Some(session) if session.expires_within(leeway) => session,
            _ => return,
        };

        let refresh_token = match due.refresh_token.as_deref() {
            Some(token) => token,
            None => return,
        };

        match self.refresh_session(refresh_token).await {
            Ok(fresh) => {
                debug!("Background refresh for {}", fresh.email());
                let _ = self
                    .events
                    .send(AuthStateChange::new(AuthEvent::TokenRefreshed, Some(fresh)));
            }
            Err(AuthError::Unavailable(e)) => {
                warn!("Background refresh deferred: {}", e);
            }
            Err(e) => {
                info!("Cached session for {} is no longer valid: {}", due.email(), e);
                self.store_cache(None).await;
                let _ = self.events.send(AuthStateChange::signed_out());
            }
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer.unwrap_or(self.anon_key.as_str()))
    }

    async fn post(
        &self,
        operation: Operation,
        path: &str,
        bearer: Option<&str>,
        body: Value,
    ) -> Result<reqwest::Response, AuthError> {
        debug!("POST {}", path);
        let response = self
            .authorized(self.client.post(self.endpoint(path)), bearer)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_body = response.json::<ErrorBody>().await.unwrap_or_default();
        let err = classify(operation, status, &error_body);
        debug!("{:?} rejected with {}: {}", operation, status, err);
        Err(err)
    }

    async fn token_grant(&self, operation: Operation, grant: &str, body: Value) -> Result<Session, AuthError> {
        let response = self
            .post(operation, &format!("token?grant_type={}", grant), None, body)
            .await?;
        let token: TokenResponse = response.json().await.map_err(|e| AuthError::Provider {
            status: 200,
            message: format!("unexpected token response: {}", e),
        })?;

        let session = token.into_session();
        self.store_cache(Some(session.clone())).await;
        Ok(session)
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<Session>> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn store_cache(&self, session: Option<Session>) {
        if let Some(path) = &self.session_file {
            let result = match &session {
                Some(s) => write_session_file(path, s).await,
                None => remove_session_file(path).await,
            };
            if let Err(e) = result {
                warn!("Session cache {} not updated: {}", path.display(), e);
            }
        }
        *self.lock_cache() = session;
    }
}

#[async_trait]
impl AuthProvider for GoTrueProvider {
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        if let Some(session) = self.lock_cache().clone() {
            return Ok(Some(session));
        }

        let loaded = match &self.session_file {
            Some(path) => read_session_file(path).await,
            None => None,
        };
        *self.lock_cache() = loaded.clone();
        Ok(loaded)
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.token_grant(
            Operation::PasswordGrant,
            "password",
            json!({ "email": email, "password": password }),
        )
        .await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let response = self
            .post(
                Operation::SignUp,
                "signup",
                None,
                json!({ "email": email, "password": password }),
            )
            .await?;

        let body: Value = response.json().await.map_err(|e| AuthError::Provider {
            status: 200,
            message: format!("unexpected sign-up response: {}", e),
        })?;

        // Without auto-confirm the service answers with the bare user
        if body.get("access_token").and_then(Value::as_str).is_none() {
            let pending = body
                .get("email")
                .or_else(|| body.pointer("/user/email"))
                .and_then(Value::as_str)
                .unwrap_or(email);
            return Err(AuthError::ConfirmationRequired(pending.to_string()));
        }

        let token: TokenResponse = serde_json::from_value(body).map_err(|e| AuthError::Provider {
            status: 200,
            message: format!("unexpected sign-up response: {}", e),
        })?;
        let session = token.into_session();
        self.store_cache(Some(session.clone())).await;
        Ok(session)
    }

    async fn sign_out(&self, session: &Session) -> Result<(), AuthError> {
        let result = self
            .post(Operation::Logout, "logout", Some(&session.access_token), json!({}))
            .await;
        self.store_cache(None).await;

        match result {
            Ok(_) => Ok(()),
            // Token already invalid on the server side
            Err(AuthError::Provider { status, .. }) if matches!(status, 401 | 403 | 404) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let result = self
            .token_grant(
                Operation::RefreshGrant,
                "refresh_token",
                json!({ "refresh_token": refresh_token }),
            )
            .await;

        if let Err(AuthError::SessionExpired) = &result {
            self.store_cache(None).await;
        }
        result
    }
}

async fn read_session_file(path: &Path) -> Option<Session> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Cannot read session cache {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!("Ignoring corrupt session cache {}: {}", path.display(), e);
            None
        }
    }
}

async fn write_session_file(path: &Path, session: &Session) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let content = serde_json::to_vec_pretty(session)?;
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(&content).await?;
    file.flush().await?;
    Ok(())
}

async fn remove_session_file(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
