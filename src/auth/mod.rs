// auth/mod.rs - Session management over an opaque authentication provider
//
// SessionManager (manager.rs) is what the rest of the crate talks to.
// Providers implement AuthProvider:
//   gotrue.rs  - hosted auth service over HTTP
//   memory.rs  - process-local accounts (tests, offline demos)

pub mod gotrue;
pub mod manager;
pub mod memory;
pub mod policy;
pub mod subscription;
pub mod token;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::{AuthStateChange, Session};

pub use gotrue::GoTrueProvider;
pub use manager::SessionManager;
pub use memory::MemoryAuthProvider;
pub use subscription::Subscription;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("User already registered")]
    DuplicateEmail,

    #[error("Sign-up rejected: {0}")]
    PolicyViolation(String),

    #[error("Confirmation required: check {0} for a confirmation link")]
    ConfirmationRequired(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Auth provider unavailable: {0}")]
    Unavailable(String),

    #[error("Auth provider error ({status}): {message}")]
    Provider { status: u16, message: String },
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Unavailable(err.to_string())
    }
}

/// Authentication backend.
///
/// Call results are returned directly. `on_auth_state_change` only carries
/// transitions the provider starts on its own (background token refresh,
/// revocation), so a caller never sees its own call echoed back.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Session from the provider's own cache, if any
    async fn get_session(&self) -> Result<Option<Session>, AuthError>;

    /// Dropping the receiver unsubscribes
    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthStateChange>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// Invalidate `session` remotely and drop it from the provider cache
    async fn sign_out(&self, session: &Session) -> Result<(), AuthError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError>;
}
