// User-facing error type for the CLI surface
use serde_json::{json, Value};

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::store::StoreError;

/// Error reported to the user, with a stable code for scripted callers
#[derive(Debug)]
pub enum AppError {
    Auth(AuthError),
    Store(StoreError),
    Config(ConfigError),

    /// Bad command-line input
    BadRequest(String),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest(message.into())
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Auth(e) => match e {
                AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
                AuthError::DuplicateEmail => "DUPLICATE_EMAIL",
                AuthError::PolicyViolation(_) => "POLICY_VIOLATION",
                AuthError::ConfirmationRequired(_) => "CONFIRMATION_REQUIRED",
                AuthError::SessionExpired => "SESSION_EXPIRED",
                AuthError::Unavailable(_) => "SERVICE_UNAVAILABLE",
                AuthError::Provider { .. } => "AUTH_PROVIDER_ERROR",
            },
            AppError::Store(e) => match e {
                StoreError::Validation(_) => "VALIDATION_ERROR",
                StoreError::Unauthorized(_) => "UNAUTHORIZED",
                StoreError::Unavailable(_) => "SERVICE_UNAVAILABLE",
                StoreError::NotFound(_) => "NOT_FOUND",
                StoreError::Rejected { .. } => "STORE_REJECTED",
                StoreError::InvalidTable(_) => "INVALID_TABLE",
            },
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> String {
        match self {
            AppError::Auth(e) => e.to_string(),
            AppError::Store(StoreError::Validation(_)) => "Please fix the highlighted fields".to_string(),
            AppError::Store(StoreError::Rejected { message, .. }) => {
                tracing::error!("Store rejected request: {}", message);
                "The store rejected the request".to_string()
            }
            AppError::Store(e) => e.to_string(),
            AppError::Config(e) => e.to_string(),
            AppError::BadRequest(msg) => msg.clone(),
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        let mut response = json!({
            "success": false,
            "error": self.message(),
            "error_code": self.error_code()
        });

        if let AppError::Store(StoreError::Validation(field_errors)) = self {
            response["field_errors"] = json!(field_errors);
        }

        response
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Store(StoreError::Validation(errors)) => write!(f, "Invalid input: {}", errors),
            _ => write!(f, "{}", self.message()),
        }
    }
}

impl std::error::Error for AppError {}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}
