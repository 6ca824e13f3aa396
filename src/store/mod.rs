// store/mod.rs - Generic document table: { id, collection, data }
//
// Adapters:
//   postgrest.rs - table API over HTTP
//   postgres.rs  - direct Postgres connection (sqlx)
//   memory.rs    - process-local rows

pub mod memory;
pub mod postgres;
pub mod postgrest;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::types::{Document, DocumentId, NewDocument};

pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;
pub use postgrest::PostgrestStore;

/// Per-field validation messages, ordered by field name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.insert(field.into(), message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn into_result(self) -> Result<(), StoreError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation(self))
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", field, message)?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Item not found: {0}")]
    NotFound(DocumentId),

    /// `status` is 0 when the backend accepted the call but returned
    /// something unusable
    #[error("Store rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid table name: {0}")]
    InvalidTable(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            sqlx::Error::Database(db) if db.code().as_deref() == Some("42P01") => {
                StoreError::InvalidTable(db.message().to_string())
            }
            other => {
                tracing::error!("Database error: {}", other);
                StoreError::Rejected {
                    status: 500,
                    message: other.to_string(),
                }
            }
        }
    }
}

/// Row operations on a `{ id, collection, data }` table.
///
/// `access_token` is the caller's bearer credential when signed in;
/// adapters that talk to an access-controlled backend fall back to the
/// anonymous key without one.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Rows whose `collection` equals `collection`
    async fn select(
        &self,
        table: &str,
        collection: &str,
        access_token: Option<&str>,
    ) -> Result<Vec<Document>, StoreError>;

    /// Insert and return the stored row with its assigned id
    async fn insert(
        &self,
        table: &str,
        document: NewDocument,
        access_token: Option<&str>,
    ) -> Result<Document, StoreError>;

    /// Delete by id; a missing id is not an error
    async fn delete(
        &self,
        table: &str,
        id: &DocumentId,
        access_token: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// Table names go into URLs and SQL, so only plain identifiers pass
pub fn validate_table_name(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTable(name.to_string()))
    }
}
