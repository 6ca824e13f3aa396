use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::{validate_table_name, DocumentStore, StoreError};
use crate::types::{Document, DocumentId, NewDocument};

/// Direct connection to the database behind the table API.
///
/// Trusted connection: bearer tokens are ignored, so row-level policies of
/// the hosted API do not apply here.
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        info!("Connected document store pool (max {} connections)", max_connections);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the document table if it does not exist
    pub async fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
                collection text NOT NULL,
                data jsonb NOT NULL DEFAULT '{{}}'::jsonb,
                created_at timestamptz NOT NULL DEFAULT now()
            )",
            quoted_table(table)?
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Closed document store pool");
    }
}

/// Quote SQL identifier to prevent injection
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quoted_table(table: &str) -> Result<String, StoreError> {
    validate_table_name(table)?;
    Ok(quote_identifier(table))
}

fn document_from_row(row: &PgRow) -> Result<Document, StoreError> {
    Ok(Document {
        id: DocumentId::new(row.try_get::<String, _>("id")?),
        collection: row.try_get("collection")?,
        data: row.try_get::<Value, _>("data")?,
    })
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn select(
        &self,
        table: &str,
        collection: &str,
        _access_token: Option<&str>,
    ) -> Result<Vec<Document>, StoreError> {
        let sql = format!(
            "SELECT id::text AS id, collection, data FROM {} WHERE collection = $1",
            quoted_table(table)?
        );
        debug!("{} [{}]", sql, collection);

        let rows = sqlx::query(&sql).bind(collection).fetch_all(&self.pool).await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn insert(
        &self,
        table: &str,
        document: NewDocument,
        _access_token: Option<&str>,
    ) -> Result<Document, StoreError> {
        let sql = format!(
            "INSERT INTO {} (collection, data) VALUES ($1, $2) RETURNING id::text AS id, collection, data",
            quoted_table(table)?
        );

        let row = sqlx::query(&sql)
            .bind(&document.collection)
            .bind(sqlx::types::Json(&document.data))
            .fetch_one(&self.pool)
            .await?;
        document_from_row(&row)
    }

    async fn delete(
        &self,
        table: &str,
        id: &DocumentId,
        _access_token: Option<&str>,
    ) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE id::text = $1", quoted_table(table)?);

        let result = sqlx::query(&sql).bind(id.as_str()).execute(&self.pool).await?;
        debug!("Deleted {} row(s) for id {}", result.rows_affected(), id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_identifier("app_universal"), "\"app_universal\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn rejects_invalid_table_before_quoting() {
        assert!(matches!(quoted_table("x; DROP TABLE y"), Err(StoreError::InvalidTable(_))));
        assert_eq!(quoted_table("docs").unwrap(), "\"docs\"");
    }
}
