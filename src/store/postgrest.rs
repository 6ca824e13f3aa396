use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{validate_table_name, DocumentStore, StoreError};
use crate::types::{Document, DocumentId, NewDocument};

#[derive(Debug, Default, Deserialize)]
struct PostgrestErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

impl PostgrestErrorBody {
    fn describe(&self) -> String {
        match (&self.message, &self.details) {
            (Some(m), Some(d)) => format!("{} ({})", m, d),
            (Some(m), None) => m.clone(),
            (None, Some(d)) => d.clone(),
            (None, None) => self.code.clone().unwrap_or_default(),
        }
    }
}

/// Table adapter speaking the hosted backend's REST dialect
pub struct PostgrestStore {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl PostgrestStore {
    pub fn new(base_url: url::Url, anon_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, anon_key)
    }

    pub fn with_client(client: Client, base_url: url::Url, anon_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }

    fn table_url(&self, table: &str) -> Result<String, StoreError> {
        validate_table_name(table)?;
        Ok(format!("{}/rest/v1/{}", self.base_url, table))
    }

    fn authorized(&self, request: RequestBuilder, access_token: Option<&str>) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token.unwrap_or(self.anon_key.as_str()))
    }

    async fn check(table: &str, response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.json::<PostgrestErrorBody>().await.unwrap_or_default();
        let message = body.describe();
        debug!("Table API answered {}: {}", status, message);

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized(message),
            StatusCode::NOT_FOUND => StoreError::InvalidTable(table.to_string()),
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => StoreError::Unavailable(message),
            s if s.is_server_error() => StoreError::Unavailable(format!("{}: {}", s, message)),
            s => StoreError::Rejected {
                status: s.as_u16(),
                message,
            },
        })
    }
}

/// Decode rows one by one so a single malformed row does not hide the rest
fn decode_rows(rows: Vec<Value>) -> Vec<Document> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<Document>(row) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!("Skipping undecodable row: {}", e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl DocumentStore for PostgrestStore {
    async fn select(
        &self,
        table: &str,
        collection: &str,
        access_token: Option<&str>,
    ) -> Result<Vec<Document>, StoreError> {
        let url = self.table_url(table)?;
        debug!("GET {} collection={}", url, collection);

        let request = self
            .client
            .get(&url)
            .query(&[("select", "*".to_string()), ("collection", format!("eq.{}", collection))]);
        let response = self.authorized(request, access_token).send().await?;
        let response = Self::check(table, response).await?;

        let rows: Vec<Value> = response.json().await.map_err(|e| StoreError::Rejected {
            status: 0,
            message: format!("unexpected select response: {}", e),
        })?;
        Ok(decode_rows(rows))
    }

    async fn insert(
        &self,
        table: &str,
        document: NewDocument,
        access_token: Option<&str>,
    ) -> Result<Document, StoreError> {
        let url = self.table_url(table)?;
        debug!("POST {} collection={}", url, document.collection);

        let request = self
            .client
            .post(&url)
            .header("Prefer", "return=representation")
            .json(&[&document]);
        let response = self.authorized(request, access_token).send().await?;
        let response = Self::check(table, response).await?;

        let rows: Vec<Value> = response.json().await.map_err(|e| StoreError::Rejected {
            status: 0,
            message: format!("unexpected insert response: {}", e),
        })?;
        decode_rows(rows).into_iter().next().ok_or_else(|| StoreError::Rejected {
            status: 0,
            message: "insert returned no row; check the table's read policy".to_string(),
        })
    }

    async fn delete(
        &self,
        table: &str,
        id: &DocumentId,
        access_token: Option<&str>,
    ) -> Result<(), StoreError> {
        let url = self.table_url(table)?;
        debug!("DELETE {} id={}", url, id);

        let request = self.client.delete(&url).query(&[("id", format!("eq.{}", id))]);
        let response = self.authorized(request, access_token).send().await?;
        Self::check(table, response).await?;
        Ok(())
    }
}
