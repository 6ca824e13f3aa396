// portfolio/mod.rs - Collection-scoped project entries on top of a DocumentStore

pub mod validate;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::auth::policy::normalize_email;
use crate::auth::SessionManager;
use crate::config::DEFAULT_TABLE;
use crate::store::{DocumentStore, FieldErrors, StoreError};
use crate::types::{DocumentId, NewDocument, NewProject, PortfolioItem, ProjectData};

pub use validate::validate_new_project;

/// Upper bound (exclusive) of the placeholder image selector
pub const IMAGE_ID_RANGE: u32 = 1000;

/// CRUD for portfolio items. Bearer credentials come from the attached
/// session manager, if any; identities for ownership checks are explicit.
#[derive(Clone)]
pub struct PortfolioClient {
    store: Arc<dyn DocumentStore>,
    sessions: Option<SessionManager>,
    table: String,
    request_timeout: Duration,
}

impl PortfolioClient {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            sessions: None,
            table: DEFAULT_TABLE.to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_sessions(mut self, sessions: SessionManager) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Every item tagged `collection_tag`, in backend order
    pub async fn list_items(&self, collection_tag: &str) -> Result<Vec<PortfolioItem>, StoreError> {
        let token = self.access_token();
        let rows = self
            .bounded(self.store.select(&self.table, collection_tag, token.as_deref()))
            .await?;

        let total = rows.len();
        let items: Vec<PortfolioItem> = rows
            .into_iter()
            .filter(|row| row.collection == collection_tag)
            .filter_map(|row| {
                let id = row.id.clone();
                match PortfolioItem::try_from(row) {
                    Ok(item) => Some(item),
                    Err(e) => {
                        warn!("Skipping item {} with unreadable data: {}", id, e);
                        None
                    }
                }
            })
            .collect();

        if items.len() != total {
            warn!("Listed {} of {} rows for {}", items.len(), total, collection_tag);
        }
        Ok(items)
    }

    /// Validate, stamp owner and placeholder image, insert. Fields are
    /// stored exactly as given.
    pub async fn create_item(
        &self,
        collection_tag: &str,
        payload: &NewProject,
        creator_email: &str,
    ) -> Result<PortfolioItem, StoreError> {
        validate_new_project(payload)?;
        if creator_email.trim().is_empty() {
            let mut errors = FieldErrors::new();
            errors.add("email", "A creator email is required");
            return Err(StoreError::Validation(errors));
        }

        let data = ProjectData {
            title: payload.title.clone(),
            description: payload.description.clone(),
            link: payload.link.clone(),
            tech: payload.tech.clone(),
            email: creator_email.to_string(),
            image_id: rand::thread_rng().gen_range(0..IMAGE_ID_RANGE),
        };
        let document = NewDocument {
            collection: collection_tag.to_string(),
            data: serde_json::to_value(&data).map_err(|e| StoreError::Rejected {
                status: 0,
                message: e.to_string(),
            })?,
        };

        let token = self.access_token();
        let stored = self
            .bounded(self.store.insert(&self.table, document, token.as_deref()))
            .await?;

        let item = PortfolioItem::try_from(stored).map_err(|e| StoreError::Rejected {
            status: 0,
            message: format!("stored row is unreadable: {}", e),
        })?;
        info!("Created item {} in {} for {}", item.id, collection_tag, item.owner_email());
        Ok(item)
    }

    /// Delete `id` on behalf of `requester_email`. Refused without any
    /// backend call unless the requester owns the item.
    pub async fn delete_item(
        &self,
        id: &DocumentId,
        requester_email: &str,
        owner_email: &str,
    ) -> Result<(), StoreError> {
        let requester = normalize_email(requester_email);
        if requester.is_empty() || requester != normalize_email(owner_email) {
            warn!("Refusing delete of {} by non-owner {}", id, requester_email);
            return Err(StoreError::Unauthorized(
                "Only the creator of an item can delete it".to_string(),
            ));
        }

        let token = self.access_token();
        self.bounded(self.store.delete(&self.table, id, token.as_deref()))
            .await?;
        info!("Deleted item {} for {}", id, requester_email);
        Ok(())
    }

    fn access_token(&self) -> Option<String> {
        self.sessions
            .as_ref()
            .and_then(SessionManager::current_session)
            .map(|s| s.access_token)
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "no response within {:?}",
                self.request_timeout
            ))),
        }
    }
}
