use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{validate_table_name, DocumentStore, StoreError};
use crate::auth::policy::normalize_email;
use crate::auth::MemoryAuthProvider;
use crate::types::{Document, DocumentId, NewDocument};

/// Process-local document table.
///
/// With `with_row_policy`, writes behave like a table guarded by row-level
/// policies: inserts need a valid token whose email matches `data.email`,
/// and deletes only remove rows owned by the token's user.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Document>>>,
    policy: Option<Arc<MemoryAuthProvider>>,
    offline: AtomicBool,
    insert_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row_policy(mut self, auth: Arc<MemoryAuthProvider>) -> Self {
        self.policy = Some(auth);
        self
    }

    /// Simulate an unreachable backend
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().get(table).map_or(0, Vec::len)
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Document>>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }

    /// Email of the token's user when a row policy is active
    fn policy_email(&self, access_token: Option<&str>) -> Result<Option<String>, StoreError> {
        let auth = match &self.policy {
            Some(auth) => auth,
            None => return Ok(None),
        };
        let token = access_token.ok_or_else(|| StoreError::Unauthorized("sign-in required".to_string()))?;
        let user = auth
            .verify(token)
            .map_err(|e| StoreError::Unauthorized(e.to_string()))?;
        Ok(Some(normalize_email(&user.email)))
    }
}

fn row_owner(document: &Document) -> Option<String> {
    document
        .data
        .get("email")
        .and_then(|v| v.as_str())
        .map(normalize_email)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn select(
        &self,
        table: &str,
        collection: &str,
        _access_token: Option<&str>,
    ) -> Result<Vec<Document>, StoreError> {
        validate_table_name(table)?;
        self.ensure_online()?;

        let tables = self.lock();
        Ok(tables
            .get(table)
            .map(|rows| rows.iter().filter(|d| d.collection == collection).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(
        &self,
        table: &str,
        document: NewDocument,
        access_token: Option<&str>,
    ) -> Result<Document, StoreError> {
        validate_table_name(table)?;
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;

        let stored = Document {
            id: DocumentId::new(Uuid::new_v4().to_string()),
            collection: document.collection,
            data: document.data,
        };

        if let Some(email) = self.policy_email(access_token)? {
            if row_owner(&stored).as_deref() != Some(email.as_str()) {
                return Err(StoreError::Unauthorized(
                    "new row violates row-level security policy".to_string(),
                ));
            }
        }

        debug!("Inserted {} into {}", stored.id, table);
        self.lock().entry(table.to_string()).or_default().push(stored.clone());
        Ok(stored)
    }

    async fn delete(
        &self,
        table: &str,
        id: &DocumentId,
        access_token: Option<&str>,
    ) -> Result<(), StoreError> {
        validate_table_name(table)?;
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;

        let owner = self.policy_email(access_token)?;
        let mut tables = self.lock();
        if let Some(rows) = tables.get_mut(table) {
            // Rows the policy hides are silently kept, like a filtered DELETE
            rows.retain(|d| {
                let visible = owner.is_none() || row_owner(d) == owner;
                !(d.id == *id && visible)
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthProvider;
    use serde_json::json;

    fn doc(collection: &str, email: &str) -> NewDocument {
        NewDocument {
            collection: collection.to_string(),
            data: json!({ "title": "T", "email": email }),
        }
    }

    #[tokio::test]
    async fn select_filters_by_collection() {
        let store = MemoryStore::new();
        store.insert("docs", doc("mine", "a@x.com"), None).await.unwrap();
        store.insert("docs", doc("theirs", "a@x.com"), None).await.unwrap();

        let rows = store.select("docs", "mine", None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows.iter().all(|d| d.collection == "mine"));
        assert!(store.select("other", "mine", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_of_missing_id_is_a_noop() {
        let store = MemoryStore::new();
        store.delete("docs", &DocumentId::from("nope"), None).await.unwrap();
        assert_eq!(store.delete_calls(), 1);
    }

    #[tokio::test]
    async fn row_policy_guards_writes() {
        let auth = Arc::new(MemoryAuthProvider::new());
        let alice = auth.sign_up("alice@x.com", "hunter22").await.unwrap();
        let bob = auth.sign_up("bob@x.com", "hunter22").await.unwrap();
        let store = MemoryStore::new().with_row_policy(auth);

        let err = store.insert("docs", doc("c", "alice@x.com"), None).await.unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));

        let err = store
            .insert("docs", doc("c", "alice@x.com"), Some(&bob.access_token))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));

        let row = store
            .insert("docs", doc("c", "Alice@X.com"), Some(&alice.access_token))
            .await
            .unwrap();

        store.delete("docs", &row.id, Some(&bob.access_token)).await.unwrap();
        assert_eq!(store.row_count("docs"), 1);
        store.delete("docs", &row.id, Some(&alice.access_token)).await.unwrap();
        assert_eq!(store.row_count("docs"), 0);
    }

    #[tokio::test]
    async fn offline_store_is_unavailable() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = store.select("docs", "c", None).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
