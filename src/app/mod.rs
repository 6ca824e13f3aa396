// app/mod.rs - Application context: one session manager, one store client,
// one item-list view, owned by the caller.

pub mod view;

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info};

use crate::auth::{AuthError, SessionManager, Subscription};
use crate::auth::policy::normalize_email;
use crate::portfolio::PortfolioClient;
use crate::store::StoreError;
use crate::types::{AuthStateChange, DocumentId, NewProject, PortfolioItem, Session};

pub use view::{ListState, ListView};

/// Gallery entry as presented to the viewer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GalleryCard {
    #[serde(flatten)]
    pub item: PortfolioItem,
    pub image_url: String,
    pub deletable: bool,
}

pub struct PortfolioApp {
    sessions: SessionManager,
    client: PortfolioClient,
    collection: String,
    view: Mutex<ListView>,
}

impl PortfolioApp {
    pub fn new(sessions: SessionManager, client: PortfolioClient, collection: impl Into<String>) -> Self {
        Self {
            sessions,
            client,
            collection: collection.into(),
            view: Mutex::new(ListView::new()),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Resolve the session and fetch the gallery concurrently. Listing does
    /// not depend on being signed in.
    pub async fn load(&self) -> Option<Session> {
        let (session, fetched) = futures::future::join(self.sessions.initialize(), self.refresh()).await;
        if let Err(e) = fetched {
            debug!("Initial fetch failed: {}", e);
        }
        session
    }

    /// Re-fetch the collection into the view; the last fetch to resolve wins
    pub async fn refresh(&self) -> Result<usize, StoreError> {
        let result = self.client.list_items(&self.collection).await;
        let outcome = match &result {
            Ok(items) => Ok(items.len()),
            Err(e) => Err(e.clone()),
        };
        self.lock_view().apply_fetch(result);
        outcome
    }

    pub fn view(&self) -> ListView {
        self.lock_view().clone()
    }

    /// Pending fetch failure, reported once
    pub fn take_error(&self) -> Option<StoreError> {
        self.lock_view().take_error()
    }

    pub fn can_manage(&self) -> bool {
        self.sessions.is_signed_in()
    }

    pub fn gallery(&self) -> Vec<GalleryCard> {
        let viewer = self.sessions.current_session().map(|s| normalize_email(s.email()));
        self.lock_view()
            .items()
            .iter()
            .map(|item| GalleryCard {
                image_url: item.data.placeholder_image_url(),
                deletable: viewer.as_deref() == Some(normalize_email(item.owner_email()).as_str()),
                item: item.clone(),
            })
            .collect()
    }

    pub async fn add_project(&self, payload: &NewProject) -> Result<PortfolioItem, StoreError> {
        let session = self.require_session().await?;
        let item = self
            .client
            .create_item(&self.collection, payload, session.email())
            .await?;
        self.refresh_after_write().await;
        Ok(item)
    }

    /// Delete an item the signed-in user owns. The owner is read from the
    /// current view, re-fetching once when the id is not in it.
    pub async fn delete_project(&self, id: &DocumentId) -> Result<(), StoreError> {
        let session = self.require_session().await?;

        let mut owner = self.owner_of(id);
        if owner.is_none() {
            self.refresh().await?;
            owner = self.owner_of(id);
        }
        let owner = owner.ok_or_else(|| StoreError::NotFound(id.clone()))?;

        self.client.delete_item(id, session.email(), &owner).await?;
        self.refresh_after_write().await;
        Ok(())
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.sessions.sign_in(email, password).await
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.sessions.sign_up(email, password).await
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.sessions.sign_out().await
    }

    pub fn on_session_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&AuthStateChange) + Send + Sync + 'static,
    {
        self.sessions.subscribe(handler)
    }

    async fn require_session(&self) -> Result<Session, StoreError> {
        self.sessions
            .get_current_session()
            .await
            .ok_or_else(|| StoreError::Unauthorized("Sign in to manage projects".to_string()))
    }

    fn owner_of(&self, id: &DocumentId) -> Option<String> {
        self.lock_view().find(id).map(|item| item.owner_email().to_string())
    }

    async fn refresh_after_write(&self) {
        // The write succeeded; a failed re-fetch only shows up through take_error
        if let Err(e) = self.refresh().await {
            info!("Re-fetch after write failed: {}", e);
        }
    }

    fn lock_view(&self) -> MutexGuard<'_, ListView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryAuthProvider;
    use crate::store::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    const TAG: &str = "fa_a_um_template_de_";

    fn app() -> (Arc<MemoryStore>, PortfolioApp) {
        let auth = Arc::new(MemoryAuthProvider::new());
        let sessions = SessionManager::new(auth, Duration::from_secs(5));
        let store = Arc::new(MemoryStore::new());
        let client = PortfolioClient::new(store.clone()).with_sessions(sessions.clone());
        (store, PortfolioApp::new(sessions, client, TAG))
    }

    fn project(title: &str) -> NewProject {
        NewProject {
            title: title.into(),
            description: "Y".into(),
            link: "https://e.com".into(),
            tech: "Rust".into(),
        }
    }

    #[tokio::test]
    async fn anonymous_viewer_sees_gallery_without_controls() {
        let (_, app) = app();
        app.sign_up("a@x.com", "hunter22").await.unwrap();
        app.add_project(&project("X")).await.unwrap();
        app.sign_out().await.unwrap();

        app.load().await;
        assert!(!app.can_manage());
        let cards = app.gallery();
        assert_eq!(cards.len(), 1);
        assert!(!cards[0].deletable);
    }

    #[tokio::test]
    async fn management_requires_a_session() {
        let (store, app) = app();
        app.load().await;
        let err = app.add_project(&project("X")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));
        assert_eq!(store.insert_calls(), 0);
    }

    #[tokio::test]
    async fn add_and_delete_refresh_the_view() {
        let (_, app) = app();
        app.load().await;
        assert_eq!(app.view().state(), &ListState::Empty);

        app.sign_up("a@x.com", "hunter22").await.unwrap();
        let item = app.add_project(&project("X")).await.unwrap();
        assert_eq!(app.view().items().len(), 1);
        assert!(app.gallery()[0].deletable);

        app.delete_project(&item.id).await.unwrap();
        assert_eq!(app.view().state(), &ListState::Empty);
    }

    #[tokio::test]
    async fn delete_of_unknown_id_is_not_found() {
        let (store, app) = app();
        app.sign_up("a@x.com", "hunter22").await.unwrap();
        let err = app.delete_project(&DocumentId::from("missing")).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound(DocumentId::from("missing")));
        assert_eq!(store.delete_calls(), 0);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_list() {
        let (store, app) = app();
        app.sign_up("a@x.com", "hunter22").await.unwrap();
        app.add_project(&project("X")).await.unwrap();

        store.set_offline(true);
        assert!(app.refresh().await.is_err());
        assert_eq!(app.view().items().len(), 1);
        assert!(matches!(app.take_error(), Some(StoreError::Unavailable(_))));
        assert!(app.take_error().is_none());
    }
}
