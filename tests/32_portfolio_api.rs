mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::{MockBackend, TABLE, TAG};
use portfolio_cms::auth::SessionManager;
use portfolio_cms::store::{DocumentStore, PostgrestStore, StoreError};
use portfolio_cms::types::{DocumentId, NewDocument, NewProject};
use portfolio_cms::PortfolioClient;
use serde_json::json;

fn project() -> NewProject {
    NewProject {
        title: "Rust CLI tool".into(),
        description: "A command-line utility".into(),
        link: "https://github.com/u/cli".into(),
        tech: "Rust, Clap".into(),
    }
}

async fn signed_in(backend: &MockBackend, email: &str) -> Result<(SessionManager, PortfolioClient)> {
    let sessions = SessionManager::new(Arc::new(backend.provider()), Duration::from_secs(5));
    sessions.sign_up(email, "hunter22").await?;
    let client = PortfolioClient::new(Arc::new(backend.store()))
        .with_table(TABLE)
        .with_sessions(sessions.clone());
    Ok((sessions, client))
}

#[tokio::test]
async fn create_then_list_round_trip() -> Result<()> {
    let backend = MockBackend::spawn().await?;
    let (_sessions, client) = signed_in(&backend, "dev@example.com").await?;

    let created = client.create_item(TAG, &project(), "dev@example.com").await?;
    assert!(created.data.image_id < 1000);
    assert_eq!(created.collection, TAG);

    let items = client.list_items(TAG).await?;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, created.id);
    assert_eq!(items[0].data.title, "Rust CLI tool");
    assert_eq!(items[0].owner_email(), "dev@example.com");
    Ok(())
}

#[tokio::test]
async fn listing_is_scoped_to_the_collection_tag() -> Result<()> {
    let backend = MockBackend::spawn().await?;
    backend.state.seed_row("another_app", json!({ "title": "Foreign", "description": "x", "link": "https://x.io", "tech": "Go", "email": "z@x.com", "imageId": 1 }));
    backend.state.seed_row(TAG, json!({ "title": "Ours", "description": "y", "link": "https://y.io", "tech": "Rust", "email": "a@x.com", "imageId": 2 }));
    backend.state.seed_row(TAG, json!({ "unexpected": true }));

    let client = PortfolioClient::new(Arc::new(backend.store())).with_table(TABLE);
    let items = client.list_items(TAG).await?;
    assert_eq!(items.len(), 1);
    assert!(items.iter().all(|item| item.collection == TAG));
    assert_eq!(items[0].data.title, "Ours");

    // Listing is idempotent
    assert_eq!(client.list_items(TAG).await?, items);
    Ok(())
}

#[tokio::test]
async fn anonymous_insert_is_refused_by_the_backend() -> Result<()> {
    let backend = MockBackend::spawn().await?;
    let client = PortfolioClient::new(Arc::new(backend.store())).with_table(TABLE);

    let err = client.create_item(TAG, &project(), "dev@example.com").await.unwrap_err();
    assert!(matches!(err, StoreError::Unauthorized(_)));
    assert_eq!(backend.state.row_count(), 0);
    Ok(())
}

#[tokio::test]
async fn validation_failure_sends_nothing() -> Result<()> {
    let backend = MockBackend::spawn().await?;
    let (_sessions, client) = signed_in(&backend, "dev@example.com").await?;

    let mut bad = project();
    bad.title = String::new();
    let err = client.create_item(TAG, &bad, "dev@example.com").await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(ref f) if f.contains("title")));
    assert_eq!(backend.state.table_requests.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn only_the_owner_deletes() -> Result<()> {
    let backend = MockBackend::spawn().await?;
    let (_alice_sessions, alice) = signed_in(&backend, "alice@example.com").await?;
    let (_bob_sessions, bob) = signed_in(&backend, "bob@example.com").await?;

    let item = alice.create_item(TAG, &project(), "alice@example.com").await?;
    let before = backend.state.table_requests.load(Ordering::SeqCst);

    let err = bob.delete_item(&item.id, "bob@example.com", "alice@example.com").await.unwrap_err();
    assert!(matches!(err, StoreError::Unauthorized(_)));
    assert_eq!(backend.state.table_requests.load(Ordering::SeqCst), before);
    assert_eq!(alice.list_items(TAG).await?.len(), 1);

    alice.delete_item(&item.id, "alice@example.com", "alice@example.com").await?;
    assert!(alice.list_items(TAG).await?.is_empty());

    // Already gone
    alice.delete_item(&item.id, "alice@example.com", "alice@example.com").await?;
    Ok(())
}

#[tokio::test]
async fn unknown_table_is_reported() -> Result<()> {
    let backend = MockBackend::spawn().await?;
    let store = backend.store();

    let err = store.select("missing_table", TAG, None).await.unwrap_err();
    assert_eq!(err, StoreError::InvalidTable("missing_table".into()));

    let err = store
        .insert("bad-name", NewDocument { collection: TAG.into(), data: json!({}) }, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTable(_)));
    Ok(())
}

#[tokio::test]
async fn backend_failures_are_unavailable() -> Result<()> {
    let backend = MockBackend::spawn().await?;
    backend.state.failing.store(true, Ordering::SeqCst);
    let client = PortfolioClient::new(Arc::new(backend.store())).with_table(TABLE);
    assert!(matches!(client.list_items(TAG).await, Err(StoreError::Unavailable(_))));

    let offline = PostgrestStore::new(common::unreachable_url(), common::ANON_KEY);
    let err = offline.delete(TABLE, &DocumentId::from("1"), None).await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));
    Ok(())
}
