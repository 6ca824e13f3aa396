use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::app::PortfolioApp;
use crate::auth::{AuthError, AuthProvider, GoTrueProvider, MemoryAuthProvider, SessionManager};
use crate::config::{AppConfig, ConfigError, StoreDriver};
use crate::error::AppError;
use crate::portfolio::PortfolioClient;
use crate::store::{DocumentStore, MemoryStore, PgDocumentStore, PostgrestStore};

pub fn get_config_dir() -> anyhow::Result<PathBuf> {
    let config_dir = if let Ok(custom_dir) = std::env::var("PORTFOLIO_CLI_CONFIG_DIR") {
        PathBuf::from(custom_dir)
    } else {
        let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME environment variable not set"))?;
        PathBuf::from(home).join(".config").join("portfolio")
    };

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Where the auth provider keeps its session between runs, if anywhere
pub fn session_file(config: &AppConfig) -> Option<PathBuf> {
    if !config.auth.persist_session {
        return None;
    }
    if let Some(path) = &config.auth.session_file {
        return Some(path.clone());
    }
    match get_config_dir() {
        Ok(dir) => Some(dir.join("session.json")),
        Err(e) => {
            warn!("Session will not persist: {}", e);
            None
        }
    }
}

/// Wire providers, store and view according to `config`
pub async fn build_app(config: &AppConfig) -> Result<PortfolioApp, AppError> {
    let http = config.network.http_client().map_err(AuthError::from)?;

    let provider: Arc<dyn AuthProvider> = match (&config.backend.url, config.store.driver) {
        (None, StoreDriver::Memory) => {
            warn!("No backend configured; accounts live only for this process");
            Arc::new(MemoryAuthProvider::new())
        }
        _ => {
            let url = config.backend.require_url()?;
            let key = config.backend.require_anon_key()?;
            let mut gotrue = GoTrueProvider::with_client(http.clone(), url, key);
            if let Some(path) = session_file(config) {
                debug!("Session cache at {}", path.display());
                gotrue = gotrue.with_session_file(path);
            }
            Arc::new(gotrue)
        }
    };

    let store: Arc<dyn DocumentStore> = match config.store.driver {
        StoreDriver::Rest => {
            let url = config.backend.require_url()?;
            let key = config.backend.require_anon_key()?;
            Arc::new(PostgrestStore::with_client(http, url, key))
        }
        StoreDriver::Postgres => {
            let database_url = config
                .store
                .database_url
                .as_deref()
                .ok_or(ConfigError::Missing("DATABASE_URL"))?;
            let store = PgDocumentStore::connect(
                database_url,
                config.store.max_connections,
                config.network.request_timeout(),
            )
            .await?;
            store.ensure_table(&config.store.table).await?;
            Arc::new(store)
        }
        StoreDriver::Memory => Arc::new(MemoryStore::new()),
    };

    let sessions = SessionManager::with_refresh_leeway(
        provider,
        config.network.request_timeout(),
        chrono::Duration::seconds(config.auth.refresh_leeway_secs),
    );

    let client = PortfolioClient::new(store)
        .with_table(config.store.table.clone())
        .with_sessions(sessions.clone())
        .with_request_timeout(config.network.request_timeout());

    Ok(PortfolioApp::new(sessions, client, config.store.collection.clone()))
}
