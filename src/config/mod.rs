pub mod credentials;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use credentials::Credentials;

/// Default name of the shared document table
pub const DEFAULT_TABLE: &str = "app_universal";

/// Collection tag partitioning this application's rows inside the shared table
pub const DEFAULT_COLLECTION: &str = "fa_a_um_template_de_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("Unknown store driver: {0}")]
    UnknownDriver(String),

    #[error("Failed to read credentials file {path}: {source}")]
    CredentialsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub backend: BackendConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
    /// Problems met while building, reported once logging is up
    #[serde(skip)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

/// Hosted backend endpoint and its public (anon) key
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: Option<String>,
    #[serde(skip_serializing)]
    pub anon_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreDriver {
    /// Table API over HTTP
    Rest,
    /// Direct connection to the backing Postgres database
    Postgres,
    /// Process-local rows, lost on exit
    Memory,
}

impl std::str::FromStr for StoreDriver {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rest" | "http" | "postgrest" => Ok(StoreDriver::Rest),
            "postgres" | "pg" => Ok(StoreDriver::Postgres),
            "memory" | "mem" => Ok(StoreDriver::Memory),
            other => Err(ConfigError::UnknownDriver(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub driver: StoreDriver,
    pub table: String,
    pub collection: String,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Keep the provider's session cache on disk between runs
    pub persist_session: bool,
    pub session_file: Option<PathBuf>,
    /// Refresh sessions expiring within this many seconds
    pub refresh_leeway_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url)
            .field("anon_key", &self.anon_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl BackendConfig {
    /// Base URL without trailing slash; required by the HTTP adapters
    pub fn require_url(&self) -> Result<url::Url, ConfigError> {
        let raw = self.url.as_deref().ok_or(ConfigError::Missing("SUPABASE_URL"))?;
        let parsed = url::Url::parse(raw.trim_end_matches('/'))
            .map_err(|_| ConfigError::InvalidUrl(raw.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => Ok(parsed),
            _ => Err(ConfigError::InvalidUrl(raw.to_string())),
        }
    }

    pub fn require_anon_key(&self) -> Result<&str, ConfigError> {
        self.anon_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::Missing("SUPABASE_ANON_KEY"))
    }
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// HTTP client shared by the auth and table adapters
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout())
            .timeout(self.request_timeout())
            .user_agent(concat!("portfolio-cms/", env!("CARGO_PKG_VERSION")))
            .build()
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup("APP_ENV").as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            Some("staging") | Some("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        let mut config = match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_overrides(&lookup);

        if let Some(path) = lookup("PORTFOLIO_CREDENTIALS_FILE") {
            match Credentials::load(&path) {
                Ok(credentials) => config.merge_credentials(credentials),
                Err(e) => config.warnings.push(format!("Ignoring credentials file: {}", e)),
            }
        }

        config
    }

    fn with_overrides<F>(mut self, lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Backend
        if let Some(v) = lookup("SUPABASE_URL") {
            self.backend.url = Some(v);
        }
        if let Some(v) = lookup("SUPABASE_ANON_KEY").or_else(|| lookup("SUPABASE_KEY")) {
            self.backend.anon_key = Some(v);
        }

        // Store
        if let Some(v) = lookup("PORTFOLIO_STORE") {
            match v.parse() {
                Ok(driver) => self.store.driver = driver,
                Err(e) => {
                    let warning = format!("{} - keeping {:?}", e, self.store.driver);
                    self.warnings.push(warning);
                }
            }
        }
        if let Some(v) = lookup("PORTFOLIO_TABLE") {
            self.store.table = v;
        }
        if let Some(v) = lookup("PORTFOLIO_COLLECTION") {
            self.store.collection = v;
        }
        if let Some(v) = lookup("DATABASE_URL") {
            self.store.database_url = Some(v);
        }
        if let Some(v) = lookup("DATABASE_MAX_CONNECTIONS") {
            self.store.max_connections = v.parse().unwrap_or(self.store.max_connections);
        }

        // Auth
        if let Some(v) = lookup("PORTFOLIO_PERSIST_SESSION") {
            self.auth.persist_session = v.parse().unwrap_or(self.auth.persist_session);
        }
        if let Some(v) = lookup("PORTFOLIO_SESSION_FILE") {
            self.auth.session_file = Some(PathBuf::from(v));
        }

        // Network
        if let Some(v) = lookup("PORTFOLIO_REQUEST_TIMEOUT_SECS") {
            match v.parse() {
                Ok(secs) => self.network.request_timeout_secs = secs,
                Err(_) => self.warnings.push(format!(
                    "Invalid PORTFOLIO_REQUEST_TIMEOUT_SECS {:?} - keeping {}s",
                    v, self.network.request_timeout_secs
                )),
            }
        }

        // Logging
        if let Some(v) = lookup("PORTFOLIO_LOG") {
            self.logging.filter = v;
        }

        self
    }

    /// Fill backend settings from a credentials file. Values already set
    /// through the environment win.
    pub fn merge_credentials(&mut self, credentials: Credentials) {
        if self.backend.url.is_none() {
            self.backend.url = credentials.backend_url;
        }
        if self.backend.anon_key.is_none() {
            self.backend.anon_key = credentials.backend_key;
        }
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            backend: BackendConfig::default(),
            store: StoreConfig {
                driver: StoreDriver::Rest,
                table: DEFAULT_TABLE.to_string(),
                collection: DEFAULT_COLLECTION.to_string(),
                database_url: None,
                max_connections: 5,
            },
            auth: AuthConfig {
                persist_session: true,
                session_file: None,
                refresh_leeway_secs: 30,
            },
            network: NetworkConfig {
                request_timeout_secs: 15,
                connect_timeout_secs: 10,
            },
            logging: LoggingConfig {
                filter: "portfolio_cms=debug,warn".to_string(),
            },
            warnings: Vec::new(),
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            network: NetworkConfig {
                request_timeout_secs: 15,
                connect_timeout_secs: 5,
            },
            logging: LoggingConfig {
                filter: "portfolio_cms=info,warn".to_string(),
            },
            ..Self::development()
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            store: StoreConfig {
                max_connections: 10,
                ..Self::development().store
            },
            network: NetworkConfig {
                request_timeout_secs: 10,
                connect_timeout_secs: 5,
            },
            logging: LoggingConfig {
                filter: "warn".to_string(),
            },
            ..Self::development()
        }
    }
}

// Process-wide configuration, read once by the binary
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

pub fn config() -> &'static AppConfig {
    &CONFIG
}
