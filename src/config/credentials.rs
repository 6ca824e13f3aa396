//! `credentials.txt` reader.
//!
//! The file is free-form text; only marker lines are read:
//!
//! ```text
//! > SUPABASE URL = "https://xyz.supabase.co"
//! > SUPABASE KEY = 'eyJhbGciOi...'
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;

use super::ConfigError;

static BACKEND_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#">\s*SUPABASE URL\s*=?\s*["'](.*?)["']"#).expect("valid regex"));

static BACKEND_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#">\s*SUPABASE KEY\s*=?\s*["'](.*?)["']"#).expect("valid regex"));

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub backend_url: Option<String>,
    pub backend_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("backend_url", &self.backend_url)
            .field("backend_key", &self.backend_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::CredentialsFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let capture = |re: &Regex| {
            re.captures(content)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .filter(|s| !s.is_empty())
        };

        Self {
            backend_url: capture(&BACKEND_URL),
            backend_key: capture(&BACKEND_KEY),
        }
    }
}
