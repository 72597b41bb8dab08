//! Private-repository credentials.
//!
//! The core only ever reads credentials. Adding and removing them belongs to
//! whatever owns `credentials.yaml`:
//!
//! ```yaml
//! credentials:
//!   - url: https://example.com/org/repo
//!     username: deploy-bot
//!     secret: ghp_xxx
//! ```

use crate::error::Result;
use crate::io;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Match key. Stored without a trailing slash.
    pub url: String,
    pub username: String,
    pub secret: String,
}

impl Credential {
    pub fn new(url: &str, username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            url: normalize_url(url).to_string(),
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// True when `url` is this credential's URL or lies beneath it.
    pub fn matches(&self, url: &str) -> bool {
        let url = normalize_url(url);
        let key = normalize_url(&self.url);
        url == key
            || url
                .strip_prefix(key)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

pub fn normalize_url(url: &str) -> &str {
    url.trim().trim_end_matches('/')
}

/// Credential lookup consumed by the reconciliation loops. Implementations
/// are shared read-only across every running application.
pub trait CredentialStore: Send + Sync {
    fn find_credential(&self, url: &str) -> Option<Credential>;
}

// ---------------------------------------------------------------------------
// StaticCredentials
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    credentials: Vec<Credential>,
}

/// Fixed set of credentials, typically loaded once from `credentials.yaml`.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    entries: Vec<Credential>,
}

impl StaticCredentials {
    pub fn new(entries: Vec<Credential>) -> Self {
        let entries = entries
            .into_iter()
            .map(|c| Credential::new(&c.url, c.username, c.secret))
            .collect();
        Self { entries }
    }

    /// Load from `path`. A missing file means no private repositories.
    pub fn load(path: &Path) -> Result<Self> {
        let file: Option<CredentialsFile> = io::read_yaml(path)?;
        Ok(file.map(|f| Self::new(f.credentials)).unwrap_or_default())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialStore for StaticCredentials {
    /// The most specific (longest) matching URL wins.
    fn find_credential(&self, url: &str) -> Option<Credential> {
        self.entries
            .iter()
            .filter(|c| c.matches(url))
            .max_by_key(|c| c.url.len())
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
