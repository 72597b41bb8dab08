use crate::error::{MeltcdError, Result};
use crate::manifest::ServiceDefinition;
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const DEFAULT_REFRESH_TIMER: &str = "3m";

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Where an application's manifest lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub repo_url: String,
    /// Manifest path relative to the repository root.
    pub path: String,
    /// Branch, tag or commit. Empty means the remote's default branch.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_revision: String,
    /// Credential lookup key, when it differs from `repo_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl Source {
    pub fn new(repo_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            path: path.into(),
            target_revision: String::new(),
            credential: None,
        }
    }

    /// The URL credentials are looked up by.
    pub fn credential_key(&self) -> &str {
        self.credential.as_deref().unwrap_or(&self.repo_url)
    }

    /// Revision passed to `git fetch`; `HEAD` selects the default branch.
    pub fn revision(&self) -> &str {
        match self.target_revision.trim() {
            "" => "HEAD",
            rev => rev,
        }
    }
}

// ---------------------------------------------------------------------------
// Spec
// ---------------------------------------------------------------------------

/// Persisted application record. This is the shape written to
/// `applications.yaml` and accepted back on reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spec {
    pub name: String,
    pub source: Source,
    /// Go-style duration, e.g. `"3m30s"`. Parsed when the loop starts so a
    /// bad value suspends the application instead of rejecting the record.
    #[serde(default = "default_refresh_timer")]
    pub refresh_timer: String,
}

fn default_refresh_timer() -> String {
    DEFAULT_REFRESH_TIMER.to_string()
}

impl Spec {
    pub fn new(name: impl Into<String>, source: Source) -> Self {
        Self {
            name: name.into(),
            source,
            refresh_timer: default_refresh_timer(),
        }
    }

    pub fn with_refresh_timer(mut self, refresh_timer: impl Into<String>) -> Self {
        self.refresh_timer = refresh_timer.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !paths::is_valid_name(&self.name) {
            return Err(MeltcdError::InvalidSpec(format!(
                "name '{}' must start with a letter or digit and contain only letters, digits, '_', '.', '-'",
                self.name
            )));
        }
        if self.source.repo_url.trim().is_empty() {
            return Err(MeltcdError::InvalidSpec(format!(
                "application '{}' has no repository URL",
                self.name
            )));
        }
        for (field, value) in [
            ("repository URL", &self.source.repo_url),
            ("target revision", &self.source.target_revision),
        ] {
            if value.trim_start().starts_with('-') {
                return Err(MeltcdError::InvalidSpec(format!(
                    "{field} '{value}' must not start with '-'"
                )));
            }
        }
        if !paths::is_contained(Path::new(&self.source.path)) {
            return Err(MeltcdError::InvalidSpec(format!(
                "manifest path '{}' must be relative to the repository root",
                self.source.path
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// Live state matches the target and the last apply succeeded.
    Healthy,
    /// Waiting for the first successful cycle, or an apply is in flight.
    Progressing,
    /// The last fetch, parse or apply failed. Retried on the next tick.
    Degraded,
    /// The loop halted on a configuration error and will not tick again.
    Suspended,
}

impl Health {
    pub fn as_str(self) -> &'static str {
        match self {
            Health::Healthy => "healthy",
            Health::Progressing => "progressing",
            Health::Degraded => "degraded",
            Health::Suspended => "suspended",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AppStatus / Application
// ---------------------------------------------------------------------------

/// Mutable state owned by a reconciliation loop and read by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct AppStatus {
    pub health: Health,
    /// Definitions from the last successful apply. `None` before first sync.
    pub live_state: Option<Vec<ServiceDefinition>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Advisories returned by the backend on the last apply.
    pub warnings: Vec<String>,
}

impl Default for AppStatus {
    fn default() -> Self {
        Self {
            health: Health::Progressing,
            live_state: None,
            last_synced_at: None,
            last_error: None,
            warnings: Vec::new(),
        }
    }
}

/// Point-in-time view of an application for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct Application {
    pub name: String,
    pub source: Source,
    pub refresh_timer: String,
    pub health: Health,
    pub live_state: Option<Vec<ServiceDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub running: bool,
}

impl Application {
    pub fn from_parts(spec: &Spec, status: &AppStatus, running: bool) -> Self {
        Self {
            name: spec.name.clone(),
            source: spec.source.clone(),
            refresh_timer: spec.refresh_timer.clone(),
            health: status.health,
            live_state: status.live_state.clone(),
            last_synced_at: status.last_synced_at,
            last_error: status.last_error.clone(),
            warnings: status.warnings.clone(),
            running,
        }
    }

    /// One-line description of what is deployed, e.g. `web_web=nginx:1.25x3`.
    pub fn live_summary(&self) -> String {
        match &self.live_state {
            None => "none".to_string(),
            Some(defs) => defs
                .iter()
                .map(|d| format!("{}={}x{}", d.name, d.image, d.replicas))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
