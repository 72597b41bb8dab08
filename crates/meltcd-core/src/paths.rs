use crate::error::{MeltcdError, Result};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const HOME_ENV: &str = "MELTCD_HOME";
pub const HOME_DIR: &str = ".meltcd";

pub const CONFIG_FILE: &str = "config.yaml";
pub const APPLICATIONS_FILE: &str = "applications.yaml";
pub const CREDENTIALS_FILE: &str = "credentials.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Resolve the state directory.
///
/// Priority: explicit path, then `MELTCD_HOME`, then `~/.meltcd`.
pub fn resolve_home(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Some(p) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(p));
    }
    home::home_dir()
        .map(|h| h.join(HOME_DIR))
        .ok_or(MeltcdError::HomeNotFound)
}

pub fn config_path(home: &Path) -> PathBuf {
    home.join(CONFIG_FILE)
}

pub fn applications_path(home: &Path) -> PathBuf {
    home.join(APPLICATIONS_FILE)
}

pub fn credentials_path(home: &Path) -> PathBuf {
    home.join(CREDENTIALS_FILE)
}

/// True when `path` is relative and never climbs above its starting point.
pub fn is_contained(path: &Path) -> bool {
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    depth > 0
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").unwrap())
}

/// Longest name swarm accepts for a service.
pub const MAX_NAME_LEN: usize = 63;

/// Application and service names end up in swarm service names, which
/// accept the same character set.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LEN && name_re().is_match(name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
