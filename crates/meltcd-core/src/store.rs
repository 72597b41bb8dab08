//! Durable application records in `<home>/applications.yaml`.
//!
//! Only [`Spec`]s are stored. Health and live state are runtime-only and are
//! rebuilt by the first tick after a restart.

use crate::application::Spec;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ApplicationsFile {
    #[serde(default)]
    applications: Vec<Spec>,
}

#[derive(Debug, Clone)]
pub struct SpecStore {
    path: PathBuf,
}

impl SpecStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored specs in file order. A missing file is an empty set.
    pub fn load(&self) -> Result<Vec<Spec>> {
        let file: Option<ApplicationsFile> = crate::io::read_yaml(&self.path)?;
        Ok(file.map(|f| f.applications).unwrap_or_default())
    }

    /// Replace the whole file. Specs are written sorted by name so the file
    /// diffs cleanly.
    pub fn save(&self, specs: &[Spec]) -> Result<()> {
        let mut applications = specs.to_vec();
        applications.sort_by(|a, b| a.name.cmp(&b.name));
        crate::io::write_yaml(&self.path, &ApplicationsFile { applications })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::Source;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = SpecStore::new(dir.path().join("applications.yaml"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_sorts_and_reloads() {
        let dir = TempDir::new().unwrap();
        let store = SpecStore::new(dir.path().join("applications.yaml"));
        let web = Spec::new("web", Source::new("https://example.com/org/web", "deploy.yaml"))
            .with_refresh_timer("30s");
        let api = Spec::new("api", Source::new("https://example.com/org/api", "stack.yaml"));
        store.save(&[web.clone(), api.clone()]).unwrap();

        assert_eq!(store.load().unwrap(), vec![api, web]);
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.starts_with("applications:"));
    }
}
