use crate::error::{MeltcdError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// DockerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Docker Engine API base URL of a swarm manager.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Pin the Engine API version, e.g. `"1.43"`. Unversioned when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default = "default_docker_timeout")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:2375".to_string()
}

fn default_docker_timeout() -> u64 {
    30
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_version: None,
            timeout_secs: default_docker_timeout(),
        }
    }
}

impl DockerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// GitConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitConfig {
    /// Explicit `git` executable. Looked up on `PATH` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<PathBuf>,
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,
}

fn default_git_timeout() -> u64 {
    120
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: None,
            timeout_secs: default_git_timeout(),
        }
    }
}

impl GitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub git: GitConfig,
}

impl Config {
    /// Load `<home>/config.yaml`. A missing file yields the defaults.
    pub fn load(home: &Path) -> Result<Self> {
        let path = paths::config_path(home);
        Ok(crate::io::read_yaml(&path)?.unwrap_or_default())
    }

    pub fn save(&self, home: &Path) -> Result<()> {
        crate::io::write_yaml(&paths::config_path(home), self)
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        match url::Url::parse(&self.docker.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "docker.endpoint scheme '{}' is not supported; use http or https",
                    url.scheme()
                ),
            }),
            Err(e) => warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("docker.endpoint '{}' is not a URL: {e}", self.docker.endpoint),
            }),
        }

        if let Some(version) = &self.docker.api_version {
            let ok = version
                .split_once('.')
                .is_some_and(|(major, minor)| {
                    !major.is_empty()
                        && !minor.is_empty()
                        && major.chars().all(|c| c.is_ascii_digit())
                        && minor.chars().all(|c| c.is_ascii_digit())
                });
            if !ok {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("docker.api_version '{version}' should look like '1.43'"),
                });
            }
        }

        if self.docker.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "docker.timeout_secs must be greater than zero".to_string(),
            });
        }
        if self.git.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "git.timeout_secs must be greater than zero".to_string(),
            });
        } else if self.git.timeout_secs < 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "git.timeout_secs={} is short; clones of large repositories may time out",
                    self.git.timeout_secs
                ),
            });
        }

        if let Some(binary) = &self.git.binary {
            if !binary.exists() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("git.binary '{}' does not exist", binary.display()),
                });
            }
        }

        warnings
    }

    /// Fail on the first `Error`-level finding.
    pub fn ensure_valid(&self) -> Result<()> {
        match self
            .validate()
            .into_iter()
            .find(|w| w.level == WarnLevel::Error)
        {
            Some(w) => Err(MeltcdError::InvalidConfig(w.message)),
            None => Ok(()),
        }
    }
}
