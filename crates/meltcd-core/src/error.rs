use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeltcdError {
    #[error("invalid refresh interval '{0}': expected a duration like \"3m30s\"")]
    InvalidRefreshInterval(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid application spec: {0}")]
    InvalidSpec(String),

    #[error("source unavailable: {url}: {reason}")]
    SourceUnavailable { url: String, reason: String },

    #[error("manifest not found at '{path}'")]
    ManifestNotFound { path: String },

    #[error("manifest is malformed: {0}")]
    ManifestInvalid(String),

    #[error("manifest error in '{service}': {reason}")]
    ManifestSemantic { service: String, reason: String },

    #[error("backend rejected service '{service}': {reason}")]
    ApplyRejected { service: String, reason: String },

    #[error("orchestration backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("application already exists: {0}")]
    DuplicateName(String),

    #[error("application not found: {0}")]
    NotFound(String),

    #[error("git executable not found on PATH")]
    GitNotInstalled,

    #[error("home directory not found: set HOME or MELTCD_HOME")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl MeltcdError {
    /// Configuration errors halt a reconciliation loop for good; everything
    /// else is retried on the next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MeltcdError::InvalidRefreshInterval(_))
    }

    /// Stable short name used in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            MeltcdError::InvalidRefreshInterval(_) => "config_error",
            MeltcdError::InvalidConfig(_) => "invalid_config",
            MeltcdError::InvalidSpec(_) => "invalid_spec",
            MeltcdError::SourceUnavailable { .. } => "source_unavailable",
            MeltcdError::ManifestNotFound { .. } => "manifest_not_found",
            MeltcdError::ManifestInvalid(_) => "manifest_invalid",
            MeltcdError::ManifestSemantic { .. } => "manifest_semantic_error",
            MeltcdError::ApplyRejected { .. } => "apply_rejected",
            MeltcdError::BackendUnavailable(_) => "backend_unavailable",
            MeltcdError::DuplicateName(_) => "duplicate_name",
            MeltcdError::NotFound(_) => "not_found",
            MeltcdError::GitNotInstalled => "git_not_installed",
            MeltcdError::HomeNotFound => "home_not_found",
            MeltcdError::Io(_) => "io",
            MeltcdError::Yaml(_) => "yaml",
            MeltcdError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, MeltcdError>;
