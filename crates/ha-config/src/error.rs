use std::path::PathBuf;

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    // ==================== Tags ====================
    #[error("secret '{key}' is not defined in secrets.yaml")]
    SecretNotFound { key: String },

    #[error("environment variable '{var}' is not set")]
    EnvVarNotFound { var: String },

    #[error("invalid include path '{path}': {reason}")]
    InvalidIncludePath { path: String, reason: String },

    /// Target of `!include_dir_*` is missing or not a directory
    #[error("include directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("{path} includes itself")]
    CircularInclude { path: PathBuf },

    // ==================== Values ====================
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
