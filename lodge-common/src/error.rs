// lodge-common/src/error.rs
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum LodgeError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("TOML Parsing Error: {0}")]
    Toml(#[from] Arc<toml::de::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Network failure for '{0}': {1}")]
    Network(String, String),

    #[error("Unexpected content: {0}")]
    UnexpectedContent(String),

    #[error("Bad archive {0}: {1}")]
    BadArchive(String, String),

    #[error("Layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("Runtime failure: {0}")]
    RuntimeFailure(String),

    #[error("Validation Error: {0}")]
    ValidationError(String),

    #[error("Installation Error: {0}")]
    InstallError(String),

    #[error("Failed to execute command: {0}")]
    CommandExecError(String),

    #[error("Generic Error: {0}")]
    Generic(String),
}

impl LodgeError {
    /// Whether the fetcher may spend another attempt on this failure.
    ///
    /// Extraction and layout failures are deterministic for the same bytes,
    /// so only transport and content-classification failures qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LodgeError::Network(..)
                | LodgeError::Http(_)
                | LodgeError::UnexpectedContent(_)
        )
    }
}

impl From<std::io::Error> for LodgeError {
    fn from(err: std::io::Error) -> Self {
        LodgeError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for LodgeError {
    fn from(err: reqwest::Error) -> Self {
        LodgeError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for LodgeError {
    fn from(err: serde_json::Error) -> Self {
        LodgeError::Json(Arc::new(err))
    }
}

impl From<toml::de::Error> for LodgeError {
    fn from(err: toml::de::Error) -> Self {
        LodgeError::Toml(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, LodgeError>;
