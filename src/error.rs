use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EffectError {
    #[error("Not in an effectdeck project. Run 'effectdeck init' first.")]
    NotInitialized,

    #[error("Already initialized. Remove .effectdeck/ to reinitialize.")]
    AlreadyInitialized,

    #[error("Prompt not found: {0}")]
    NotFound(String),

    #[error("Validation failed for field '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Catalog '{0}' is read-only")]
    ReadOnlyCatalog(String),

    #[error("Corrupt document {}: {message}", path.display())]
    CorruptCatalog { path: PathBuf, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Store is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl EffectError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        EffectError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// True for failures of the underlying storage or network, as opposed to
    /// not-found and validation outcomes.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            EffectError::Transport(_)
                | EffectError::Http { .. }
                | EffectError::Storage(_)
                | EffectError::Io(_)
        )
    }
}

impl From<reqwest::Error> for EffectError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => EffectError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => EffectError::Transport(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EffectError>;
