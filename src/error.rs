use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A logical storage name could not be mapped to a backend address.
    #[error("Storage not found: {0}")]
    Resolution(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid task type: {0}")]
    InvalidTaskType(String),

    #[error("Invalid run mode: {0}")]
    InvalidRunMode(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Backend call {endpoint} failed: {message}")]
    Backend { endpoint: String, message: String },

    #[error("Capability not supported: {0}")]
    UnsupportedCapability(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("State lock poisoned")]
    StatePoisoned,
}

impl CoreError {
    pub fn backend(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// True for failures caused by the transport rather than by the request itself.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Http(_))
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
