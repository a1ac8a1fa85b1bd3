use thiserror::Error;

/// layerbox error types
#[derive(Error, Debug)]
pub enum BuildError {
    /// Build configuration is structurally incomplete
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The container runtime cannot be reached or used
    #[error("Runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The runtime refused to allocate another resource
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Unknown container handle, image, path, or hook
    #[error("Not found: {0}")]
    NotFound(String),

    /// Archive stream corruption or destination path error
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Build cache backing store is unreachable
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Transport failure while talking to a registry
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Malformed image reference or tag
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// A commit or post-build hook rejected the candidate
    #[error("Hook failed: {hook} - {message}")]
    HookFailed { hook: String, message: String },

    /// A step command exited unsuccessfully
    #[error("Step failed (exit {exit_code}): {command}")]
    StepFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Fieldless discriminant of [`BuildError`], convenient for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigInvalid,
    RuntimeUnavailable,
    ResourceExhausted,
    NotFound,
    TransferFailed,
    CacheUnavailable,
    NetworkError,
    InvalidReference,
    HookFailed,
    StepFailed,
    Io,
    Serialization,
}

impl BuildError {
    /// Return the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            BuildError::RuntimeUnavailable(_) => ErrorKind::RuntimeUnavailable,
            BuildError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            BuildError::NotFound(_) => ErrorKind::NotFound,
            BuildError::TransferFailed(_) => ErrorKind::TransferFailed,
            BuildError::CacheUnavailable(_) => ErrorKind::CacheUnavailable,
            BuildError::NetworkError(_) => ErrorKind::NetworkError,
            BuildError::InvalidReference(_) => ErrorKind::InvalidReference,
            BuildError::HookFailed { .. } => ErrorKind::HookFailed,
            BuildError::StepFailed { .. } => ErrorKind::StepFailed,
            BuildError::IoError(_) => ErrorKind::Io,
            BuildError::SerializationError(_) => ErrorKind::Serialization,
        }
    }

    /// Wrap an error returned by a hook as [`BuildError::HookFailed`].
    ///
    /// Errors that already are hook failures pass through unchanged.
    pub fn hook_failed(hook: &str, err: BuildError) -> Self {
        match err {
            BuildError::HookFailed { .. } => err,
            other => BuildError::HookFailed {
                hook: hook.to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for BuildError {
    fn from(err: serde_json::Error) -> Self {
        BuildError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for BuildError {
    fn from(err: serde_yaml::Error) -> Self {
        BuildError::SerializationError(err.to_string())
    }
}

/// Result type alias for layerbox operations
pub type Result<T> = std::result::Result<T, BuildError>;
