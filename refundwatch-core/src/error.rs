use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A portal-specific precondition failed before automation started
    /// (missing identifier, missing amount per the portal's own rule).
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Case not found: {0}")]
    CaseNotFound(String),

    #[error("Check not found: {0}")]
    CheckNotFound(String),

    #[error("Identifier decryption failed: {0}")]
    Identity(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
