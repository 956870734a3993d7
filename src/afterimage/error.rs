use crate::afterimage::database::DatabaseError;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, AfterimageError>;

/// Boxed error returned by the external collaborators
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum AfterimageError {
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Media cache error: {0}")]
    MediaCache(String),

    #[error("Media retrieval error: {0}")]
    MediaRetrieval(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Recovery store error: {0}")]
    RecoveryStore(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<CollaboratorError> for AfterimageError {
    fn from(err: CollaboratorError) -> Self {
        AfterimageError::Other(anyhow::anyhow!(err.to_string()))
    }
}
