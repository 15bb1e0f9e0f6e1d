use canopy_core::engine::EvalError;
use canopy_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("policy has been modified: etag mismatch")]
    EtagMismatch,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    Invalid(String),
}

impl ApiError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(msg) => ApiError::Conflict(msg),
            StorageError::StaleEtag { .. } => ApiError::EtagMismatch,
            StorageError::Internal(msg) => ApiError::Storage(msg),
        }
    }
}

impl From<EvalError> for ApiError {
    fn from(err: EvalError) -> Self {
        match err {
            EvalError::ResourceNotFound(_) => ApiError::not_found("resource"),
            EvalError::Storage { .. } => ApiError::Storage(err.to_string()),
            EvalError::Cancelled => ApiError::Cancelled,
        }
    }
}
