use thiserror::Error;

pub type Result<T> = std::result::Result<T, RotationError>;

/// Failure classes surfaced by the rotation scheduler.
///
/// None are retried by the core; every failing operation leaves stored state untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RotationError {
    /// Malformed input; the caller can correct it and retry.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A required prior state has not been reached.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// A concurrent or repeated mutation already happened.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Mutation of an aggregate that is locked or not owned by the caller.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The backing store failed for reasons unrelated to domain rules.
    #[error("store error: {0}")]
    Store(String),
}

impl RotationError {
    pub fn kind(&self) -> &'static str {
        match self {
            RotationError::Validation(_) => "validation",
            RotationError::PreconditionFailed(_) => "precondition_failed",
            RotationError::Conflict(_) => "conflict",
            RotationError::PermissionDenied(_) => "permission_denied",
            RotationError::NotFound { .. } => "not_found",
            RotationError::Store(_) => "store",
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        RotationError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn store<E: std::fmt::Display>(err: E) -> Self {
        RotationError::Store(err.to_string())
    }
}
