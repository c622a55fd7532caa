use thiserror::Error;

/// Failures surfaced by the billing core.
///
/// Every variant except `Database` is a deterministic outcome of the input
/// and the current stored state; callers map them to client errors.
#[derive(Error, Debug)]
pub enum ComputeError {
    /// A referenced user, reading or invoice does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// The caller's role or ownership does not allow the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The target is already in the requested state (verified, paid, invoiced)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The input breaks a data invariant
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Error from the database operations
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl ComputeError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ComputeError::NotFound(what.into())
    }
}

/// Type alias for Result with ComputeError
pub type Result<T> = std::result::Result<T, ComputeError>;
