//! # Error Types
//!
//! Domain-specific error types for arka-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  arka-core errors (this file)                                          │
//! │  ├── CoreError        - Domain errors (payload encoding, job state)    │
//! │  └── ValidationError  - Submission validation failures                 │
//! │                                                                         │
//! │  arka-db errors      → DbError                                         │
//! │  arka-fiscal errors  → DeviceError, FiscalError                        │
//! │  print agent         → ApiError (what terminals see)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A string could not be parsed into a job type.
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    /// A string could not be parsed into a job status.
    #[error("Unknown job status: {0}")]
    UnknownJobStatus(String),

    /// A string could not be parsed into a payment method.
    #[error("Unknown payment method: {0}")]
    UnknownPaymentMethod(String),

    /// Payload JSON could not be encoded or decoded.
    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::InvalidPayload(err.to_string())
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Submission validation errors.
///
/// Raised before a job is persisted; a job that made it into the queue has
/// already passed these checks.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must be zero or greater.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// The job type requires a field the payload does not carry.
    #[error("{job_type} job requires {field}")]
    MissingForJobType { job_type: String, field: String },

    /// The job type forbids content the payload carries.
    #[error("{job_type} job must not carry {field}")]
    UnexpectedForJobType { job_type: String, field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
