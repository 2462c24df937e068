//! Convenience result type alias for modhost.

use crate::error::AppError;

/// A specialized `Result` type for modhost operations.
pub type AppResult<T> = Result<T, AppError>;
