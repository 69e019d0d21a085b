use thiserror::Error;

use crate::id::IdError;

/// Failures reported by [`crate::engine::StoreHandle`] operations.
///
/// A lookup that finds nothing is not an error; it comes back as `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no id provided")]
    MissingIdentifier,

    #[error(transparent)]
    InvalidIdentifier(#[from] IdError),

    #[error("nil value given, value will not be stored")]
    MissingValue,

    /// The worker has stopped and no longer accepts operations.
    #[error("store is not running")]
    Unavailable,
}

impl StoreError {
    /// True for errors caused by what the caller sent, as opposed to the
    /// state of the store itself.
    pub fn is_caller_error(&self) -> bool {
        !matches!(self, StoreError::Unavailable)
    }
}
