use crate::Error;
use thiserror::Error as ThisError;

/// Classified failure, carried inside [`crate::Error`].
///
/// Driver errors are never wrapped in this type, they pass through unchanged.
/// Use `error.downcast_ref::<QuarryError>()` to tell the two apart.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum QuarryError {
    /// Invalid declaration or registration, raised when a method binding is
    /// derived or on the first call using it. Never retried.
    #[error("{0}")]
    Configuration(String),
    /// Row or call level data that cannot be mapped, terminates the stream.
    #[error("{0}")]
    Data(String),
}

impl QuarryError {
    pub fn configuration(message: impl Into<String>) -> Error {
        Error::new(QuarryError::Configuration(message.into()))
    }
    pub fn data(message: impl Into<String>) -> Error {
        Error::new(QuarryError::Data(message.into()))
    }
    pub fn is_configuration(error: &Error) -> bool {
        matches!(
            error.downcast_ref::<QuarryError>(),
            Some(QuarryError::Configuration(..))
        )
    }
    pub fn is_data(error: &Error) -> bool {
        matches!(error.downcast_ref::<QuarryError>(), Some(QuarryError::Data(..)))
    }
}
