use std::error::Error;
use std::fmt;

/// The catch-all error type used by the Presto command line tools.
///
/// Module-specific errors implement `std::error::Error` (typically via
/// `thiserror`) and convert into this type with the `?` operator. Plain
/// strings convert as well, for one-off error messages in tool mains.
pub struct PrestoError(Box<dyn Error + Send + Sync>);

impl fmt::Display for PrestoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PrestoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shown when returned from main, so use the display representation.
        write!(f, "{}", self.0)
    }
}

impl<E: Into<Box<dyn Error + Send + Sync>>> From<E> for PrestoError {
    fn from(error: E) -> Self {
        Self(error.into())
    }
}
