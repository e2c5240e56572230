//! Three-state outcome type for asynchronous results.
//!
//! An [`Outcome`] is the value a promise settles with:
//!
//! - `Empty`: no result yet (the default)
//! - `Ok(T)`: success with a value
//! - `Err(Error)`: failure with a diagnostic
//!
//! Truthiness follows success: `is_ok()` is the boolean conversion of the
//! original model. Unit results carried by the void fitting degenerate to
//! plain `Result<(), Error>` because the empty state never arises there.

use crate::error::Error;

/// The three-state result of an asynchronous operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Outcome<T> {
    /// No result has been produced.
    #[default]
    Empty,
    /// Success with a value.
    Ok(T),
    /// Failure with a diagnostic.
    Err(Error),
}

impl<T> Outcome<T> {
    /// Returns true if no result has been produced.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns true if this outcome is a success.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Returns true if this outcome is a failure.
    #[must_use]
    pub const fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// Returns a reference to the success value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Ok(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a reference to the error, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&Error> {
        match self {
            Self::Err(e) => Some(e),
            _ => None,
        }
    }

    /// Consumes the outcome, returning the success value if any.
    #[must_use]
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(v) => Some(v),
            _ => None,
        }
    }

    /// Consumes the outcome, returning the error if any.
    #[must_use]
    pub fn err(self) -> Option<Error> {
        match self {
            Self::Err(e) => Some(e),
            _ => None,
        }
    }

    /// Maps the success value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Self::Ok(v) => Outcome::Ok(f(v)),
            Self::Err(e) => Outcome::Err(e),
            Self::Empty => Outcome::Empty,
        }
    }

    /// Converts to a standard result; the empty state becomes an error
    /// carrying the none diagnostic.
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::Err(e) => Err(e),
            Self::Empty => Err(Error::none()),
        }
    }

    /// Resets to the empty state.
    pub fn clear(&mut self) {
        *self = Self::Empty;
    }
}

impl<T> From<Result<T, Error>> for Outcome<T> {
    fn from(r: Result<T, Error>) -> Self {
        match r {
            Ok(v) => Self::Ok(v),
            Err(e) => Self::Err(e),
        }
    }
}
