//! Error taxonomy shared by every search entry point.

/// Errors returned by the kernels, the reducer and the search modes.
///
/// Validation errors are raised before any scoring starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A parameter is outside its accepted range.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        /// The offending parameter.
        name: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The query and a candidate row have different lengths.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Length of the candidate rows.
        expected: usize,
        /// Length that was actually supplied.
        actual: usize,
    },

    /// The query or the candidate matrix holds no elements.
    #[error("empty input: {what}")]
    EmptyInput {
        /// Which input was empty.
        what: &'static str,
    },
}

impl Error {
    /// Shorthand for [`Error::InvalidArgument`].
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }
}

/// Result alias used across the knn crates.
pub type Result<T, E = Error> = std::result::Result<T, E>;
