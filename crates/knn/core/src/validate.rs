//! Input validation shared by the three search modes.

use crate::{Error, MatrixView, Result, VectorView};

/// What to do when `k` exceeds the number of candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KPolicy {
    /// Reject `k > N` with [`Error::InvalidArgument`].
    #[default]
    Strict,
    /// Clamp `k` to `N` and log a warning.
    Clamp,
}

/// Check that the query and candidate matrix are non-empty and agree on dimension.
pub fn check_inputs<T>(query: VectorView<'_, T>, matrix: MatrixView<'_, T>) -> Result<()> {
    if query.is_empty() {
        return Err(Error::EmptyInput {
            what: "query vector has no elements",
        });
    }
    if matrix.nrows() == 0 {
        return Err(Error::EmptyInput {
            what: "candidate matrix has no rows",
        });
    }
    if matrix.ncols() == 0 {
        return Err(Error::EmptyInput {
            what: "candidate rows have no elements",
        });
    }
    if query.len() != matrix.ncols() {
        return Err(Error::DimensionMismatch {
            expected: matrix.ncols(),
            actual: query.len(),
        });
    }
    Ok(())
}

/// Validate `k` against the number of candidates under the given policy.
///
/// Returns the `k` to use. `k == 0` is rejected under every policy.
pub fn resolve_k(k: usize, candidates: usize, policy: KPolicy) -> Result<usize> {
    if k == 0 {
        return Err(Error::invalid_argument("k", "k must be at least 1"));
    }
    if k <= candidates {
        return Ok(k);
    }
    match policy {
        KPolicy::Strict => Err(Error::invalid_argument(
            "k",
            format!("k = {k} exceeds the number of candidates ({candidates})"),
        )),
        KPolicy::Clamp => {
            tracing::warn!(k, candidates, "k exceeds the number of candidates, clamping");
            Ok(candidates)
        }
    }
}
