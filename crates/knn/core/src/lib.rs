//! Core types and traits for knn.
//!
//! The search crates borrow the caller's query and candidate matrix read-only
//! and hand back a [`RankedResult`]. Everything here is shared between the
//! kernels, the top-k selector, the reducer and the search modes.

mod element;
mod error;
mod validate;

pub use element::Element;
pub use error::{Error, Result};
pub use validate::{KPolicy, check_inputs, resolve_k};

/// A borrowed query vector.
pub type VectorView<'a, T> = ndarray::ArrayView1<'a, T>;

/// A borrowed candidate matrix, one candidate per row.
/// Shape: [num_candidates, dim]
pub type MatrixView<'a, T> = ndarray::ArrayView2<'a, T>;

/// A candidate row together with its distance or score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredCandidate<T> {
    /// Row index into the candidate matrix.
    pub index: usize,
    /// Distance (lower is better) or score (higher is better), depending on the mode.
    pub score: T,
}

impl<T> ScoredCandidate<T> {
    /// Create a new scored candidate.
    pub const fn new(index: usize, score: T) -> Self {
        Self { index, score }
    }
}

/// The ranked output of a search call.
///
/// `indices[i]` and `values[i]` describe the same candidate. Ordering is
/// ascending by distance for L1/L2 and descending by score for MIPS.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize)]
pub struct RankedResult<T> {
    /// Candidate row indices, best first.
    pub indices: Vec<usize>,
    /// Distances or scores matching `indices`.
    pub values: Vec<T>,
}

impl<T: Copy> RankedResult<T> {
    /// Number of ranked candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether nothing was ranked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Iterate over `(index, value)` pairs, best first.
    pub fn iter(&self) -> impl Iterator<Item = ScoredCandidate<T>> + '_ {
        self.indices
            .iter()
            .zip(&self.values)
            .map(|(&index, &score)| ScoredCandidate { index, score })
    }
}

impl<T> From<Vec<ScoredCandidate<T>>> for RankedResult<T> {
    fn from(ranked: Vec<ScoredCandidate<T>>) -> Self {
        let (indices, values) = ranked.into_iter().map(|c| (c.index, c.score)).unzip();
        Self { indices, values }
    }
}

/// Number of workers a reducer-backed search may run concurrently.
///
/// This is a per-call value, never process-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Workers(usize);

impl Workers {
    /// Score every row on the calling thread.
    #[must_use]
    pub const fn sequential() -> Self {
        Self(1)
    }

    /// Use `count` workers. Zero is rejected when the reducer is built.
    #[must_use]
    pub const fn new(count: usize) -> Self {
        Self(count)
    }

    /// One worker per available CPU.
    #[must_use]
    pub fn available() -> Self {
        Self(std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get))
    }

    /// The requested worker count.
    #[must_use]
    pub const fn count(self) -> usize {
        self.0
    }

    /// Validate the worker count.
    pub fn validate(self) -> Result<std::num::NonZeroUsize> {
        std::num::NonZeroUsize::new(self.0)
            .ok_or_else(|| Error::invalid_argument("workers", "worker count must be at least 1"))
    }
}

impl Default for Workers {
    fn default() -> Self {
        Self::sequential()
    }
}
