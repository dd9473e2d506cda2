//! Brute-force nearest-neighbor and maximum inner product search.
//!
//! Every entry point takes a query vector, a candidate matrix (one candidate
//! per row) and a mode config, and returns a [`RankedResult`]:
//!
//! - [`l1_search`]: exact top-k by Manhattan distance.
//! - [`l2_search`]: top-k by a rank-preserving Euclidean proxy.
//! - [`mips_search`]: approximate top-k inner product, one winner per bucket.
//!
//! All parameters are validated before any scoring starts.

mod l1;
mod l2;
mod mips;

pub use knn_core::{Error, KPolicy, RankedResult, Result, Workers};
pub use l1::{L1Config, l1_search};
pub use l2::{DEFAULT_RECALL_TARGET, L2Config, L2Sampling, l2_search, sample_size};
pub use mips::{
    BinSizeWarning, BucketLayout, MAX_BIN_SIZE, MipsConfig, MipsPlan, bucket_count, bucket_top_k,
    estimate_bin_size, mips_search,
};

use knn_core::{Element, MatrixView, VectorView};

/// Options shared by all three modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchOptions {
    /// Worker threads used to score candidate rows.
    pub workers: Workers,
    /// Whether `k > N` is rejected or clamped.
    pub k_policy: KPolicy,
}

impl SearchOptions {
    /// Set the worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: Workers) -> Self {
        self.workers = workers;
        self
    }

    /// Set the k policy.
    #[must_use]
    pub fn with_k_policy(mut self, k_policy: KPolicy) -> Self {
        self.k_policy = k_policy;
        self
    }
}

/// Validated inputs, normalized to row-major layout.
struct Prepared<'q, 'm, T> {
    query: ndarray::CowArray<'q, T, ndarray::Ix1>,
    matrix: ndarray::CowArray<'m, T, ndarray::Ix2>,
    k: usize,
}

impl<T: Element> Prepared<'_, '_, T> {
    fn query_slice(&self) -> Result<&[T]> {
        self.query
            .as_slice()
            .ok_or_else(|| Error::invalid_argument("query", "query vector must be contiguous"))
    }

    fn rows(&self) -> usize {
        self.matrix.nrows()
    }

    fn dim(&self) -> usize {
        self.matrix.ncols()
    }
}

fn prepare<'q, 'm, T: Element>(
    query: VectorView<'q, T>,
    matrix: MatrixView<'m, T>,
    k: usize,
    policy: KPolicy,
) -> Result<Prepared<'q, 'm, T>> {
    knn_core::check_inputs(query, matrix)?;
    let k = knn_core::resolve_k(k, matrix.nrows(), policy)?;
    Ok(Prepared {
        query: row_major(query),
        matrix: row_major(matrix),
        k,
    })
}

/// Borrow the view when it is already row-major, copy it otherwise.
fn row_major<'a, T, D>(view: ndarray::ArrayView<'a, T, D>) -> ndarray::CowArray<'a, T, D>
where
    T: Clone,
    D: ndarray::Dimension,
{
    if view.is_standard_layout() {
        ndarray::CowArray::from(view)
    } else {
        ndarray::CowArray::from(view.as_standard_layout().into_owned())
    }
}
