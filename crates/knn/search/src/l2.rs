//! Top-k by Euclidean distance, scored with a rank-preserving proxy.
//!
//! The value reported per neighbor is `0.5 * ||row||^2 - query . row`, not the
//! Euclidean distance. It orders rows exactly like the true distance does.

use knn_core::{Element, Error, MatrixView, RankedResult, Result, ScoredCandidate, VectorView};
use knn_reduce::ParallelReducer;
use knn_topk::Objective;

use crate::SearchOptions;

/// Recall target used when none is given.
pub const DEFAULT_RECALL_TARGET: f64 = 0.95;

/// How many candidate rows an L2 search looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum L2Sampling {
    /// Score every row. `recall_target` has no effect; results are exact.
    #[default]
    Exhaustive,
    /// Score only the first `floor(k / recall_target)` rows.
    ///
    /// This is a fixed prefix, not a random sample: it carries no recall
    /// guarantee unless the matrix is already ordered so that likely
    /// neighbors come first.
    UnsafePrefix,
}

/// Configuration for [`l2_search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct L2Config {
    /// Number of neighbors to return.
    pub k: usize,
    /// Desired recall, in `(0, 1]`.
    pub recall_target: f64,
    /// Exhaustive scan or prefix sampling.
    pub sampling: L2Sampling,
    /// Worker count and k policy.
    pub options: SearchOptions,
}

impl L2Config {
    /// Exhaustive search for the `k` nearest rows with default options.
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            k,
            recall_target: DEFAULT_RECALL_TARGET,
            sampling: L2Sampling::Exhaustive,
            options: SearchOptions::default(),
        }
    }

    /// Set the recall target.
    #[must_use]
    pub fn with_recall_target(mut self, recall_target: f64) -> Self {
        self.recall_target = recall_target;
        self
    }

    /// Set the sampling strategy.
    #[must_use]
    pub fn with_sampling(mut self, sampling: L2Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    /// Replace the shared options.
    #[must_use]
    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.recall_target > 0.0 && self.recall_target <= 1.0 {
            Ok(())
        } else {
            Err(Error::invalid_argument(
                "recall_target",
                format!("must be in (0, 1], got {}", self.recall_target),
            ))
        }
    }
}

/// Number of prefix rows scored under [`L2Sampling::UnsafePrefix`].
///
/// `floor(k / recall_target)`, capped at `rows`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "k / recall_target is positive and the float-to-int cast saturates"
)]
pub fn sample_size(k: usize, recall_target: f64, rows: usize) -> usize {
    let samples = (k as f64 / recall_target).floor() as usize;
    samples.clamp(k.min(rows), rows)
}

/// Find the `k` rows nearest to `query` in Euclidean distance.
///
/// Values are proxy scores (see the module docs), ascending.
pub fn l2_search<T: Element>(
    query: VectorView<'_, T>,
    matrix: MatrixView<'_, T>,
    config: &L2Config,
) -> Result<RankedResult<T>> {
    config.validate()?;
    let reducer = ParallelReducer::new(config.options.workers)?;
    let input = crate::prepare(query, matrix, config.k, config.options.k_policy)?;
    let query = input.query_slice()?;

    let scored_rows = match config.sampling {
        L2Sampling::Exhaustive => input.rows(),
        L2Sampling::UnsafePrefix => {
            let samples = sample_size(input.k, config.recall_target, input.rows());
            tracing::warn!(
                samples,
                rows = input.rows(),
                "L2 prefix sampling scores only the leading rows; recall is not guaranteed"
            );
            samples
        }
    };

    tracing::info!(
        rows = input.rows(),
        dim = input.dim(),
        k = input.k,
        recall_target = config.recall_target,
        scored_rows,
        workers = reducer.workers(),
        dtype = T::NAME,
        "L2 search"
    );

    let candidates = input.matrix.slice(ndarray::s![..scored_rows, ..]);
    let distances = reducer.reduce(candidates, |row| knn_kernels::l2_proxy_score(query, row))?;

    let ranked = match config.sampling {
        L2Sampling::Exhaustive => knn_topk::select(&distances, input.k, Objective::Minimize),
        L2Sampling::UnsafePrefix => sort_prefix(distances, input.k),
    };
    Ok(ranked.into())
}

/// Rank a scored prefix by full sort and keep the first `k`.
fn sort_prefix<T: Element>(distances: Vec<T>, k: usize) -> Vec<ScoredCandidate<T>> {
    let mut ranked: Vec<_> = distances
        .into_iter()
        .enumerate()
        .filter(|(_, score)| !score.is_nan())
        .map(|(index, score)| ScoredCandidate { index, score })
        .collect();
    ranked.sort_by(|a, b| Objective::Minimize.rank(a, b));
    ranked.truncate(k);
    ranked
}
