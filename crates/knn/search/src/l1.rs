//! Exact top-k by Manhattan distance.

use knn_core::{Element, MatrixView, RankedResult, Result, VectorView};
use knn_reduce::ParallelReducer;
use knn_topk::Objective;

use crate::SearchOptions;

/// Configuration for [`l1_search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L1Config {
    /// Number of neighbors to return.
    pub k: usize,
    /// Worker count and k policy.
    pub options: SearchOptions,
}

impl L1Config {
    /// Search for the `k` nearest rows with default options.
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            k,
            options: SearchOptions::default(),
        }
    }

    /// Replace the shared options.
    #[must_use]
    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }
}

/// Find the `k` rows with the smallest L1 distance to `query`.
///
/// Exact and deterministic. Values are true Manhattan distances, ascending.
pub fn l1_search<T: Element>(
    query: VectorView<'_, T>,
    matrix: MatrixView<'_, T>,
    config: &L1Config,
) -> Result<RankedResult<T>> {
    let reducer = ParallelReducer::new(config.options.workers)?;
    let input = crate::prepare(query, matrix, config.k, config.options.k_policy)?;
    let query = input.query_slice()?;

    tracing::info!(
        rows = input.rows(),
        dim = input.dim(),
        k = input.k,
        workers = reducer.workers(),
        dtype = T::NAME,
        "L1 search"
    );

    let distances = reducer.reduce(input.matrix.view(), |row| knn_kernels::l1(query, row))?;
    Ok(knn_topk::select(&distances, input.k, Objective::Minimize).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use knn_core::{Error, KPolicy, Workers};

    #[test]
    fn test_reference_scenario() {
        let result = l1_search(
            fixtures::query().view(),
            fixtures::database().view(),
            &L1Config::new(2),
        )
        .unwrap();
        assert_eq!(result.indices, vec![1, 0]);
        assert_eq!(result.values, vec![3.0, 6.0]);
    }

    #[test]
    fn test_values_are_true_distances_in_ascending_order() {
        let db = fixtures::random_database(300, 16, 7);
        let query = db.row(42).mapv(|v| v + 0.01);

        let result = l1_search(query.view(), db.view(), &L1Config::new(25)).unwrap();
        assert_eq!(result.len(), 25);
        assert_eq!(result.indices[0], 42);

        for pair in result.values.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        for candidate in result.iter() {
            let expected: f64 = db
                .row(candidate.index)
                .iter()
                .zip(&query)
                .map(|(c, q)| (q - c).abs())
                .sum();
            assert!((candidate.score - expected).abs() < 1e-12);
        }

        // Nothing outside the result is closer than the last kept row.
        let cutoff = *result.values.last().unwrap();
        let closer = db
            .outer_iter()
            .filter(|row| {
                knn_kernels::l1(query.as_slice().unwrap(), row.as_slice().unwrap()).unwrap()
                    < cutoff
            })
            .count();
        assert!(closer < 25);
    }

    #[test]
    fn test_k_boundaries() {
        let db = fixtures::database();
        let query = fixtures::query();

        let all = l1_search(query.view(), db.view(), &L1Config::new(4)).unwrap();
        assert_eq!(all.indices, vec![1, 0, 2, 3]);
        assert_eq!(all.values, vec![3.0, 6.0, 12.0, 21.0]);

        let best = l1_search(query.view(), db.view(), &L1Config::new(1)).unwrap();
        assert_eq!(best.indices, vec![1]);
    }

    #[test]
    fn test_invalid_k() {
        let db = fixtures::database();
        let query = fixtures::query();
        for k in [0, 5] {
            assert!(matches!(
                l1_search(query.view(), db.view(), &L1Config::new(k)),
                Err(Error::InvalidArgument { name: "k", .. })
            ));
        }

        let clamp = SearchOptions::default().with_k_policy(KPolicy::Clamp);
        let result = l1_search(
            query.view(),
            db.view(),
            &L1Config::new(9).with_options(clamp),
        )
        .unwrap();
        assert_eq!(result.len(), 4);
    }

    #[test]
    fn test_dimension_mismatch() {
        let db = fixtures::database();
        let query = ndarray::array![1.0_f32, 2.0];
        assert_eq!(
            l1_search(query.view(), db.view(), &L1Config::new(1)),
            Err(Error::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let db = fixtures::random_database(1000, 32, 3);
        let query = fixtures::random_database(1, 32, 11).row(0).to_owned();

        let sequential = l1_search(query.view(), db.view(), &L1Config::new(10)).unwrap();
        let options = SearchOptions::default().with_workers(Workers::new(8));
        let parallel = l1_search(
            query.view(),
            db.view(),
            &L1Config::new(10).with_options(options),
        )
        .unwrap();
        assert_eq!(sequential, parallel);

        // Same inputs, same answer.
        let again = l1_search(query.view(), db.view(), &L1Config::new(10)).unwrap();
        assert_eq!(sequential, again);
    }

    #[test]
    fn test_zero_workers_rejected_before_scoring() {
        let options = SearchOptions::default().with_workers(Workers::new(0));
        let result = l1_search(
            fixtures::query().view(),
            fixtures::database().view(),
            &L1Config::new(1).with_options(options),
        );
        assert!(matches!(
            result,
            Err(Error::InvalidArgument { name: "workers", .. })
        ));
    }
}
