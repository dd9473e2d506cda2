//! Approximate maximum inner product search with one winner per bucket.
//!
//! Rows are grouped into `L = ceil(N / 2^bin_size)` buckets. Only the best
//! row of each bucket survives the first pass; the top k are then extracted
//! from the `L` survivors by repeated max scans, removing the winning bucket
//! each round. A bucket is never revisited for its second-best row, so if
//! several true top-k rows share a bucket only one of them is returned.
//!
//! See "TPU-KNN: K Nearest Neighbor Search at Peak FLOP/s"
//! (<https://arxiv.org/abs/2206.14286>) for the bucketed reduction.

use knn_core::{Element, Error, MatrixView, RankedResult, Result, ScoredCandidate, VectorView};
use knn_reduce::ParallelReducer;
use knn_topk::Objective;

use crate::SearchOptions;

/// Largest accepted `bin_size`.
pub const MAX_BIN_SIZE: u32 = 64;

/// How row indices map to buckets.
///
/// For query `[3, 4, 5]` against rows `[1, 2, 3]`, `[4, 5, 6]`, `[7, 8, 9]`,
/// `[10, 11, 12]` (inner products 26, 62, 98, 134) with `bin_size = 1` and
/// `k = 2`, the two layouts give different answers:
///
/// | layout       | buckets          | indices  | values      |
/// |--------------|------------------|----------|-------------|
/// | `Strided`    | `{0, 2}, {1, 3}` | `[3, 2]` | `[134, 98]` |
/// | `Contiguous` | `{0, 1}, {2, 3}` | `[3, 1]` | `[134, 62]` |
///
/// `Strided` is the partial-reduction layout of the TPU-KNN paper.
/// `Contiguous` groups runs of neighboring rows, so two strong rows stored
/// next to each other compete for one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BucketLayout {
    /// `bucket(j) = j mod L`: each bucket takes every L-th row.
    #[default]
    Strided,
    /// `bucket(j) = j >> bin_size`: each bucket is a run of `2^bin_size` rows.
    Contiguous,
}

/// Configuration for [`mips_search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipsConfig {
    /// Number of results to return.
    pub k: usize,
    /// Bucket width exponent in `[1, 64]`; estimated from N when `None`.
    pub bin_size: Option<u32>,
    /// Row-to-bucket mapping.
    pub layout: BucketLayout,
    /// Worker count and k policy.
    pub options: SearchOptions,
}

impl MipsConfig {
    /// Search for the `k` best rows with an estimated bin size.
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            k,
            bin_size: None,
            layout: BucketLayout::default(),
            options: SearchOptions::default(),
        }
    }

    /// Use an explicit bin size.
    #[must_use]
    pub fn with_bin_size(mut self, bin_size: u32) -> Self {
        self.bin_size = Some(bin_size);
        self
    }

    /// Set the bucket layout.
    #[must_use]
    pub fn with_layout(mut self, layout: BucketLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Replace the shared options.
    #[must_use]
    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }
}

/// A bin size that is accepted but likely to hurt recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinSizeWarning {
    /// Fewer than 8 rows per `2^bin_size`, so there are very few buckets.
    CoarseBins {
        /// Number of candidate rows.
        rows: usize,
        /// Chosen bin size.
        bin_size: u32,
    },
    /// The bin size is not a power of two.
    NotPowerOfTwo {
        /// Chosen bin size.
        bin_size: u32,
    },
}

/// A validated bucketing plan for one MIPS call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipsPlan {
    /// Bucket width exponent actually used.
    pub bin_size: u32,
    /// Number of buckets, `L`.
    pub bucket_count: usize,
    /// Row-to-bucket mapping.
    pub layout: BucketLayout,
    /// Accepted-but-suspicious parameter choices.
    pub warnings: Vec<BinSizeWarning>,
}

impl MipsPlan {
    /// Validate or estimate the bin size for `rows` candidates of dimension `dim`.
    ///
    /// An explicit bin size outside `[1, 64]` or larger than `dim` is rejected.
    /// An estimated one is capped at `dim`.
    pub fn new(rows: usize, dim: usize, bin_size: Option<u32>, layout: BucketLayout) -> Result<Self> {
        let dim_cap = u32::try_from(dim).unwrap_or(u32::MAX);
        let bin_size = match bin_size {
            Some(bin_size) => {
                if !(1..=MAX_BIN_SIZE).contains(&bin_size) {
                    return Err(Error::invalid_argument(
                        "bin_size",
                        format!("must be in [1, {MAX_BIN_SIZE}], got {bin_size}"),
                    ));
                }
                if bin_size > dim_cap {
                    return Err(Error::invalid_argument(
                        "bin_size",
                        format!("{bin_size} exceeds the vector dimension {dim}"),
                    ));
                }
                bin_size
            }
            None => estimate_bin_size(rows).min(dim_cap).max(1),
        };

        let mut warnings = Vec::new();
        if rows.checked_shr(bin_size).unwrap_or(0) < 8 {
            tracing::warn!(
                rows,
                bin_size,
                "bin_size is too large for the size of the database, recall may suffer"
            );
            warnings.push(BinSizeWarning::CoarseBins { rows, bin_size });
        }
        if !bin_size.is_power_of_two() {
            tracing::warn!(bin_size, "bin_size is not a power of two, recall may suffer");
            warnings.push(BinSizeWarning::NotPowerOfTwo { bin_size });
        }

        Ok(Self {
            bin_size,
            bucket_count: bucket_count(rows, bin_size),
            layout,
            warnings,
        })
    }
}

/// Pick a bin size from the database size. Larger databases get wider buckets.
#[must_use]
pub fn estimate_bin_size(rows: usize) -> u32 {
    const TABLE: [(u64, u32); 6] = [
        (1 << 8, 1),
        (1 << 12, 2),
        (1 << 16, 4),
        (1 << 20, 8),
        (1 << 24, 16),
        (1 << 28, 32),
    ];

    let rows = u64::try_from(rows).unwrap_or(u64::MAX);
    TABLE
        .iter()
        .find(|&&(threshold, _)| rows < threshold)
        .map_or(MAX_BIN_SIZE, |&(_, bin_size)| bin_size)
}

/// Number of buckets for `rows` rows: `ceil(rows / 2^bin_size)`.
#[must_use]
pub fn bucket_count(rows: usize, bin_size: u32) -> usize {
    if rows == 0 {
        return 0;
    }
    match 1_usize.checked_shl(bin_size) {
        Some(width) => rows.div_ceil(width),
        None => 1,
    }
}

fn bucket_of(index: usize, bin_size: u32, layout: BucketLayout, buckets: usize) -> usize {
    match layout {
        BucketLayout::Strided => index % buckets,
        BucketLayout::Contiguous => index.checked_shr(bin_size).unwrap_or(0),
    }
}

/// Approximate top-k of `scores` (higher is better) by bucket winners.
///
/// Returns fewer than `k` candidates when fewer than `k` buckets hold a
/// non-NaN score. Ties go to the lower row index.
#[must_use]
pub fn bucket_top_k<T: Element>(
    scores: &[T],
    k: usize,
    bin_size: u32,
    layout: BucketLayout,
) -> Vec<ScoredCandidate<T>> {
    let buckets = bucket_count(scores.len(), bin_size);
    let mut winners: Vec<Option<ScoredCandidate<T>>> = vec![None; buckets];

    for (index, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        let candidate = ScoredCandidate { index, score };
        let slot = &mut winners[bucket_of(index, bin_size, layout, buckets)];
        if slot
            .as_ref()
            .is_none_or(|best| Objective::Maximize.rank(&candidate, best).is_lt())
        {
            *slot = Some(candidate);
        }
    }

    let mut ranked = Vec::with_capacity(k.min(buckets));
    for _ in 0..k {
        let mut best: Option<(usize, ScoredCandidate<T>)> = None;
        for (bucket, winner) in winners.iter().enumerate() {
            let Some(winner) = winner else {
                continue;
            };
            if best
                .as_ref()
                .is_none_or(|(_, current)| Objective::Maximize.rank(winner, current).is_lt())
            {
                best = Some((bucket, *winner));
            }
        }

        let Some((bucket, winner)) = best else {
            break;
        };
        // The bucket is spent; its runner-up is not considered.
        winners[bucket] = None;
        ranked.push(winner);
    }

    ranked
}

/// Find approximately the `k` rows with the largest inner product with `query`.
///
/// Values are inner products, descending.
pub fn mips_search<T: Element>(
    query: VectorView<'_, T>,
    matrix: MatrixView<'_, T>,
    config: &MipsConfig,
) -> Result<RankedResult<T>> {
    let reducer = ParallelReducer::new(config.options.workers)?;
    let input = crate::prepare(query, matrix, config.k, config.options.k_policy)?;
    let plan = MipsPlan::new(input.rows(), input.dim(), config.bin_size, config.layout)?;
    let query = input.query_slice()?;

    tracing::info!(
        rows = input.rows(),
        dim = input.dim(),
        k = input.k,
        bin_size = plan.bin_size,
        buckets = plan.bucket_count,
        layout = ?plan.layout,
        workers = reducer.workers(),
        dtype = T::NAME,
        "MIPS search"
    );

    let scores = reducer.reduce(input.matrix.view(), |row| knn_kernels::dot(query, row))?;
    Ok(bucket_top_k(&scores, input.k, plan.bin_size, plan.layout).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use knn_core::{KPolicy, Workers};

    #[test]
    fn test_reference_scenario() {
        let config = MipsConfig::new(2).with_bin_size(1);
        let result = mips_search(
            fixtures::query().view(),
            fixtures::database().view(),
            &config,
        )
        .unwrap();
        assert_eq!(result.indices, vec![3, 2]);
        assert_eq!(result.values, vec![134.0, 98.0]);

        // The estimated bin size for four rows is also 1.
        let estimated = mips_search(
            fixtures::query().view(),
            fixtures::database().view(),
            &MipsConfig::new(2),
        )
        .unwrap();
        assert_eq!(estimated, result);
    }

    #[test]
    fn test_contiguous_layout_loses_same_bucket_runner_up() {
        // Rows 2 and 3 share bucket 1 under the contiguous layout.
        let config = MipsConfig::new(2)
            .with_bin_size(1)
            .with_layout(BucketLayout::Contiguous);
        let result = mips_search(
            fixtures::query().view(),
            fixtures::database().view(),
            &config,
        )
        .unwrap();
        assert_eq!(result.indices, vec![3, 1]);
        assert_eq!(result.values, vec![134.0, 62.0]);
    }

    #[test]
    fn test_bucket_count() {
        assert_eq!(bucket_count(10, 1), 5);
        assert_eq!(bucket_count(11, 1), 6);
        assert_eq!(bucket_count(1000, 4), 63);
        assert_eq!(bucket_count(1000, 63), 1);
        assert_eq!(bucket_count(1000, 64), 1);
        assert_eq!(bucket_count(0, 3), 0);
    }

    #[test]
    fn test_single_bucket_returns_exact_best() {
        let db = fixtures::random_database(200, 16, 4);
        let query = fixtures::random_database(1, 16, 8).row(0).to_owned();

        let exact = knn_topk::select(
            &knn_kernels::dots(query.as_slice().unwrap(), db.view()).unwrap(),
            1,
            Objective::Maximize,
        );

        for layout in [BucketLayout::Strided, BucketLayout::Contiguous] {
            let config = MipsConfig::new(1).with_bin_size(8).with_layout(layout);
            let result = mips_search(query.view(), db.view(), &config).unwrap();
            assert_eq!(result.indices, vec![exact[0].index]);
            assert_eq!(result.values, vec![exact[0].score]);
        }

        // One bucket has one winner, so asking for more yields just that one.
        let config = MipsConfig::new(5).with_bin_size(8);
        let result = mips_search(query.view(), db.view(), &config).unwrap();
        assert_eq!(result.indices, vec![exact[0].index]);
    }

    #[test]
    fn test_results_are_bucket_winners_in_descending_order() {
        let db = fixtures::random_database(1024, 8, 12);
        let query = fixtures::random_database(1, 8, 13).row(0).to_owned();
        let scores = knn_kernels::dots(query.as_slice().unwrap(), db.view()).unwrap();

        let config = MipsConfig::new(10).with_bin_size(4);
        let result = mips_search(query.view(), db.view(), &config).unwrap();
        assert_eq!(result.len(), 10);

        for pair in result.values.windows(2) {
            assert!(pair[0] >= pair[1]);
        }

        let buckets = bucket_count(1024, 4);
        let mut seen = std::collections::HashSet::new();
        for candidate in result.iter() {
            assert_eq!(candidate.score, scores[candidate.index]);
            let bucket = candidate.index % buckets;
            assert!(seen.insert(bucket), "two results from bucket {bucket}");
            let bucket_best = scores
                .iter()
                .enumerate()
                .filter(|(i, _)| i % buckets == bucket)
                .map(|(_, &s)| s)
                .fold(f64::NEG_INFINITY, f64::max);
            assert_eq!(candidate.score, bucket_best);
        }
    }

    #[test]
    fn test_negative_scores_rank_correctly() {
        // Bucket 0 holds rows {0, 2}, bucket 1 holds rows {1, 3}.
        let scores = [-5.0_f64, -1.0, -3.0, -2.0];
        let ranked = bucket_top_k(&scores, 2, 1, BucketLayout::Strided);
        let indices: Vec<_> = ranked.iter().map(|c| c.index).collect();
        let values: Vec<_> = ranked.iter().map(|c| c.score).collect();
        assert_eq!(indices, vec![1, 2]);
        assert_eq!(values, vec![-1.0, -3.0]);
    }

    #[test]
    fn test_ties_and_nan() {
        let scores = [1.0_f32, 1.0, f32::NAN, 1.0];
        let ranked = bucket_top_k(&scores, 4, 1, BucketLayout::Strided);
        let indices: Vec<_> = ranked.iter().map(|c| c.index).collect();
        // Bucket 0 holds rows {0, 2}, bucket 1 holds rows {1, 3}.
        assert_eq!(indices, vec![0, 1]);

        let all_nan = [f32::NAN; 4];
        assert!(bucket_top_k(&all_nan, 2, 1, BucketLayout::Strided).is_empty());
    }

    #[test]
    fn test_estimate_bin_size() {
        assert_eq!(estimate_bin_size(1), 1);
        assert_eq!(estimate_bin_size(255), 1);
        assert_eq!(estimate_bin_size(256), 2);
        assert_eq!(estimate_bin_size(4095), 2);
        assert_eq!(estimate_bin_size(1 << 16), 8);
        assert_eq!(estimate_bin_size(1 << 20), 16);
        assert_eq!(estimate_bin_size((1 << 28) - 1), 32);
        assert_eq!(estimate_bin_size(1 << 28), 64);
    }

    #[test]
    fn test_plan_validation() {
        for bin_size in [0, 65] {
            assert!(matches!(
                MipsPlan::new(100, 128, Some(bin_size), BucketLayout::Strided),
                Err(Error::InvalidArgument {
                    name: "bin_size",
                    ..
                })
            ));
        }
        assert!(MipsPlan::new(100, 3, Some(4), BucketLayout::Strided).is_err());

        // Estimated sizes are capped at the dimension instead of failing.
        let plan = MipsPlan::new(100_000, 2, None, BucketLayout::Strided).unwrap();
        assert_eq!(plan.bin_size, 2);
        assert_eq!(plan.bucket_count, 25_000);
    }

    #[test]
    fn test_plan_warnings() {
        let plan = MipsPlan::new(10_000, 64, Some(4), BucketLayout::Strided).unwrap();
        assert!(plan.warnings.is_empty());

        let plan = MipsPlan::new(40, 64, Some(3), BucketLayout::Strided).unwrap();
        assert_eq!(
            plan.warnings,
            vec![
                BinSizeWarning::CoarseBins {
                    rows: 40,
                    bin_size: 3
                },
                BinSizeWarning::NotPowerOfTwo { bin_size: 3 }
            ]
        );

        let plan = MipsPlan::new(4, 3, Some(1), BucketLayout::Strided).unwrap();
        assert_eq!(plan.bucket_count, 2);
        assert_eq!(
            plan.warnings,
            vec![BinSizeWarning::CoarseBins {
                rows: 4,
                bin_size: 1
            }]
        );

        let plan = MipsPlan::new(4, 128, Some(64), BucketLayout::Strided).unwrap();
        assert_eq!(plan.bucket_count, 1);
    }

    /// In-memory log sink shared with the subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_warnings_are_logged_to_the_installed_subscriber() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let result = mips_search(
                fixtures::query().view(),
                fixtures::database().view(),
                &MipsConfig::new(1).with_bin_size(3),
            );
            assert!(result.is_ok());
        });

        let output = logs.contents();
        assert!(output.contains("WARN"), "{output}");
        assert!(output.contains("bin_size is not a power of two"), "{output}");
        assert!(output.contains("too large for the size of the database"), "{output}");
        // Info-level call summaries are filtered out.
        assert!(!output.contains("MIPS search"), "{output}");
    }

    #[test]
    fn test_invalid_k() {
        let db = fixtures::database();
        let query = fixtures::query();
        for k in [0, 5] {
            assert!(matches!(
                mips_search(query.view(), db.view(), &MipsConfig::new(k)),
                Err(Error::InvalidArgument { name: "k", .. })
            ));
        }

        let clamp = SearchOptions::default().with_k_policy(KPolicy::Clamp);
        let result = mips_search(
            query.view(),
            db.view(),
            &MipsConfig::new(9).with_bin_size(1).with_options(clamp),
        )
        .unwrap();
        // Only two buckets exist, so only two winners come back.
        assert_eq!(result.indices, vec![3, 2]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let db = fixtures::random_database(4096, 16, 21);
        let query = db.row(7).to_owned();
        let config = MipsConfig::new(16);
        let sequential = mips_search(query.view(), db.view(), &config).unwrap();

        let options = SearchOptions::default().with_workers(Workers::new(6));
        let parallel = mips_search(query.view(), db.view(), &config.with_options(options)).unwrap();
        assert_eq!(sequential, parallel);
    }
}
