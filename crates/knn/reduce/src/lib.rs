//! Per-row score reduction across a bounded set of worker threads.
//!
//! Rows are split into contiguous ranges, one scoped thread per range. Each
//! thread owns the matching `chunks_mut` slice of the output, so writes need
//! no lock and `scores[i]` always belongs to row `i` whatever the scheduling.
//! All threads are joined before the scores are returned.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use knn_core::{Element, Error, MatrixView, Result, Workers};

/// Computes `scores[i] = kernel(matrix.row(i))` for every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelReducer {
    workers: std::num::NonZeroUsize,
}

impl ParallelReducer {
    /// Create a reducer, rejecting a worker count of zero.
    pub fn new(workers: Workers) -> Result<Self> {
        Ok(Self {
            workers: workers.validate()?,
        })
    }

    /// A reducer that scores every row on the calling thread.
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            workers: std::num::NonZeroUsize::MIN,
        }
    }

    /// Configured worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.get()
    }

    /// Score every row of `matrix` with `kernel`.
    ///
    /// The matrix must be in row-major standard layout. If any kernel call
    /// fails, the remaining workers stop at their next row and the first
    /// error recorded is returned; partial scores are discarded.
    pub fn reduce<T, F>(&self, matrix: MatrixView<'_, T>, kernel: F) -> Result<Vec<T>>
    where
        T: Element,
        F: Fn(&[T]) -> Result<T> + Sync,
    {
        let rows = matrix.nrows();
        let dim = matrix.ncols();
        if rows == 0 {
            return Ok(Vec::new());
        }
        if dim == 0 {
            return Err(Error::EmptyInput {
                what: "candidate rows have no elements",
            });
        }
        let data = matrix.as_slice().ok_or_else(|| {
            Error::invalid_argument("matrix", "candidate matrix must be in row-major layout")
        })?;

        let workers = self.workers.get().min(rows);
        if workers == 1 {
            return data.chunks_exact(dim).map(kernel).collect();
        }

        let rows_per_worker = rows.div_ceil(workers);
        tracing::debug!(rows, dim, workers, rows_per_worker, "scoring rows in parallel");

        let mut scores = vec![T::zero(); rows];
        let cancelled = AtomicBool::new(false);
        let first_error = OnceLock::new();

        std::thread::scope(|s| {
            for (out, block) in scores
                .chunks_mut(rows_per_worker)
                .zip(data.chunks(rows_per_worker * dim))
            {
                let kernel = &kernel;
                let cancelled = &cancelled;
                let first_error = &first_error;
                s.spawn(move || score_block(out, block, dim, kernel, cancelled, first_error));
            }
        });

        match first_error.into_inner() {
            Some(err) => Err(err),
            None => Ok(scores),
        }
    }
}

impl Default for ParallelReducer {
    fn default() -> Self {
        Self::sequential()
    }
}

/// Score one contiguous block of rows into its own output slice.
fn score_block<T, F>(
    out: &mut [T],
    block: &[T],
    dim: usize,
    kernel: &F,
    cancelled: &AtomicBool,
    first_error: &OnceLock<Error>,
) where
    T: Element,
    F: Fn(&[T]) -> Result<T>,
{
    for (slot, row) in out.iter_mut().zip(block.chunks_exact(dim)) {
        if cancelled.load(Ordering::Relaxed) {
            return;
        }
        match kernel(row) {
            Ok(score) => *slot = score,
            Err(err) => {
                // Only the first error is kept; later ones are dropped.
                let _ = first_error.set(err);
                cancelled.store(true, Ordering::Relaxed);
                return;
            }
        }
    }
}
