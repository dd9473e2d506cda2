//! Distance and score kernels for a query against candidate rows.
//!
//! Every kernel accumulates left to right in one pass. The sequential and
//! parallel reducers call the same row kernels, so their outputs are
//! bit-identical.

use knn_core::{Element, Error, MatrixView, Result};

fn check_len(query_len: usize, candidate_len: usize) -> Result<()> {
    if query_len == candidate_len {
        Ok(())
    } else {
        Err(Error::DimensionMismatch {
            expected: candidate_len,
            actual: query_len,
        })
    }
}

fn sum_abs_diff<'a, T: Element>(
    query: impl Iterator<Item = &'a T>,
    candidate: impl Iterator<Item = &'a T>,
) -> T {
    query
        .zip(candidate)
        .fold(T::zero(), |acc, (&q, &c)| acc + (q - c).abs())
}

fn sum_products<'a, T: Element>(
    query: impl Iterator<Item = &'a T>,
    candidate: impl Iterator<Item = &'a T>,
) -> T {
    query
        .zip(candidate)
        .fold(T::zero(), |acc, (&q, &c)| acc + q * c)
}

fn half_sum_squares<'a, T: Element>(candidate: impl Iterator<Item = &'a T>) -> T {
    let sum = candidate.fold(T::zero(), |acc, &c| acc + c * c);
    // Halving is exact in binary floating point, same as multiplying by 0.5.
    sum / (T::one() + T::one())
}

/// Manhattan distance: `sum |query[i] - candidate[i]|`.
pub fn l1<T: Element>(query: &[T], candidate: &[T]) -> Result<T> {
    check_len(query.len(), candidate.len())?;
    Ok(sum_abs_diff(query.iter(), candidate.iter()))
}

/// Inner product: `sum query[i] * candidate[i]`.
pub fn dot<T: Element>(query: &[T], candidate: &[T]) -> Result<T> {
    check_len(query.len(), candidate.len())?;
    Ok(sum_products(query.iter(), candidate.iter()))
}

/// Half squared norm: `0.5 * sum candidate[i]^2`.
pub fn half_norm_row<T: Element>(candidate: &[T]) -> T {
    half_sum_squares(candidate.iter())
}

/// Rank-preserving stand-in for Euclidean distance.
///
/// Computes `half_norm_row(candidate) - dot(query, candidate)`, which equals
/// `0.5 * (||candidate - query||^2 - ||query||^2)`. The `||query||^2` term is
/// the same for every candidate, so ordering by this value orders by true L2
/// distance, but the value itself is not a distance and can be negative.
pub fn l2_proxy_score<T: Element>(query: &[T], candidate: &[T]) -> Result<T> {
    Ok(half_norm_row(candidate) - dot(query, candidate)?)
}

/// Inner product of the query with every row of the matrix.
pub fn dots<T: Element>(query: &[T], matrix: MatrixView<'_, T>) -> Result<Vec<T>> {
    check_len(query.len(), matrix.ncols())?;
    Ok(matrix
        .outer_iter()
        .map(|row| sum_products(query.iter(), row.iter()))
        .collect())
}

/// Half squared norm of every row of the matrix.
pub fn half_norms<T: Element>(matrix: MatrixView<'_, T>) -> Vec<T> {
    matrix
        .outer_iter()
        .map(|row| half_sum_squares(row.iter()))
        .collect()
}
