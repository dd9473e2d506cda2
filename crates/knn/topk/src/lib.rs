//! Bounded top-k selection.
//!
//! [`BoundedTopK`] keeps the k best candidates seen so far in a binary heap
//! with the current worst candidate on top, so each offer costs O(log k) and
//! a full pass over N candidates costs O(N log k).
//!
//! Ties are broken by row index: at equal score the lower index ranks first,
//! which makes results reproducible regardless of offer order.

use std::collections::BinaryHeap;

use knn_core::{Element, RankedResult, ScoredCandidate};

/// Which end of the score range counts as "best".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    /// Keep the k smallest scores (distances).
    Minimize,
    /// Keep the k largest scores (similarities).
    Maximize,
}

impl Objective {
    /// Compare two candidates; `Less` means `a` ranks ahead of `b`.
    #[must_use]
    pub fn rank<T: Element>(
        self,
        a: &ScoredCandidate<T>,
        b: &ScoredCandidate<T>,
    ) -> std::cmp::Ordering {
        let by_score = match self {
            Objective::Minimize => a.score.total_order(&b.score),
            Objective::Maximize => b.score.total_order(&a.score),
        };
        by_score.then(a.index.cmp(&b.index))
    }
}

/// Heap entry ordered so that the worst candidate is the greatest.
#[derive(Debug, Clone, Copy)]
struct Entry<T> {
    candidate: ScoredCandidate<T>,
    objective: Objective,
}

impl<T: Element> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl<T: Element> Eq for Entry<T> {}

impl<T: Element> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Element> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.objective.rank(&self.candidate, &other.candidate)
    }
}

/// A fixed-capacity collection of the best candidates seen so far.
#[derive(Debug, Clone)]
pub struct BoundedTopK<T> {
    capacity: usize,
    objective: Objective,
    heap: BinaryHeap<Entry<T>>,
}

impl<T: Element> BoundedTopK<T> {
    /// Create an empty selector holding at most `capacity` candidates.
    #[must_use]
    pub fn new(capacity: usize, objective: Objective) -> Self {
        Self {
            capacity,
            objective,
            heap: BinaryHeap::with_capacity(capacity),
        }
    }

    /// Keep the `capacity` smallest scores.
    #[must_use]
    pub fn minimize(capacity: usize) -> Self {
        Self::new(capacity, Objective::Minimize)
    }

    /// Keep the `capacity` largest scores.
    #[must_use]
    pub fn maximize(capacity: usize) -> Self {
        Self::new(capacity, Objective::Maximize)
    }

    /// Offer a candidate. Returns whether it was kept.
    ///
    /// While below capacity every candidate is kept. At capacity the
    /// candidate replaces the current worst only if it ranks strictly ahead
    /// of it. NaN scores are never kept.
    pub fn push(&mut self, index: usize, score: T) -> bool {
        if score.is_nan() || self.capacity == 0 {
            return false;
        }

        let entry = Entry {
            candidate: ScoredCandidate { index, score },
            objective: self.objective,
        };

        if self.heap.len() < self.capacity {
            self.heap.push(entry);
            return true;
        }

        match self.heap.peek_mut() {
            Some(mut worst) if entry < *worst => {
                *worst = entry;
                true
            }
            _ => false,
        }
    }

    /// The candidate that would be evicted next.
    #[must_use]
    pub fn worst(&self) -> Option<&ScoredCandidate<T>> {
        self.heap.peek().map(|entry| &entry.candidate)
    }

    /// Number of candidates currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether no candidate is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Maximum number of candidates held.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The ranking direction.
    #[must_use]
    pub fn objective(&self) -> Objective {
        self.objective
    }

    /// Consume the selector, returning candidates best first.
    #[must_use]
    pub fn into_sorted_vec(self) -> Vec<ScoredCandidate<T>> {
        // Ascending heap order is best-first because the worst entry is the greatest.
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|entry| entry.candidate)
            .collect()
    }

    /// Consume the selector into a [`RankedResult`].
    #[must_use]
    pub fn into_ranked(self) -> RankedResult<T> {
        self.into_sorted_vec().into()
    }
}

/// Select the k best of `scores`, where `scores[i]` belongs to row `i`.
#[must_use]
pub fn select<T: Element>(scores: &[T], k: usize, objective: Objective) -> Vec<ScoredCandidate<T>> {
    let mut top = BoundedTopK::new(k, objective);
    for (index, &score) in scores.iter().enumerate() {
        top.push(index, score);
    }
    top.into_sorted_vec()
}
