//! Numeric element trait for query and candidate buffers.

/// A floating-point element type the kernels operate on.
///
/// Implemented for `f32` and `f64` only; element type dispatch happens at
/// compile time through this trait.
pub trait Element:
    num_traits::Float + std::fmt::Debug + std::fmt::Display + Default + Send + Sync + 'static
{
    /// Short type name, e.g. `"f32"`.
    const NAME: &'static str;

    /// IEEE 754 total order, used wherever candidates are ranked.
    fn total_order(&self, other: &Self) -> std::cmp::Ordering;
}

impl Element for f32 {
    const NAME: &'static str = "f32";

    #[inline]
    fn total_order(&self, other: &Self) -> std::cmp::Ordering {
        self.total_cmp(other)
    }
}

impl Element for f64 {
    const NAME: &'static str = "f64";

    #[inline]
    fn total_order(&self, other: &Self) -> std::cmp::Ordering {
        self.total_cmp(other)
    }
}
