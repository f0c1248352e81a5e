use std::fmt;

/// The weight domain used to rank executions of a pushdown system.
///
/// The `Ord` bound is the "shorter than" relation: smaller weights are
/// better. Implementations must satisfy:
///
/// - `zero()` is the identity of `extend` and the least element.
/// - `top()` is the identity of `combine` and the greatest element; it
///   represents unreachability.
/// - `extend` is associative and never improves a weight, i.e.
///   `extend(a, b) >= a` and `extend(a, b) >= b`.
///
/// Together with the idempotent `combine` this is what makes the
/// priority-driven saturation correct: once an edge has been settled at some
/// weight, no later derivation can beat it.
pub trait Weight: Clone + Eq + Ord + fmt::Debug {
    /// The weight of the empty execution; identity of `extend`.
    fn zero() -> Self;

    /// The weight representing unreachability; strictly worse than the
    /// weight of any execution.
    fn top() -> Self;

    /// Concatenates two executions.
    fn extend(&self, other: &Self) -> Self;

    /// Picks the better of two alternative executions.
    fn combine(self, other: Self) -> Self {
        self.min(other)
    }
}

/// The trivial domain for unweighted reachability: every execution weighs
/// the same and `extend` collapses to "both present".
impl Weight for () {
    fn zero() -> Self {}

    fn top() -> Self {}

    fn extend(&self, _other: &Self) -> Self {}
}

macro_rules! tropical_weight {
    ($ty:ty) => {
        /// The tropical interpretation: weights add up along an execution
        /// and alternatives are resolved by taking the minimum.
        impl Weight for $ty {
            fn zero() -> Self {
                0
            }

            fn top() -> Self {
                <$ty>::MAX
            }

            fn extend(&self, other: &Self) -> Self {
                self.saturating_add(*other)
            }
        }
    };
}

tropical_weight!(u32);
tropical_weight!(u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tropical_weight() {
        assert_eq!(u32::zero().extend(&3), 3);
        assert_eq!(3u32.extend(&4), 7);
        assert_eq!(3u32.combine(4), 3);
        assert_eq!(u32::top().extend(&1), u32::MAX);
        assert!(u32::zero() < u32::top());
    }
}
