//! Ring position trait.

use std::fmt::Debug;
use std::hash::Hash;

/// A position on the ring.
///
/// Positions order clockwise from the smallest value; the distance between
/// two of them wraps past the largest value back to the smallest.
pub trait Token: Copy + Ord + Hash + Send + Sync + Debug + 'static {
    /// True for the zero-length distance.
    fn is_zero(&self) -> bool;

    /// Clockwise distance from `self` to `other`.
    fn distance_to(&self, other: &Self) -> Self;

    /// `self` read as an arc length, as a fraction of the whole ring.
    fn ring_fraction(&self) -> f64;
}
