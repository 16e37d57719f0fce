//! Consistent hash ring implementation.
//!
//! The ring manages weighted targets as virtual-node tokens and resolves
//! routing keys to the target owning the nearest token clockwise.

pub mod cache;
#[allow(clippy::module_inception)]
pub mod ring;

pub use cache::LookupCache;
pub use ring::{HashRing, RingBuilder, DEFAULT_VNODES_PER_WEIGHT, MAX_VNODES_PER_WEIGHT};
