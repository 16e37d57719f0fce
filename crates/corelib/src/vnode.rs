//! Ring placements of a target.
//!
//! A target registered with weight `w` is placed `w * vnodes_per_weight`
//! times, at the hashes of the labels `"{target}-0"`, `"{target}-1"`, and so
//! on. Its share of the keyspace then tracks its weight, and a departing
//! target hands its keys to every remaining target instead of one neighbour.
//! Lookups stay `O(log n)` in the total number of placements.

use crate::node::Target;
use crate::partitioner::Partitioner;
use crate::token::sip::SipToken;
use crate::token::Token;

/// One placement of a target on the ring. Labels are unique per target, so
/// two placements of the same target only collide on a hash collision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualNode {
    /// Token position on the ring.
    pub token: SipToken,

    /// The target that owns this virtual node.
    pub target: Target,
}

impl VirtualNode {
    #[inline]
    pub fn new(token: SipToken, target: Target) -> Self {
        Self { token, target }
    }

    /// Create the `index`-th virtual node of `target`.
    ///
    /// The token is the partition of the label `"{target}-{index}"`, so a
    /// target's vnodes land on the same positions in every process.
    pub fn from_index<P>(partitioner: &P, target: &Target, index: u32) -> Self
    where
        P: Partitioner<TokenType = SipToken>,
    {
        let label = format!("{}-{}", target, index);
        Self::new(partitioner.partition(label.as_bytes()), target.clone())
    }

    #[inline]
    pub fn token(&self) -> SipToken {
        self.token
    }

    #[inline]
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Clockwise distance to another virtual node.
    #[inline]
    pub fn distance_to(&self, other: &Self) -> SipToken {
        self.token.distance_to(&other.token)
    }
}

impl std::fmt::Display for VirtualNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VNode(token={:016x}, target={})", self.token.0, self.target)
    }
}
