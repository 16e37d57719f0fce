//! SipHash token implementation.

use crate::token::traits::Token;
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

/// Ring token using u64 representation.
///
/// Produced by SipHash-1-3 with the all-zero key, so the same key lands on
/// the same position in every balancer process.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SipToken(pub u64);

impl Token for SipToken {
    fn is_zero(&self) -> bool {
        self.0 == 0
    }

    fn distance_to(&self, other: &Self) -> Self {
        SipToken(other.0.wrapping_sub(self.0))
    }

    fn ring_fraction(&self) -> f64 {
        self.0 as f64 / 2f64.powi(64)
    }
}

impl SipToken {
    /// Creates a token from a byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = SipHasher13::new();
        hasher.write(data);
        SipToken(hasher.finish())
    }

    /// Creates a token from a string key.
    pub fn from_key(key: &str) -> Self {
        Self::from_bytes(key.as_bytes())
    }
}
