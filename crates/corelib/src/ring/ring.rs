//! Weighted consistent hash ring.
//!
//! Holds `BTreeMap<SipToken, Target>` plus the weight each target has been
//! added with. Lookups hash the routing key and walk clockwise to the first
//! vnode at or after it, wrapping around to the lowest token.
//!
//! The ring is not internally synchronized for mutation: `add` and `remove`
//! take `&mut self`, and callers that share a ring across threads must
//! serialize writers against readers. `get` takes `&self`; its lookup cache
//! carries its own lock.

use std::collections::{BTreeMap, HashMap};

use tracing::trace;

use crate::node::Target;
use crate::partitioner::{Partitioner, SipPartitioner};
use crate::ring::cache::LookupCache;
use crate::token::sip::SipToken;
use crate::token::Token;
use crate::vnode::VirtualNode;

/// Number of vnodes contributed by one unit of weight.
pub const DEFAULT_VNODES_PER_WEIGHT: u32 = 40;

/// Upper bound on vnode density; builder values above it are clamped.
pub const MAX_VNODES_PER_WEIGHT: u32 = 1000;

/// Consistent hash ring over weighted targets.
#[derive(Debug)]
pub struct HashRing {
    vnodes: BTreeMap<SipToken, Target>,
    /// Accumulated weight per target.
    weights: HashMap<Target, u32>,
    vnodes_per_weight: u32,
    partitioner: SipPartitioner,
    cache: LookupCache,
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}

impl HashRing {
    /// Empty ring with default vnode density and no lookup cache.
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_VNODES_PER_WEIGHT, 0)
    }

    fn with_settings(vnodes_per_weight: u32, cache_capacity: usize) -> Self {
        Self {
            vnodes: BTreeMap::new(),
            weights: HashMap::new(),
            vnodes_per_weight: vnodes_per_weight.clamp(1, MAX_VNODES_PER_WEIGHT),
            partitioner: SipPartitioner,
            cache: LookupCache::new(cache_capacity),
        }
    }

    /// Add `target` with `weight`, or grow its share if already present.
    ///
    /// A weight of zero is a no-op.
    pub fn add(&mut self, target: &Target, weight: u32) {
        if weight == 0 {
            return;
        }
        let existing = self.weights.get(target).copied().unwrap_or(0);
        let total = existing.saturating_add(weight);
        let first = existing.saturating_mul(self.vnodes_per_weight);
        let last = total.saturating_mul(self.vnodes_per_weight);

        for index in first..last {
            let vnode = VirtualNode::from_index(&self.partitioner, target, index);
            // On a token collision the earlier owner keeps the position.
            self.vnodes.entry(vnode.token).or_insert(vnode.target);
        }

        self.weights.insert(target.clone(), total);
        self.cache.clear();
        trace!(%target, weight = total, vnodes = self.vnodes.len(), "ring add");
    }

    /// Remove every vnode of `target`. Returns false if it was not present.
    pub fn remove(&mut self, target: &Target) -> bool {
        if self.weights.remove(target).is_none() {
            return false;
        }
        self.vnodes.retain(|_, owner| owner != target);
        self.cache.clear();
        trace!(%target, vnodes = self.vnodes.len(), "ring remove");
        true
    }

    /// Resolve `key` to the owning target, or `None` on an empty ring.
    ///
    /// For a fixed membership the same key always resolves to the same
    /// target.
    pub fn get(&self, key: &str) -> Option<Target> {
        if self.vnodes.is_empty() {
            return None;
        }
        if let Some(hit) = self.cache.get(key) {
            return Some(hit);
        }

        let token = self.partitioner.partition(key.as_bytes());
        let owner = self
            .vnodes
            .range(token..)
            .next()
            .or_else(|| self.vnodes.iter().next())
            .map(|(_, target)| target.clone())?;

        self.cache.insert(key, owner.clone());
        Some(owner)
    }

    pub fn contains(&self, target: &Target) -> bool {
        self.weights.contains_key(target)
    }

    /// Accumulated weight of `target`, if present.
    pub fn weight(&self, target: &Target) -> Option<u32> {
        self.weights.get(target).copied()
    }

    /// Number of distinct targets.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Total number of vnodes on the ring.
    pub fn vnode_count(&self) -> usize {
        self.vnodes.len()
    }

    /// All targets, sorted.
    pub fn targets(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = self.weights.keys().cloned().collect();
        targets.sort();
        targets
    }

    /// All vnodes in ring order (for debugging).
    pub fn vnodes(&self) -> Vec<VirtualNode> {
        self.vnodes
            .iter()
            .map(|(token, target)| VirtualNode::new(*token, target.clone()))
            .collect()
    }

    /// Fraction of the keyspace each target owns.
    ///
    /// A vnode owns the arc from the previous vnode (exclusive) up to its own
    /// token. Fractions sum to 1 for a non-empty ring.
    pub fn ownership(&self) -> HashMap<Target, f64> {
        let mut shares: HashMap<Target, f64> = HashMap::new();
        let Some((last, _)) = self.vnodes.iter().next_back() else {
            return shares;
        };

        let mut prev = *last;
        for (token, target) in &self.vnodes {
            let arc = prev.distance_to(token);
            // A lone vnode is its own predecessor and owns the whole ring.
            let share = if arc.is_zero() { 1.0 } else { arc.ring_fraction() };
            *shares.entry(target.clone()).or_insert(0.0) += share;
            prev = *token;
        }
        shares
    }

    /// Number of cached lookups.
    pub fn cached_lookups(&self) -> usize {
        self.cache.len()
    }

    pub fn partitioner_name(&self) -> &'static str {
        self.partitioner.name()
    }
}

/// Builder for a `HashRing` with non-default settings.
#[derive(Debug, Clone)]
pub struct RingBuilder {
    vnodes_per_weight: u32,
    cache_capacity: usize,
    targets: Vec<(Target, u32)>,
}

impl Default for RingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RingBuilder {
    pub fn new() -> Self {
        Self {
            vnodes_per_weight: DEFAULT_VNODES_PER_WEIGHT,
            cache_capacity: 0,
            targets: Vec::new(),
        }
    }

    /// Vnodes contributed by each unit of weight.
    pub fn with_vnodes_per_weight(mut self, vnodes: u32) -> Self {
        self.vnodes_per_weight = vnodes;
        self
    }

    /// Lookup cache capacity; 0 disables the cache.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn add_target(mut self, target: impl Into<Target>, weight: u32) -> Self {
        self.targets.push((target.into(), weight));
        self
    }

    pub fn build(self) -> HashRing {
        let mut ring = HashRing::with_settings(self.vnodes_per_weight, self.cache_capacity);
        for (target, weight) in &self.targets {
            ring.add(target, *weight);
        }
        ring
    }
}
