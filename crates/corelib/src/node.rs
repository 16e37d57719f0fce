//! Node abstractions for the balancer.
//!
//! A node is a tile-rendering process that registers itself with the
//! balancer. It is identified by an opaque `NodeId` chosen by the node and
//! reached through a `Target` (`host:port`), which is the unit the ring
//! routes to.

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::error::{Error, Result};

/// Identifier supplied by a registering node.
///
/// Stable for the lifetime of the node process, but not guaranteed unique
/// across restarts of a process on the same address.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap a raw identifier, rejecting the empty string.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidNode("empty node id".to_string()));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network address of a node, `host:port`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Target(String);

impl Target {
    /// Build the target for a node connecting from `ip` and declaring
    /// `listen_port`.
    ///
    /// IPv4-mapped IPv6 peers are folded back to IPv4 so a dual-stack
    /// listener produces the same target as an IPv4 one.
    pub fn from_peer(ip: IpAddr, listen_port: u16) -> Self {
        Self(SocketAddr::new(ip.to_canonical(), listen_port).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of a registered node.
///
/// Keep this struct small and cheap to clone; health bookkeeping lives with
/// the registry's monitor handles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub target: Target,
    /// Relative share of the ring, at least 1.
    pub weight: u32,
    /// Names of the layers this node serves.
    pub layers: BTreeSet<String>,
}

impl Node {
    pub fn new(id: NodeId, target: Target, weight: u32) -> Self {
        Self {
            id,
            target,
            weight,
            layers: BTreeSet::new(),
        }
    }

    pub fn with_layers<I, S>(mut self, layers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.layers.extend(layers.into_iter().map(Into::into));
        self
    }
}
