//! Core library for the tile balancer.
//!
//! This crate provides the routing primitives the balancer is built from:
//! - Token types and the partitioner that places keys on the ring
//! - The weighted consistent hash ring with its lookup cache
//! - Node identity and network targets
//! - Layer routing options and tile geometry

pub mod error;
pub mod layer;
pub mod node;
pub mod partitioner;
pub mod ring;
pub mod tile;
pub mod token;
pub mod vnode;

pub use error::{Error, Result};
pub use layer::{BoundingBox, LayerOptions};
pub use node::{Node, NodeId, Target};
pub use partitioner::Partitioner;
pub use ring::{HashRing, RingBuilder};
pub use tile::TileCoord;
pub use token::Token;
pub use vnode::VirtualNode;
