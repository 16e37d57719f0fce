//! Key placement.
//!
//! Routing keys (`layer/z/x/y`) and vnode labels (`host:port-index`) go
//! through the same partitioner, so both share one token space.

pub mod sip;
pub mod traits;

pub use sip::SipPartitioner;
pub use traits::Partitioner;
