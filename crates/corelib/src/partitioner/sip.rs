//! SipHash partitioner implementation.

use crate::partitioner::traits::Partitioner;
use crate::token::sip::SipToken;

/// Default partitioner for routing keys and vnode labels.
#[derive(Clone, Debug, Default)]
pub struct SipPartitioner;

impl Partitioner for SipPartitioner {
    type TokenType = SipToken;

    fn partition(&self, key: &[u8]) -> Self::TokenType {
        SipToken::from_bytes(key)
    }

    fn name(&self) -> &'static str {
        "SipPartitioner"
    }
}
