//! Partitioner trait.

use crate::token::Token;

/// Maps routing keys and vnode labels to ring positions.
///
/// Placement must depend on the key bytes alone, so two balancers with the
/// same membership route every key identically.
pub trait Partitioner: Send + Sync + 'static {
    type TokenType: Token;

    fn partition(&self, key: &[u8]) -> Self::TokenType;

    /// Name reported in diagnostics.
    fn name(&self) -> &'static str;
}
