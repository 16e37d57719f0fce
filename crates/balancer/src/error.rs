//! Error types for the balancer.

use thiserror::Error;

/// Result type alias for the balancer.
pub type Result<T> = std::result::Result<T, BalancerError>;

/// Errors surfaced by the registry, the listeners and the lifecycle.
///
/// A tile request that no node can serve is not an error: routing returns
/// `None` and the front answers 404.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalancerError {
    /// Malformed registration body or missing required field.
    #[error("{0}")]
    Validation(String),
    /// Health probe or proxy transport failure.
    #[error("upstream error: {0}")]
    Upstream(String),
    /// A listener could not bind.
    #[error("failed to listen on {addr}: {message}")]
    Listen { addr: String, message: String },
    /// A listener task failed while shutting down.
    #[error("shutdown failed: {0}")]
    Shutdown(String),
}

impl From<corelib::Error> for BalancerError {
    fn from(err: corelib::Error) -> Self {
        match err {
            corelib::Error::InvalidNode(msg) | corelib::Error::InvalidLayer(msg) => {
                BalancerError::Validation(msg)
            }
        }
    }
}
