//! Error types for the core library.

use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Invalid node declaration (missing id, bad port, zero weight)
    #[error("Invalid node: {0}")]
    InvalidNode(String),
    /// Invalid layer declaration (missing name, bad options)
    #[error("Invalid layer: {0}")]
    InvalidLayer(String),
}
