//! Log subscriber setup.

use tracing_subscriber::EnvFilter;

/// Install the console subscriber. `RUST_LOG` wins over `level`.
///
/// Call once, before anything logs.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
