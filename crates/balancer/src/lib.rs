//! Consistent-hashing load balancer for tile servers.
//!
//! Nodes register over a private HTTP listener and declare the layers they
//! serve. Tile requests on the public listener are routed by layer and tile
//! coordinates onto a per-layer weighted hash ring, so the same tile (and
//! every tile in its metatile block) keeps landing on the same node. Nodes
//! that stop answering health probes are dropped from rotation.
//!
//! # Example
//!
//! ```no_run
//! use balancer::{Balancer, BalancerConfig};
//!
//! # async fn run() -> balancer::Result<()> {
//! let balancer = Balancer::new(BalancerConfig::default())?;
//! balancer.listen().await?;
//! // ...
//! balancer.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod protocol;
mod proxy;
pub mod registry;
pub mod route;
pub mod server;

pub use config::BalancerConfig;
pub use error::{BalancerError, Result};
pub use health::{FailureDetector, HealthCheckConfig, HealthProbe, HttpProbe, Verdict};
pub use protocol::{RegisterResponse, Registration, MAX_NODE_WEIGHT};
pub use registry::Registry;
pub use route::TileRequest;
pub use server::{Balancer, LifecycleState};
