//! Balancer configuration.

use std::time::Duration;

use crate::health::HealthCheckConfig;

/// Shortest health check interval; smaller values are raised to it.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(1);

/// Runtime settings for a [`Balancer`](crate::Balancer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancerConfig {
    /// Interface both listeners bind to.
    pub hostname: String,
    /// Public (tile) port. 0 picks an ephemeral port.
    pub port: u16,
    /// Private (registration) port. 0 picks an ephemeral port.
    pub private_port: u16,
    /// Delay between health probes; also the probe timeout.
    pub check_interval: Duration,
    /// Unhealthy count at which a node is evicted.
    pub unhealthy_count: u32,
    /// Lookup cache entries per layer ring; 0 disables the cache.
    pub ring_cache_size: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            hostname: "0.0.0.0".to_string(),
            port: 8080,
            private_port: 8081,
            check_interval: Duration::from_millis(5000),
            unhealthy_count: 1,
            ring_cache_size: 5000,
        }
    }
}

impl BalancerConfig {
    pub fn public_bind(&self) -> String {
        bind_addr(&self.hostname, self.port)
    }

    pub fn private_bind(&self) -> String {
        bind_addr(&self.hostname, self.private_port)
    }

    /// Health monitor settings derived from this config.
    pub fn health_check(&self) -> HealthCheckConfig {
        HealthCheckConfig {
            interval: self.check_interval.max(MIN_CHECK_INTERVAL),
            threshold: self.unhealthy_count.max(1),
        }
    }
}

fn bind_addr(hostname: &str, port: u16) -> String {
    if hostname.contains(':') && !hostname.starts_with('[') {
        format!("[{}]:{}", hostname, port)
    } else {
        format!("{}:{}", hostname, port)
    }
}
