//! Command-line and environment configuration.

use std::time::Duration;

use balancer::BalancerConfig;
use clap::{ArgAction, Parser};

/// Consistent-hashing load balancer for tile servers.
#[derive(Debug, Clone, Parser)]
#[command(name = "tile-balancer", version, about, disable_help_flag = true)]
pub struct CliConfig {
    /// Interface to bind both listeners to.
    #[arg(short = 'h', long, env = "BALANCER_HOSTNAME", default_value = "0.0.0.0")]
    pub hostname: String,

    /// Public port serving tile requests.
    #[arg(short, long, env = "BALANCER_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Private port nodes register on.
    #[arg(long, env = "BALANCER_PRIVATE_PORT", default_value_t = 8081)]
    pub private_port: u16,

    /// Milliseconds between node health checks.
    #[arg(
        long,
        env = "BALANCER_CHECK_INTERVAL",
        default_value_t = 5000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub check_interval: u64,

    /// Failed checks (net of successes) before a node is removed.
    #[arg(long, env = "BALANCER_UNHEALTHY_COUNT", default_value_t = 1)]
    pub unhealthy_count: u32,

    /// Lookup cache entries per layer ring (0 disables).
    #[arg(long, env = "BALANCER_HASHRING_CACHE_SIZE", default_value_t = 5000)]
    pub hashring_cache_size: usize,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Print help.
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

impl CliConfig {
    pub fn balancer_config(&self) -> BalancerConfig {
        BalancerConfig {
            hostname: self.hostname.clone(),
            port: self.port,
            private_port: self.private_port,
            check_interval: Duration::from_millis(self.check_interval),
            unhealthy_count: self.unhealthy_count.max(1),
            ring_cache_size: self.hashring_cache_size,
        }
    }
}
