//! Active health monitoring.
//!
//! Every live node id gets one probe loop. A loop sleeps for the check
//! interval, issues a single probe bounded by the same interval, feeds the
//! outcome to the registry and only then schedules the next probe, so
//! probes for one node never overlap.
//!
//! Failures are counted with a leaky bucket: a failure adds one, a success
//! takes one away (never below zero), and the node is evicted once the count
//! reaches the configured threshold.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Empty;
use hyper::{Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use corelib::node::{NodeId, Target};

use crate::error::{BalancerError, Result};
use crate::registry::Registry;

/// Header carrying the balancer token on probe requests.
pub const TOKEN_HEADER: &str = "x-balancer-token";

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckConfig {
    /// Delay before each probe, and the probe's timeout.
    pub interval: Duration,
    /// Unhealthy count at which the node is evicted, at least 1.
    pub threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            threshold: 1,
        }
    }
}

/// Something that can tell whether a node is alive.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    /// Probe `target` once. `Ok` means healthy.
    async fn probe(&self, target: &Target, token: &str, timeout: Duration) -> Result<()>;
}

/// Probes `GET http://{target}/health`; only a 200 counts as healthy.
#[derive(Clone)]
pub struct HttpProbe {
    client: Client<HttpConnector, Empty<Bytes>>,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, target: &Target, token: &str, timeout: Duration) -> Result<()> {
        let request = Request::builder()
            .method("GET")
            .uri(format!("http://{}/health", target))
            .header(TOKEN_HEADER, token)
            .body(Empty::new())
            .map_err(|e| BalancerError::Upstream(format!("failed to build probe: {}", e)))?;

        let response = tokio::time::timeout(timeout, self.client.request(request))
            .await
            .map_err(|_| BalancerError::Upstream(format!("timed out after {:?}", timeout)))?
            .map_err(|e| BalancerError::Upstream(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(BalancerError::Upstream(format!(
                "health check returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Decision after one probe outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Evict,
}

/// Leaky-bucket failure counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDetector {
    unhealthy: u32,
    threshold: u32,
}

impl FailureDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            unhealthy: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn record(&mut self, healthy: bool) -> Verdict {
        if healthy {
            self.unhealthy = self.unhealthy.saturating_sub(1);
        } else {
            self.unhealthy += 1;
        }
        if self.unhealthy >= self.threshold {
            Verdict::Evict
        } else {
            Verdict::Keep
        }
    }

    pub fn unhealthy(&self) -> u32 {
        self.unhealthy
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

/// Probe loop for a single node binding.
///
/// Holds the registry weakly: a dropped registry ends the loop.
pub(crate) struct Monitor {
    pub(crate) registry: Weak<Registry>,
    pub(crate) probe: Arc<dyn HealthProbe>,
    pub(crate) id: NodeId,
    pub(crate) target: Target,
    pub(crate) token: Arc<str>,
    pub(crate) interval: Duration,
    pub(crate) generation: u64,
}

impl Monitor {
    /// Start the probe loop on the current Tokio runtime. Returns `None`
    /// when called outside one.
    pub(crate) fn spawn(self) -> Option<JoinHandle<()>> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        Some(handle.spawn(self.run()))
    }

    async fn run(self) {
        loop {
            tokio::time::sleep(self.interval).await;
            if self.registry.strong_count() == 0 {
                return;
            }

            let healthy = match self
                .probe
                .probe(&self.target, &self.token, self.interval)
                .await
            {
                Ok(()) => true,
                Err(e) => {
                    metrics::counter!("balancer_health_probe_failures_total").increment(1);
                    debug!(id = %self.id, target = %self.target, error = %e, "Health probe failed");
                    false
                }
            };

            let Some(registry) = self.registry.upgrade() else {
                return;
            };
            match registry.record_probe(&self.id, self.generation, healthy) {
                Some(Verdict::Keep) => {}
                Some(Verdict::Evict) => {
                    warn!(id = %self.id, target = %self.target, "Evicted unhealthy node");
                    return;
                }
                // Binding is gone or superseded.
                None => return,
            }
        }
    }
}
