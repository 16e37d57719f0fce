//! Balancer lifecycle: two listeners around one registry.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{watch, OnceCell};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::BalancerConfig;
use crate::error::{BalancerError, Result};
use crate::health::HealthProbe;
use crate::proxy::{handle_private, handle_public, Front, ProxyBody};
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Listening,
    Closing,
    Closed,
}

struct Listeners {
    state: LifecycleState,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
    public_addr: Option<SocketAddr>,
    private_addr: Option<SocketAddr>,
}

/// A tile balancer: the public proxy listener, the private registration
/// listener and the registry they share.
pub struct Balancer {
    config: BalancerConfig,
    registry: Arc<Registry>,
    front: Arc<Front>,
    listeners: Mutex<Listeners>,
    closed: OnceCell<Result<()>>,
}

impl Balancer {
    pub fn new(config: BalancerConfig) -> Result<Self> {
        let registry = Registry::new(config.health_check(), config.ring_cache_size);
        Self::with_registry(config, registry)
    }

    /// Balancer whose health monitor uses `probe` instead of HTTP.
    pub fn with_probe(config: BalancerConfig, probe: Arc<dyn HealthProbe>) -> Result<Self> {
        let registry = Registry::with_probe(config.health_check(), config.ring_cache_size, probe);
        Self::with_registry(config, registry)
    }

    fn with_registry(config: BalancerConfig, registry: Arc<Registry>) -> Result<Self> {
        let front = Arc::new(Front::new(Arc::clone(&registry))?);
        Ok(Self {
            config,
            registry,
            front,
            listeners: Mutex::new(Listeners {
                state: LifecycleState::Created,
                shutdown: None,
                tasks: Vec::new(),
                public_addr: None,
                private_addr: None,
            }),
            closed: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn token(&self) -> &str {
        self.registry.token()
    }

    pub fn state(&self) -> LifecycleState {
        self.listeners.lock().state
    }

    pub fn public_addr(&self) -> Option<SocketAddr> {
        self.listeners.lock().public_addr
    }

    pub fn private_addr(&self) -> Option<SocketAddr> {
        self.listeners.lock().private_addr
    }

    /// Bind both listeners and start serving.
    ///
    /// If either bind fails, whatever already started is closed and the
    /// bind error is returned.
    pub async fn listen(&self) -> Result<()> {
        let shutdown = {
            let mut listeners = self.listeners.lock();
            if listeners.state != LifecycleState::Created {
                return Err(BalancerError::Listen {
                    addr: self.config.public_bind(),
                    message: format!("balancer is {:?}", listeners.state),
                });
            }
            listeners.state = LifecycleState::Listening;
            let (tx, rx) = watch::channel(false);
            listeners.shutdown = Some(tx);
            rx
        };

        let private = self
            .start(self.config.private_bind(), "private", shutdown.clone(), handle_private)
            .await;
        let public = match private {
            Ok(()) => {
                self.start(self.config.public_bind(), "public", shutdown, handle_public)
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = public {
            error!(error = %e, "Failed to start balancer");
            if let Err(close_err) = self.close().await {
                warn!(error = %close_err, "Shutdown after failed start also failed");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn start<H, F>(
        &self,
        addr: String,
        name: &'static str,
        shutdown: watch::Receiver<bool>,
        handler: H,
    ) -> Result<()>
    where
        H: Fn(Arc<Front>, SocketAddr, Request<Incoming>) -> F + Copy + Send + Sync + 'static,
        F: Future<Output = std::result::Result<Response<ProxyBody>, Infallible>> + Send + 'static,
    {
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| BalancerError::Listen {
                addr: addr.clone(),
                message: e.to_string(),
            })?;
        let local = listener.local_addr().map_err(|e| BalancerError::Listen {
            addr: addr.clone(),
            message: e.to_string(),
        })?;
        info!(addr = %local, "Listening ({})", name);

        let task = tokio::spawn(accept_loop(
            listener,
            name,
            Arc::clone(&self.front),
            shutdown,
            handler,
        ));

        let mut listeners = self.listeners.lock();
        match name {
            "public" => listeners.public_addr = Some(local),
            _ => listeners.private_addr = Some(local),
        }
        listeners.tasks.push(task);
        Ok(())
    }

    /// Stop both listeners and every health monitor.
    ///
    /// Returns once both listeners have stopped accepting and every open
    /// connection has finished its in-flight request.
    ///
    /// Safe to call repeatedly and concurrently: the first call does the
    /// work and every caller gets its outcome.
    pub async fn close(&self) -> Result<()> {
        self.closed.get_or_init(|| self.shutdown()).await.clone()
    }

    async fn shutdown(&self) -> Result<()> {
        let (signal, tasks) = {
            let mut listeners = self.listeners.lock();
            listeners.state = LifecycleState::Closing;
            (listeners.shutdown.take(), std::mem::take(&mut listeners.tasks))
        };
        if let Some(signal) = signal {
            // Receivers may already be gone.
            let _ = signal.send(true);
        }
        self.registry.shutdown();

        let mut outcome = Ok(());
        for task in tasks {
            if let Err(e) = task.await {
                outcome = Err(BalancerError::Shutdown(e.to_string()));
            }
        }

        self.listeners.lock().state = LifecycleState::Closed;
        info!("Balancer closed");
        outcome
    }
}

async fn accept_loop<H, F>(
    listener: TcpListener,
    name: &'static str,
    front: Arc<Front>,
    shutdown: watch::Receiver<bool>,
    handler: H,
) where
    H: Fn(Arc<Front>, SocketAddr, Request<Incoming>) -> F + Copy + Send + Sync + 'static,
    F: Future<Output = std::result::Result<Response<ProxyBody>, Infallible>> + Send + 'static,
{
    let mut stop = shutdown.clone();
    let mut connections = JoinSet::new();
    loop {
        let (stream, peer) = tokio::select! {
            _ = stopped(&mut stop) => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => continue,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(listener = name, error = %e, "Accept failed");
                    continue;
                }
            },
        };

        let front = Arc::clone(&front);
        let mut conn_stop = shutdown.clone();
        connections.spawn(async move {
            let service = service_fn(move |req| handler(Arc::clone(&front), peer, req));
            let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);
            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        debug!(peer = %peer, error = %e, "Connection error");
                    }
                }
                _ = stopped(&mut conn_stop) => {
                    conn.as_mut().graceful_shutdown();
                    let _ = conn.await;
                }
            }
        });
    }
    drop(listener);

    // In-flight requests finish before the listener counts as closed.
    debug!(listener = name, open = connections.len(), "Draining connections");
    while connections.join_next().await.is_some() {}
    debug!(listener = name, "Accept loop stopped");
}

/// Resolves once shutdown is signalled or the sender is gone.
async fn stopped(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|stopped| *stopped).await;
}
