//! Node registry.
//!
//! Owns every layer ring, the stored layer options and the identity and
//! health bookkeeping of registered nodes. All of it sits behind a single
//! `RwLock`: `pick` takes the read side, so lookups run in parallel, while
//! `register`, `unregister` and eviction take the write side and never
//! interleave with a lookup or with each other.
//!
//! Health monitors are tokio tasks whose handles live in the node record.
//! They are aborted inside the same critical section that removes the
//! record, and each carries a generation number that the registry checks
//! before acting on its verdict.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::RngCore;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use corelib::layer::LayerOptions;
use corelib::node::{Node, NodeId, Target};
use corelib::ring::{HashRing, RingBuilder};
use corelib::tile::TileCoord;

use crate::error::Result;
use crate::health::{FailureDetector, HealthCheckConfig, HealthProbe, HttpProbe, Monitor, Verdict};
use crate::protocol::Registration;

/// Random bytes in the balancer token.
const TOKEN_BYTES: usize = 64;

/// Hex-encoded random token handed to nodes at registration.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

struct MonitorState {
    generation: u64,
    detector: FailureDetector,
    task: Option<JoinHandle<()>>,
}

impl MonitorState {
    fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct NodeRecord {
    node: Node,
    monitor: Option<MonitorState>,
}

struct Layer {
    options: LayerOptions,
    ring: HashRing,
}

#[derive(Default)]
struct State {
    nodes: HashMap<NodeId, NodeRecord>,
    by_target: HashMap<Target, NodeId>,
    layers: HashMap<String, Layer>,
    next_generation: u64,
    stopped: bool,
}

impl State {
    fn layer_mut(&mut self, name: &str, cache_size: usize) -> &mut Layer {
        self.layers.entry(name.to_string()).or_insert_with(|| Layer {
            options: LayerOptions::default(),
            ring: RingBuilder::new().with_cache_capacity(cache_size).build(),
        })
    }

    /// Drop `id` and everything routed to it. Returns the removed node.
    fn remove(&mut self, id: &NodeId) -> Option<Node> {
        let record = self.nodes.remove(id)?;
        if let Some(monitor) = record.monitor {
            monitor.cancel();
        }
        let node = record.node;
        if self.by_target.get(&node.target) == Some(id) {
            self.by_target.remove(&node.target);
        }
        for name in &node.layers {
            if let Some(layer) = self.layers.get_mut(name) {
                layer.ring.remove(&node.target);
            }
        }
        Some(node)
    }
}

/// The balancer's routing and membership state.
pub struct Registry {
    state: RwLock<State>,
    token: Arc<str>,
    health: HealthCheckConfig,
    probe: Arc<dyn HealthProbe>,
    ring_cache_size: usize,
}

impl Registry {
    /// Registry probing nodes over HTTP.
    pub fn new(health: HealthCheckConfig, ring_cache_size: usize) -> Arc<Self> {
        Self::with_probe(health, ring_cache_size, Arc::new(HttpProbe::new()))
    }

    pub fn with_probe(
        health: HealthCheckConfig,
        ring_cache_size: usize,
        probe: Arc<dyn HealthProbe>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(State::default()),
            token: Arc::from(generate_token()),
            health: HealthCheckConfig {
                threshold: health.threshold.max(1),
                ..health
            },
            probe,
            ring_cache_size,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn health_config(&self) -> &HealthCheckConfig {
        &self.health
    }

    /// Add a node connecting from `peer`.
    ///
    /// Returns `true` when the node's target was newly put into rotation,
    /// `false` when the id was already live or took over a target bound to
    /// another id. In the takeover case the ring is left alone so the target
    /// stays routable throughout.
    ///
    /// Health monitors run on the Tokio runtime of the caller. Outside a
    /// runtime the node is still registered but goes unmonitored.
    pub fn register(self: &Arc<Self>, peer: IpAddr, registration: Registration) -> Result<bool> {
        for (_, options) in &registration.layers {
            options.validate()?;
        }
        let Registration {
            id,
            listen_port,
            weight,
            layers,
        } = registration;
        let target = Target::from_peer(peer, listen_port);
        let weight = weight.max(1);

        let mut state = self.state.write();

        if state.nodes.contains_key(&id) {
            trace!(id = %id, "Node already registered");
            self.watch_locked(&mut state, &id);
            return Ok(false);
        }

        if let Some(previous) = state.by_target.get(&target).cloned() {
            // Same address, new identity: the process restarted before its
            // old id was cleaned up. Hand the binding over without touching
            // the rings.
            let inherited = match state.nodes.remove(&previous) {
                Some(record) => {
                    if let Some(monitor) = record.monitor {
                        monitor.cancel();
                    }
                    record.node
                }
                None => Node::new(previous.clone(), target.clone(), weight),
            };
            for (name, options) in layers {
                state.layer_mut(&name, self.ring_cache_size).options = options;
            }
            let node = Node {
                id: id.clone(),
                ..inherited
            };
            state.by_target.insert(target.clone(), id.clone());
            state.nodes.insert(
                id.clone(),
                NodeRecord {
                    node,
                    monitor: None,
                },
            );
            self.watch_locked(&mut state, &id);

            info!(id = %id, previous = %previous, target = %target, "Reconciled node identity");
            return Ok(false);
        }

        let mut node = Node::new(id.clone(), target.clone(), weight);
        for (name, options) in layers {
            let fresh = node.layers.insert(name.clone());
            let layer = state.layer_mut(&name, self.ring_cache_size);
            layer.options = options;
            if fresh {
                layer.ring.add(&target, weight);
            }
        }
        state.by_target.insert(target.clone(), id.clone());
        state.nodes.insert(
            id.clone(),
            NodeRecord {
                node,
                monitor: None,
            },
        );
        self.watch_locked(&mut state, &id);

        metrics::counter!("balancer_nodes_registered_total").increment(1);
        metrics::gauge!("balancer_live_nodes").set(state.nodes.len() as f64);
        info!(id = %id, target = %target, weight, "Added node");
        Ok(true)
    }

    /// Remove `id` from every ring it joined and cancel its monitor. Unknown
    /// ids are ignored. Returns whether anything was removed.
    pub fn unregister(&self, id: &NodeId) -> bool {
        let mut state = self.state.write();
        match state.remove(id) {
            Some(node) => {
                metrics::counter!("balancer_nodes_removed_total").increment(1);
                metrics::gauge!("balancer_live_nodes").set(state.nodes.len() as f64);
                info!(id = %id, target = %node.target, "Removed node");
                true
            }
            None => false,
        }
    }

    /// Resolve a tile request to a target, or `None` if no node serves it.
    pub fn pick(&self, layer: &str, file: &str, z: u32, x: u32, y: u32) -> Option<Target> {
        let tile = TileCoord::new(z, x, y);
        let state = self.state.read();
        let Some(entry) = state.layers.get(layer) else {
            trace!(layer, "Unknown layer");
            return None;
        };
        if !entry.options.admits(&tile) {
            trace!(layer, %tile, "Tile outside layer bounds");
            return None;
        }
        let key = entry.options.routing_key(layer, tile);
        let target = entry.ring.get(&key);
        trace!(layer, file, key = %key, target = ?target, "Picked target");
        target
    }

    /// Start the health monitor for `id` unless one is already running.
    /// Returns whether `id` is monitored afterwards, which is never the case
    /// outside a Tokio runtime.
    pub fn watch(self: &Arc<Self>, id: &NodeId) -> bool {
        let mut state = self.state.write();
        self.watch_locked(&mut state, id)
    }

    fn watch_locked(self: &Arc<Self>, state: &mut State, id: &NodeId) -> bool {
        if state.stopped {
            return false;
        }
        let generation = state.next_generation;
        let Some(record) = state.nodes.get_mut(id) else {
            return false;
        };
        if let Some(monitor) = &record.monitor {
            if monitor.task.as_ref().is_some_and(|t| !t.is_finished()) {
                return true;
            }
        }

        let monitor = Monitor {
            registry: Arc::downgrade(self),
            probe: Arc::clone(&self.probe),
            id: id.clone(),
            target: record.node.target.clone(),
            token: Arc::clone(&self.token),
            interval: self.health.interval,
            generation,
        };
        let Some(task) = monitor.spawn() else {
            warn!(id = %id, "No Tokio runtime; node will not be health checked");
            return false;
        };
        record.monitor = Some(MonitorState {
            generation,
            detector: FailureDetector::new(self.health.threshold),
            task: Some(task),
        });
        state.next_generation += 1;
        debug!(id = %id, generation, "Watching node");
        true
    }

    /// Apply one probe outcome from the monitor with `generation`.
    ///
    /// Returns `None` if `id` is gone or now watched by a newer monitor, in
    /// which case the caller must stop. On `Evict` the node has already been
    /// unregistered.
    pub(crate) fn record_probe(&self, id: &NodeId, generation: u64, healthy: bool) -> Option<Verdict> {
        let mut state = self.state.write();
        let record = state.nodes.get_mut(id)?;
        let monitor = record.monitor.as_mut().filter(|m| m.generation == generation)?;

        let verdict = monitor.detector.record(healthy);
        if !healthy {
            debug!(id = %id, unhealthy = monitor.detector.unhealthy(), "Node failed health check");
        }
        if verdict == Verdict::Evict {
            // The calling task is the monitor; let it finish on its own.
            monitor.task = None;
            if let Some(node) = state.remove(id) {
                metrics::counter!("balancer_nodes_evicted_total").increment(1);
                metrics::gauge!("balancer_live_nodes").set(state.nodes.len() as f64);
                info!(id = %id, target = %node.target, "Removed unhealthy node");
            }
        }
        Some(verdict)
    }

    /// Cancel every monitor and refuse to start new ones.
    pub fn shutdown(&self) {
        let mut state = self.state.write();
        state.stopped = true;
        let mut cancelled = 0;
        for record in state.nodes.values_mut() {
            if let Some(monitor) = record.monitor.take() {
                monitor.cancel();
                cancelled += 1;
            }
        }
        debug!(cancelled, "Stopped health monitors");
    }

    pub fn target_of(&self, id: &NodeId) -> Option<Target> {
        self.state.read().nodes.get(id).map(|r| r.node.target.clone())
    }

    pub fn id_for(&self, target: &Target) -> Option<NodeId> {
        self.state.read().by_target.get(target).cloned()
    }

    pub fn layers_of(&self, id: &NodeId) -> Option<BTreeSet<String>> {
        self.state.read().nodes.get(id).map(|r| r.node.layers.clone())
    }

    /// Snapshot of a registered node.
    pub fn node(&self, id: &NodeId) -> Option<Node> {
        self.state.read().nodes.get(id).map(|r| r.node.clone())
    }

    pub fn unhealthy_count(&self, id: &NodeId) -> Option<u32> {
        let state = self.state.read();
        let record = state.nodes.get(id)?;
        Some(record.monitor.as_ref().map_or(0, |m| m.detector.unhealthy()))
    }

    pub fn is_monitored(&self, id: &NodeId) -> bool {
        self.state
            .read()
            .nodes
            .get(id)
            .and_then(|r| r.monitor.as_ref())
            .and_then(|m| m.task.as_ref())
            .is_some_and(|t| !t.is_finished())
    }

    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn layer_options(&self, layer: &str) -> Option<LayerOptions> {
        self.state.read().layers.get(layer).map(|l| l.options.clone())
    }

    /// Number of distinct targets in `layer`'s ring; 0 for unknown layers.
    pub fn ring_len(&self, layer: &str) -> usize {
        self.state.read().layers.get(layer).map_or(0, |l| l.ring.len())
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        for record in self.state.get_mut().nodes.values_mut() {
            if let Some(monitor) = record.monitor.take() {
                monitor.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BalancerError;
    use async_trait::async_trait;
    use corelib::layer::BboxSpec;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const INTERVAL: Duration = Duration::from_millis(1000);
    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    /// Plays back a fixed list of outcomes, then reports healthy.
    struct ScriptedProbe {
        outcomes: Mutex<VecDeque<bool>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(outcomes: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, _: &Target, _: &str, _: Duration) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcomes.lock().pop_front() {
                Some(false) => Err(BalancerError::Upstream("scripted failure".into())),
                _ => Ok(()),
            }
        }
    }

    fn registry(threshold: u32, probe: Arc<ScriptedProbe>) -> Arc<Registry> {
        Registry::with_probe(
            HealthCheckConfig {
                interval: INTERVAL,
                threshold,
            },
            100,
            probe,
        )
    }

    fn id(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn node(name: &str, port: u16, layers: &[&str]) -> Registration {
        layers.iter().fold(Registration::new(id(name), port), |reg, layer| {
            reg.with_layer(*layer, LayerOptions::default())
        })
    }

    fn metatiled(name: &str, port: u16, metatile: u32) -> Registration {
        Registration::new(id(name), port).with_layer(
            "mylayer",
            LayerOptions {
                metatile: Some(metatile),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_token_is_64_random_bytes() {
        let a = generate_token();
        assert_eq!(a.len(), 128);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, generate_token());
    }

    #[test]
    fn test_register_outside_runtime_is_unmonitored() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        assert!(reg.register(LOCALHOST, node("a", 8082, &["mylayer"])).unwrap());
        assert!(!reg.is_monitored(&id("a")));
        assert!(!reg.watch(&id("a")));
        assert_eq!(
            reg.pick("mylayer", "t.png", 3, 1, 2),
            Some(Target::from("127.0.0.1:8082"))
        );
    }

    #[tokio::test]
    async fn test_register_and_pick() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        assert!(reg.register(LOCALHOST, node("a", 8082, &["mylayer"])).unwrap());

        let target = Target::from("127.0.0.1:8082");
        assert_eq!(reg.pick("mylayer", "t.png", 3, 1, 2), Some(target.clone()));
        assert_eq!(reg.target_of(&id("a")), Some(target.clone()));
        assert_eq!(reg.id_for(&target), Some(id("a")));
        assert_eq!(reg.node_count(), 1);
        assert!(reg.is_monitored(&id("a")));
    }

    #[tokio::test]
    async fn test_unknown_layer_misses() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        reg.register(LOCALHOST, node("a", 8082, &["mylayer"])).unwrap();
        assert_eq!(reg.pick("other", "t.png", 3, 1, 2), None);
    }

    #[tokio::test]
    async fn test_pick_is_deterministic() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            reg.register(LOCALHOST, node(name, 8082 + i as u16, &["mylayer"])).unwrap();
        }
        for x in 0..50 {
            let first = reg.pick("mylayer", "t.png", 10, x, 7);
            assert!(first.is_some());
            assert_eq!(first, reg.pick("mylayer", "t.png", 10, x, 7));
        }
    }

    #[tokio::test]
    async fn test_filename_does_not_affect_routing() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            reg.register(LOCALHOST, node(name, 8082 + i as u16, &["mylayer"])).unwrap();
        }
        for x in 0..50 {
            assert_eq!(
                reg.pick("mylayer", "t.png", 12, x, 3),
                reg.pick("mylayer", "t.grid.json", 12, x, 3)
            );
        }
    }

    #[tokio::test]
    async fn test_register_twice_is_noop() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        assert!(reg.register(LOCALHOST, node("a", 8082, &["mylayer"])).unwrap());
        assert!(!reg.register(LOCALHOST, node("a", 8082, &["mylayer"])).unwrap());
        assert_eq!(reg.ring_len("mylayer"), 1);
        assert_eq!(reg.node_count(), 1);
    }

    #[tokio::test]
    async fn test_register_then_unregister_empties_ring() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        reg.register(LOCALHOST, node("a", 8082, &["mylayer", "labels"])).unwrap();
        assert!(reg.unregister(&id("a")));

        assert_eq!(reg.pick("mylayer", "t.png", 3, 1, 2), None);
        assert_eq!(reg.pick("labels", "t.png", 3, 1, 2), None);
        assert_eq!(reg.ring_len("mylayer"), 0);
        assert_eq!(reg.target_of(&id("a")), None);
        assert_eq!(reg.id_for(&Target::from("127.0.0.1:8082")), None);
        // The layer itself survives with an empty ring.
        assert!(reg.layer_options("mylayer").is_some());
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_noop() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        assert!(!reg.unregister(&id("ghost")));
    }

    #[tokio::test]
    async fn test_identity_reconciliation() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        let target = Target::from("127.0.0.1:8082");
        assert!(reg.register(LOCALHOST, node("old", 8082, &["mylayer"])).unwrap());
        let old_generation = reg.state.read().nodes[&id("old")]
            .monitor
            .as_ref()
            .map(|m| m.generation)
            .unwrap();

        assert!(!reg.register(LOCALHOST, node("new", 8082, &["mylayer"])).unwrap());

        assert_eq!(reg.ring_len("mylayer"), 1);
        assert_eq!(reg.pick("mylayer", "t.png", 3, 1, 2), Some(target.clone()));
        assert_eq!(reg.target_of(&id("new")), Some(target.clone()));
        assert_eq!(reg.id_for(&target), Some(id("new")));
        assert_eq!(reg.target_of(&id("old")), None);
        assert!(!reg.is_monitored(&id("old")));
        assert!(reg.is_monitored(&id("new")));
        assert_eq!(reg.node_count(), 1);

        // A verdict from the superseded monitor is ignored.
        assert_eq!(reg.record_probe(&id("new"), old_generation, false), None);
        assert_eq!(reg.target_of(&id("new")), Some(target));
    }

    #[tokio::test]
    async fn test_reconciled_node_inherits_layers() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        reg.register(LOCALHOST, node("old", 8082, &["a", "b"])).unwrap();
        reg.register(LOCALHOST, node("new", 8082, &["a"])).unwrap();

        let layers = reg.layers_of(&id("new")).unwrap();
        assert!(layers.contains("a") && layers.contains("b"));

        // Unregistering the new id clears every ring the target was in.
        reg.unregister(&id("new"));
        assert_eq!(reg.ring_len("a"), 0);
        assert_eq!(reg.ring_len("b"), 0);
    }

    #[tokio::test]
    async fn test_unregister_old_id_after_reconciliation_is_noop() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        reg.register(LOCALHOST, node("old", 8082, &["mylayer"])).unwrap();
        reg.register(LOCALHOST, node("new", 8082, &["mylayer"])).unwrap();

        assert!(!reg.unregister(&id("old")));
        assert_eq!(reg.ring_len("mylayer"), 1);
    }

    #[tokio::test]
    async fn test_layer_options_last_writer_wins() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        reg.register(LOCALHOST, metatiled("a", 8082, 4)).unwrap();
        reg.register(LOCALHOST, metatiled("b", 8083, 8)).unwrap();
        assert_eq!(reg.layer_options("mylayer").unwrap().metatile(), 8);
    }

    #[tokio::test]
    async fn test_metatile_blocks_route_together() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        reg.register(LOCALHOST, metatiled("a", 8082, 4)).unwrap();
        reg.register(LOCALHOST, metatiled("b", 8083, 4)).unwrap();

        let block: Vec<_> = (0..4).map(|i| reg.pick("mylayer", "t.png", 3, i, i)).collect();
        assert!(block[0].is_some());
        assert!(block.iter().all(|t| *t == block[0]));

        let row: Vec<_> = (4..8).map(|x| reg.pick("mylayer", "t.png", 1, x, 3)).collect();
        assert!(row[0].is_some());
        assert!(row.iter().all(|t| *t == row[0]));
    }

    #[tokio::test]
    async fn test_bbox_excludes_tile() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        let options = LayerOptions {
            bbox: Some(BboxSpec::Many(vec![[-85.0, 43.0, -84.0, 44.0].into()])),
            ..Default::default()
        };
        reg.register(
            LOCALHOST,
            Registration::new(id("a"), 8082).with_layer("mylayer", options),
        )
        .unwrap();

        assert_eq!(reg.pick("mylayer", "t.png", 14, 3204, 5909), None);
        assert!(reg.pick("mylayer", "t.png", 14, 4346, 5989).is_some());
    }

    #[tokio::test]
    async fn test_zoom_bounds() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        let options = LayerOptions {
            min_zoom: Some(2),
            max_zoom: Some(4),
            ..Default::default()
        };
        reg.register(
            LOCALHOST,
            Registration::new(id("a"), 8082).with_layer("mylayer", options),
        )
        .unwrap();

        assert_eq!(reg.pick("mylayer", "t.png", 1, 0, 0), None);
        assert!(reg.pick("mylayer", "t.png", 2, 0, 0).is_some());
        assert!(reg.pick("mylayer", "t.png", 4, 0, 0).is_some());
        assert_eq!(reg.pick("mylayer", "t.png", 5, 0, 0), None);
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_before_mutation() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        let bad = Registration::new(id("a"), 8082).with_layer(
            "mylayer",
            LayerOptions {
                metatile: Some(0),
                ..Default::default()
            },
        );
        assert!(reg.register(LOCALHOST, bad).is_err());
        assert_eq!(reg.node_count(), 0);
        assert!(reg.layer_options("mylayer").is_none());
    }

    #[tokio::test]
    async fn test_weight_biases_share() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        reg.register(LOCALHOST, node("light", 8082, &["l"])).unwrap();
        reg.register(
            LOCALHOST,
            Registration::new(id("heavy"), 8083)
                .with_weight(5)
                .with_layer("l", LayerOptions::default()),
        )
        .unwrap();

        let heavy = Target::from("127.0.0.1:8083");
        let hits = (0..500)
            .filter(|x| reg.pick("l", "t.png", 16, *x, 9).as_ref() == Some(&heavy))
            .count();
        assert!(hits > 250, "heavy node served {} of 500", hits);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_failures_evict() {
        let probe = ScriptedProbe::new(&[false, false]);
        let reg = registry(2, Arc::clone(&probe));
        reg.register(LOCALHOST, node("a", 8082, &["mylayer"])).unwrap();

        tokio::time::sleep(INTERVAL + INTERVAL / 2).await;
        assert_eq!(reg.unhealthy_count(&id("a")), Some(1));

        tokio::time::sleep(INTERVAL).await;
        assert_eq!(probe.calls(), 2);
        assert_eq!(reg.target_of(&id("a")), None);
        assert_eq!(reg.pick("mylayer", "t.png", 3, 1, 2), None);

        // No further probes after eviction.
        tokio::time::sleep(INTERVAL * 5).await;
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interleaved_successes_keep_node() {
        let outcomes = [true, false, true, true, false, true, true, false];
        let probe = ScriptedProbe::new(&outcomes);
        let reg = registry(2, Arc::clone(&probe));
        reg.register(LOCALHOST, node("a", 8082, &["mylayer"])).unwrap();

        tokio::time::sleep(INTERVAL * 8 + INTERVAL / 2).await;
        assert_eq!(probe.calls(), 8);
        assert_eq!(reg.unhealthy_count(&id("a")), Some(1));
        assert!(reg.target_of(&id("a")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_cancels_probes() {
        let probe = ScriptedProbe::new(&[]);
        let reg = registry(1, Arc::clone(&probe));
        reg.register(LOCALHOST, node("a", 8082, &["mylayer"])).unwrap();
        reg.unregister(&id("a"));

        tokio::time::sleep(INTERVAL * 5).await;
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconciliation_cancels_old_monitor() {
        let probe = ScriptedProbe::new(&[]);
        let reg = registry(1, Arc::clone(&probe));
        reg.register(LOCALHOST, node("old", 8082, &["mylayer"])).unwrap();
        reg.register(LOCALHOST, node("new", 8082, &["mylayer"])).unwrap();

        tokio::time::sleep(INTERVAL * 3 + INTERVAL / 2).await;
        // Only the new id's loop is probing.
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_monitors() {
        let probe = ScriptedProbe::new(&[]);
        let reg = registry(1, Arc::clone(&probe));
        reg.register(LOCALHOST, node("a", 8082, &["mylayer"])).unwrap();
        reg.shutdown();

        assert!(!reg.is_monitored(&id("a")));
        assert!(!reg.watch(&id("a")));
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_watch_is_idempotent() {
        let reg = registry(1, ScriptedProbe::new(&[]));
        reg.register(LOCALHOST, node("a", 8082, &["mylayer"])).unwrap();
        let generation = |reg: &Registry| {
            reg.state.read().nodes[&id("a")].monitor.as_ref().map(|m| m.generation)
        };
        let before = generation(&reg);
        assert!(reg.watch(&id("a")));
        assert_eq!(generation(&reg), before);
        assert!(!reg.watch(&id("ghost")));
    }
}
