use crate::{
    codec::BincodeCodec,
    config::LeadershipConfig,
    coordinator::LeadershipManager,
    event::{LeadershipEvent, LeadershipEventType, NodeId},
    lease::InMemoryLeaseService,
    listener::LeadershipEventListener,
    membership::StaticClusterService,
    messaging::{ClusterCommunicator, ClusterMessage, MessageHandler, MessageSubject},
    Error, Result,
};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Default)]
struct Fabric {
    subscribers: DashMap<(NodeId, MessageSubject), Arc<dyn MessageHandler>>,
    members: DashSet<NodeId>,
    partition_map: DashSet<(NodeId, NodeId)>,
    failing: DashSet<NodeId>,
    latency: Mutex<Duration>,
    delivered: AtomicUsize,
}

/// In-process messaging fabric connecting simulated nodes.
///
/// Delivery is asynchronous, with optional latency, partitions and
/// injected broadcast failures.
#[derive(Clone, Default)]
pub struct NetworkSimulator {
    fabric: Arc<Fabric>,
}

impl NetworkSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        let network = Self::new();
        network.set_latency(latency);
        network
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.fabric.latency.lock() = latency;
    }

    /// Joins `node` to the fabric and returns its communicator.
    pub fn endpoint(&self, node: NodeId) -> Arc<SimulatedEndpoint> {
        self.fabric.members.insert(node);
        Arc::new(SimulatedEndpoint {
            node,
            network: self.clone(),
        })
    }

    /// Removes `node` from the fabric; its endpoint can no longer send or receive.
    pub fn leave(&self, node: NodeId) {
        self.fabric.members.remove(&node);
        self.fabric.subscribers.retain(|(member, _), _| *member != node);
    }

    pub fn partition(&self, node1: NodeId, node2: NodeId) {
        self.fabric.partition_map.insert((node1, node2));
        self.fabric.partition_map.insert((node2, node1));
    }

    pub fn heal_partition(&self, node1: NodeId, node2: NodeId) {
        self.fabric.partition_map.remove(&(node1, node2));
        self.fabric.partition_map.remove(&(node2, node1));
    }

    /// Makes every broadcast from `node` fail with an I/O error.
    pub fn fail_broadcasts(&self, node: NodeId, failing: bool) {
        if failing {
            self.fabric.failing.insert(node);
        } else {
            self.fabric.failing.remove(&node);
        }
    }

    pub fn delivered_count(&self) -> usize {
        self.fabric.delivered.load(Ordering::SeqCst)
    }

    fn is_partitioned(&self, from: NodeId, to: NodeId) -> bool {
        self.fabric.partition_map.contains(&(from, to))
    }

    fn broadcast_from(&self, from: NodeId, message: ClusterMessage) -> Result<()> {
        if !self.fabric.members.contains(&from) {
            return Err(Error::BroadcastFailure(format!("{} is not a cluster member", from)));
        }
        if self.fabric.failing.contains(&from) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                format!("simulated broadcast failure on {}", from),
            )));
        }

        let targets: Vec<Arc<dyn MessageHandler>> = self
            .fabric
            .members
            .iter()
            .map(|member| *member)
            .filter(|&to| to != from && !self.is_partitioned(from, to))
            .filter_map(|to| {
                self.fabric
                    .subscribers
                    .get(&(to, message.subject.clone()))
                    .map(|handler| handler.clone())
            })
            .collect();

        let latency = *self.fabric.latency.lock();
        for handler in targets {
            let message = message.clone();
            let fabric = self.fabric.clone();
            tokio::spawn(async move {
                if !latency.is_zero() {
                    sleep(latency).await;
                }
                handler.handle(message).await;
                fabric.delivered.fetch_add(1, Ordering::SeqCst);
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for NetworkSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkSimulator")
            .field("members", &self.fabric.members.len())
            .field("subscribers", &self.fabric.subscribers.len())
            .field("delivered", &self.delivered_count())
            .finish()
    }
}

#[derive(Debug)]
pub struct SimulatedEndpoint {
    node: NodeId,
    network: NetworkSimulator,
}

#[async_trait]
impl ClusterCommunicator for SimulatedEndpoint {
    fn add_subscriber(&self, subject: MessageSubject, handler: Arc<dyn MessageHandler>) {
        self.network
            .fabric
            .subscribers
            .insert((self.node, subject), handler);
    }

    fn remove_subscriber(&self, subject: &MessageSubject) {
        self.network
            .fabric
            .subscribers
            .remove(&(self.node, subject.clone()));
    }

    async fn broadcast(&self, message: ClusterMessage) -> Result<()> {
        self.network.broadcast_from(self.node, message)
    }
}

/// Listener that keeps every event it sees.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<LeadershipEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<LeadershipEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, topic: &str) -> Vec<LeadershipEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.subject().topic() == topic)
            .cloned()
            .collect()
    }

    pub fn count_of(&self, event_type: LeadershipEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl LeadershipEventListener for RecordingListener {
    fn event(&self, event: &LeadershipEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Started managers sharing one lease service and one network.
#[derive(Debug)]
pub struct TestCluster {
    pub nodes: Vec<LeadershipManager>,
    pub leases: InMemoryLeaseService,
    pub network: NetworkSimulator,
}

impl TestCluster {
    pub fn node(&self, index: usize) -> &LeadershipManager {
        &self.nodes[index]
    }

    pub fn find(&self, node: NodeId) -> Option<&LeadershipManager> {
        self.nodes.iter().find(|m| m.local_node() == node)
    }

    /// The leader every node agrees on, if they all agree.
    pub fn agreed_leader(&self, topic: &str) -> Option<NodeId> {
        let first = self.nodes.first()?.get_leader(topic)?;
        self.nodes
            .iter()
            .all(|m| m.get_leader(topic) == Some(first))
            .then_some(first)
    }

    /// True once no node has an entry for `topic`.
    pub fn all_vacant(&self, topic: &str) -> bool {
        self.nodes.iter().all(|m| m.get_leader(topic).is_none())
    }

    pub fn stop(&self) {
        for node in &self.nodes {
            node.stop();
        }
    }
}

pub fn test_config() -> LeadershipConfig {
    LeadershipConfig {
        term_duration_ms: 1_000,
        retry_delay_ms: 200,
        worker_threads: 8,
        ..LeadershipConfig::default()
    }
}

pub fn create_test_cluster(num_nodes: usize, config: LeadershipConfig) -> Result<TestCluster> {
    let leases = InMemoryLeaseService::new();
    let network = NetworkSimulator::new();
    let mut nodes = Vec::with_capacity(num_nodes);

    for _ in 0..num_nodes {
        let node_id = NodeId::new();
        let manager = LeadershipManager::new(
            config.clone(),
            Arc::new(StaticClusterService::new(node_id)),
            Arc::new(leases.clone()),
            network.endpoint(node_id),
            Arc::new(BincodeCodec),
        )?;
        manager.start()?;
        nodes.push(manager);
    }

    Ok(TestCluster {
        nodes,
        leases,
        network,
    })
}

/// Polls `condition` every 10ms until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}
