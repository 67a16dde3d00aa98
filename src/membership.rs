use crate::event::NodeId;

/// Cluster membership as seen by the election layer.
pub trait ClusterService: Send + Sync + std::fmt::Debug {
    fn local_node(&self) -> NodeId;
}

/// Membership with a fixed local identity.
#[derive(Debug, Clone, Copy)]
pub struct StaticClusterService {
    local: NodeId,
}

impl StaticClusterService {
    pub fn new(local: NodeId) -> Self {
        Self { local }
    }
}

impl Default for StaticClusterService {
    fn default() -> Self {
        Self::new(NodeId::new())
    }
}

impl ClusterService for StaticClusterService {
    fn local_node(&self) -> NodeId {
        self.local
    }
}
