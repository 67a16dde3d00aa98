// Leadership data model: who held which topic as of which epoch

use serde::{Deserialize, Serialize};
use std::fmt;

/// Term counter handed out by the lease service on every grant of a topic.
pub type Epoch = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub uuid::Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First block is enough to tell nodes apart in logs
        let id = self.0.simple().to_string();
        write!(f, "{}", &id[..8])
    }
}

/// "`leader` held `topic` as of `epoch`". Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Leadership {
    topic: String,
    leader: NodeId,
    epoch: Epoch,
}

impl Leadership {
    pub fn new(topic: impl Into<String>, leader: NodeId, epoch: Epoch) -> Self {
        Self {
            topic: topic.into(),
            leader,
            epoch,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn leader(&self) -> NodeId {
        self.leader
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }
}

impl fmt::Display for Leadership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} (epoch {})", self.topic, self.leader, self.epoch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadershipEventType {
    /// A node obtained the lease for a topic.
    LeaderElected,
    /// The holder extended its lease for another term.
    LeaderReelected,
    /// The holder lost or gave up the lease.
    LeaderBooted,
}

/// Unit of local notification and of gossip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadershipEvent {
    event_type: LeadershipEventType,
    subject: Leadership,
}

impl LeadershipEvent {
    pub fn new(event_type: LeadershipEventType, subject: Leadership) -> Self {
        Self {
            event_type,
            subject,
        }
    }

    pub fn elected(subject: Leadership) -> Self {
        Self::new(LeadershipEventType::LeaderElected, subject)
    }

    pub fn reelected(subject: Leadership) -> Self {
        Self::new(LeadershipEventType::LeaderReelected, subject)
    }

    pub fn booted(subject: Leadership) -> Self {
        Self::new(LeadershipEventType::LeaderBooted, subject)
    }

    pub fn event_type(&self) -> LeadershipEventType {
        self.event_type
    }

    pub fn subject(&self) -> &Leadership {
        &self.subject
    }
}

impl fmt::Display for LeadershipEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.event_type, self.subject)
    }
}
