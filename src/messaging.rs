use crate::{event::NodeId, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Well-known channel name on the cluster messaging fabric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageSubject(String);

impl MessageSubject {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ClusterMessage {
    pub sender: NodeId,
    pub subject: MessageSubject,
    pub payload: Bytes,
}

impl ClusterMessage {
    pub fn new(sender: NodeId, subject: MessageSubject, payload: impl Into<Bytes>) -> Self {
        Self {
            sender,
            subject,
            payload: payload.into(),
        }
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: ClusterMessage);
}

/// Broadcast and subscription surface of the cluster messaging fabric.
#[async_trait]
pub trait ClusterCommunicator: Send + Sync + fmt::Debug {
    fn add_subscriber(&self, subject: MessageSubject, handler: Arc<dyn MessageHandler>);

    fn remove_subscriber(&self, subject: &MessageSubject);

    /// Sends to every other member. Fails with an I/O error when the
    /// fabric cannot send; there is no acknowledgement.
    async fn broadcast(&self, message: ClusterMessage) -> Result<()>;
}
