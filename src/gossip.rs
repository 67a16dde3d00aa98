// Leadership gossip: advertise local events, replay remote ones locally
//
// Outbound, `PeerAdvertiser` listens on the local bus and broadcasts only
// events whose leader is this node, so gossip received from peers is never
// echoed back. Inbound, `AdvertisementHandler` decodes peer events and
// feeds them into the same listener bus as local ones.

use crate::{
    codec::EventCodec,
    event::{LeadershipEvent, NodeId},
    listener::{LeadershipEventListener, ListenerRegistry},
    messaging::{ClusterCommunicator, ClusterMessage, MessageHandler, MessageSubject},
    Error, Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

type Outbound = (LeadershipEvent, ClusterMessage);

/// Outbound half.
///
/// Listeners are synchronous, so events are queued and sent by a single
/// task; a peer receives this node's events in the order they were raised.
#[derive(Debug)]
pub struct PeerAdvertiser {
    local_node: NodeId,
    subject: MessageSubject,
    communicator: Arc<dyn ClusterCommunicator>,
    codec: Arc<dyn EventCodec>,
    outbound_tx: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
}

impl PeerAdvertiser {
    pub fn new(
        local_node: NodeId,
        subject: MessageSubject,
        communicator: Arc<dyn ClusterCommunicator>,
        codec: Arc<dyn EventCodec>,
    ) -> Self {
        Self {
            local_node,
            subject,
            communicator,
            codec,
            outbound_tx: Mutex::new(None),
        }
    }

    /// Spawns the sender task on the current runtime.
    pub fn start(&self) -> Result<()> {
        let mut outbound_tx = self.outbound_tx.lock();
        if outbound_tx.is_some() {
            return Ok(());
        }
        let handle = Handle::try_current()
            .map_err(|e| Error::Scheduler(format!("gossip sender needs a tokio runtime: {}", e)))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        let communicator = self.communicator.clone();
        handle.spawn(async move {
            while let Some((event, message)) = rx.recv().await {
                if let Err(e) = communicator.broadcast(message).await {
                    error!("Failed to broadcast leadership update {}: {}", event, e);
                }
            }
            debug!("Gossip sender stopped");
        });
        *outbound_tx = Some(tx);
        Ok(())
    }

    /// Closes the queue; updates already queued are still sent.
    pub fn stop(&self) {
        self.outbound_tx.lock().take();
    }

    fn originates_here(&self, event: &LeadershipEvent) -> bool {
        event.subject().leader() == self.local_node
    }
}

impl LeadershipEventListener for PeerAdvertiser {
    fn event(&self, event: &LeadershipEvent) {
        if !self.originates_here(event) {
            return;
        }

        let payload = match self.codec.encode(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode leadership update {}: {}", event, e);
                return;
            }
        };
        let message = ClusterMessage::new(self.local_node, self.subject.clone(), payload);

        let queued = match self.outbound_tx.lock().as_ref() {
            Some(tx) => tx.send((event.clone(), message)).is_ok(),
            None => false,
        };
        if !queued {
            debug!("Dropping leadership update {}: gossip sender not running", event);
        }
    }
}

/// Inbound half bound to the leadership updates subject.
#[derive(Debug)]
pub struct AdvertisementHandler {
    codec: Arc<dyn EventCodec>,
    listeners: Arc<ListenerRegistry>,
}

impl AdvertisementHandler {
    pub fn new(codec: Arc<dyn EventCodec>, listeners: Arc<ListenerRegistry>) -> Self {
        Self { codec, listeners }
    }
}

#[async_trait]
impl MessageHandler for AdvertisementHandler {
    async fn handle(&self, message: ClusterMessage) {
        match self.codec.decode(&message.payload) {
            Ok(event) => {
                debug!("Received {} from {}", event, message.sender);
                self.listeners.notify(&event);
            }
            Err(e) => {
                warn!("Failed to decode leadership update from {}: {}", message.sender, e);
            }
        }
    }
}
