// Per-topic leadership contests driven by distributed leases
//
// Each open contest owns one lease handle. Acquisition runs on the
// scheduler; a failed attempt is re-scheduled after the retry delay rather
// than sleeping on a worker. A granted lease is extended every half term:
// success raises REELECTED, failure raises BOOTED and re-enters acquisition
// with the same handle while the contest is still open.

use crate::{
    codec::EventCodec,
    config::LeadershipConfig,
    error::check_topic,
    event::{Leadership, LeadershipEvent, NodeId},
    gossip::{AdvertisementHandler, PeerAdvertiser},
    lease::{Lease, LeaseService},
    listener::{LeadershipEventListener, ListenerRegistry},
    membership::ClusterService,
    messaging::{ClusterCommunicator, MessageSubject},
    scheduler::RenewalScheduler,
    table::LeaderTable,
    Error, Result,
};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Local view of an open contest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContestState {
    /// Waiting for a grant, either first time or after losing the lease.
    Acquiring,
    /// Lease held and being renewed.
    Holding,
}

#[derive(Clone)]
pub struct LeadershipManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: LeadershipConfig,
    local_node: NodeId,
    subject: MessageSubject,
    lease_service: Arc<dyn LeaseService>,
    communicator: Arc<dyn ClusterCommunicator>,
    scheduler: Arc<RenewalScheduler>,
    listeners: Arc<ListenerRegistry>,
    leader_table: Arc<LeaderTable>,
    open_contests: DashMap<String, Arc<dyn Lease>>,
    leader_board_updater: Arc<dyn LeadershipEventListener>,
    peer_advertiser: Arc<PeerAdvertiser>,
    advertisement_handler: Arc<AdvertisementHandler>,
    started: AtomicBool,
}

fn same_lease(a: &Arc<dyn Lease>, b: &Arc<dyn Lease>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

// Boxed so the acquire -> schedule -> acquire cycle has a nameable type.
fn acquisition_task(inner: Arc<Inner>, lease: Arc<dyn Lease>, retry: bool) -> BoxFuture<'static, ()> {
    async move { inner.acquire(lease, retry).await }.boxed()
}

fn renewal_task(inner: Arc<Inner>, lease: Arc<dyn Lease>) -> BoxFuture<'static, ()> {
    async move { inner.renew(lease).await }.boxed()
}

impl LeadershipManager {
    pub fn new(
        config: LeadershipConfig,
        cluster: Arc<dyn ClusterService>,
        lease_service: Arc<dyn LeaseService>,
        communicator: Arc<dyn ClusterCommunicator>,
        codec: Arc<dyn EventCodec>,
    ) -> Result<Self> {
        config.validate()?;

        let local_node = cluster.local_node();
        let subject = MessageSubject::new(config.updates_subject.clone());
        let scheduler = Arc::new(RenewalScheduler::new(
            format!("leadership-manager-{}", local_node),
            config.worker_threads,
        ));
        let listeners = Arc::new(ListenerRegistry::new());
        let leader_table = Arc::new(LeaderTable::new());

        let peer_advertiser = Arc::new(PeerAdvertiser::new(
            local_node,
            subject.clone(),
            communicator.clone(),
            codec.clone(),
        ));
        let advertisement_handler = Arc::new(AdvertisementHandler::new(codec, listeners.clone()));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                local_node,
                subject,
                lease_service,
                communicator,
                scheduler,
                listeners,
                leader_board_updater: leader_table.clone(),
                leader_table,
                open_contests: DashMap::new(),
                peer_advertiser,
                advertisement_handler,
                started: AtomicBool::new(false),
            }),
        })
    }

    /// Wires the leader table and gossip into the listener bus and starts
    /// the scheduler. Must run inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = inner.scheduler.start().and_then(|()| inner.peer_advertiser.start()) {
            inner.scheduler.shutdown();
            inner.started.store(false, Ordering::SeqCst);
            return Err(e);
        }

        inner.listeners.add(inner.leader_board_updater.clone());
        inner.listeners.add(inner.peer_advertiser.clone());
        inner
            .communicator
            .add_subscriber(inner.subject.clone(), inner.advertisement_handler.clone());

        info!("Leadership manager {} started", inner.local_node);
        Ok(())
    }

    /// Detaches from the fabric and cancels pending acquisitions and renewals.
    ///
    /// Open contests are dropped without releasing their leases; held
    /// leases lapse at the end of their term.
    pub fn stop(&self) {
        let inner = &self.inner;
        if !inner.started.swap(false, Ordering::SeqCst) {
            return;
        }

        let peer_advertiser: Arc<dyn LeadershipEventListener> = inner.peer_advertiser.clone();
        inner.listeners.remove(&peer_advertiser);
        inner.listeners.remove(&inner.leader_board_updater);
        inner.communicator.remove_subscriber(&inner.subject);
        inner.peer_advertiser.stop();
        inner.scheduler.shutdown();

        let abandoned = inner.open_contests.len();
        inner.open_contests.clear();
        if abandoned > 0 {
            debug!("Abandoned {} open contests on stop", abandoned);
        }

        info!("Leadership manager {} stopped", inner.local_node);
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn local_node(&self) -> NodeId {
        self.inner.local_node
    }

    pub fn config(&self) -> &LeadershipConfig {
        &self.inner.config
    }

    pub fn get_leader(&self, topic: &str) -> Option<NodeId> {
        self.inner.leader_table.leader(topic)
    }

    pub fn get_leadership(&self, topic: &str) -> Option<Leadership> {
        self.inner.leader_table.get(topic)
    }

    pub fn leader_board(&self) -> HashMap<String, Leadership> {
        self.inner.leader_table.snapshot()
    }

    /// Opens a contest for `topic` and starts acquiring its lease.
    ///
    /// Returns once the first attempt is scheduled; the outcome arrives as
    /// a leadership event. Calling again for an open contest is a no-op.
    pub fn run_for_leadership(&self, topic: &str) -> Result<()> {
        check_topic(topic)?;
        let inner = &self.inner;
        if !inner.scheduler.is_running() {
            return Err(Error::Scheduler(format!(
                "leadership manager {} is not started",
                inner.local_node
            )));
        }

        let lease = match inner.open_contests.entry(topic.to_string()) {
            Entry::Occupied(_) => {
                info!("Already in the leadership contest for {}", topic);
                return Ok(());
            }
            Entry::Vacant(vacant) => {
                let lease = inner.lease_service.create(topic);
                vacant.insert(lease.clone());
                lease
            }
        };

        if let Err(e) = inner.schedule_acquisition(lease.clone(), Duration::ZERO, false) {
            inner.open_contests.remove_if(topic, |_, open| same_lease(open, &lease));
            return Err(e);
        }
        Ok(())
    }

    /// Closes the contest for `topic`, releasing the lease if it is held.
    ///
    /// An acquisition already in flight is not cancelled; if it succeeds
    /// afterwards its ELECTED event is still raised, and the first renewal
    /// tick releases the lease again.
    pub async fn withdraw(&self, topic: &str) -> Result<()> {
        check_topic(topic)?;
        let inner = &self.inner;

        let Some((_, lease)) = inner.open_contests.remove(topic) else {
            return Ok(());
        };

        if lease.is_held() {
            lease.release().await;
            info!("Withdrew from leadership of {} at epoch {}", topic, lease.epoch());
            inner.notify(LeadershipEvent::booted(Leadership::new(
                lease.path(),
                inner.local_node,
                lease.epoch(),
            )));
        } else {
            debug!("Withdrew from contest for {} before winning it", topic);
        }
        Ok(())
    }

    pub fn is_contesting(&self, topic: &str) -> bool {
        self.inner.open_contests.contains_key(topic)
    }

    pub fn contest_state(&self, topic: &str) -> Option<ContestState> {
        self.inner.open_contests.get(topic).map(|lease| {
            if lease.is_held() {
                ContestState::Holding
            } else {
                ContestState::Acquiring
            }
        })
    }

    pub fn contests(&self) -> Vec<String> {
        self.inner
            .open_contests
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Returns `false` if this exact listener object was already registered.
    pub fn add_listener(&self, listener: Arc<dyn LeadershipEventListener>) -> bool {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn LeadershipEventListener>) -> bool {
        self.inner.listeners.remove(listener)
    }
}

impl Inner {
    fn notify(&self, event: LeadershipEvent) {
        self.listeners.notify(&event);
    }

    fn contest_owns(&self, lease: &Arc<dyn Lease>) -> bool {
        self.open_contests
            .get(lease.path())
            .map_or(false, |open| same_lease(open.value(), lease))
    }

    fn schedule_acquisition(
        self: &Arc<Self>,
        lease: Arc<dyn Lease>,
        delay: Duration,
        retry: bool,
    ) -> Result<()> {
        self.scheduler
            .schedule(delay, acquisition_task(self.clone(), lease, retry))
    }

    fn schedule_renewal(self: &Arc<Self>, lease: Arc<dyn Lease>) {
        let topic = lease.path().to_string();
        let interval = self.config.renewal_interval();
        if let Err(e) = self.scheduler.schedule(interval, renewal_task(self.clone(), lease)) {
            debug!("Not scheduling renewal for {}: {}", topic, e);
        }
    }

    async fn acquire(self: Arc<Self>, lease: Arc<dyn Lease>, retry: bool) {
        let topic = lease.path().to_string();
        if retry && !self.contest_owns(&lease) {
            debug!("Contest for {} closed; no further acquisition attempts", topic);
            return;
        }

        match lease.acquire(self.config.term_duration()).await {
            Ok(()) => {
                let epoch = lease.epoch();
                info!("Elected leader for {} at epoch {}", topic, epoch);
                self.schedule_renewal(lease.clone());
                self.notify(LeadershipEvent::elected(Leadership::new(
                    topic,
                    self.local_node,
                    epoch,
                )));
            }
            Err(e) => {
                if !self.contest_owns(&lease) {
                    debug!("Acquisition for {} failed after withdrawal: {}", topic, e);
                    return;
                }
                let delay = self.config.retry_delay();
                warn!(
                    "Failed to acquire lease for {}. Will retry in {:?}: {}",
                    topic, delay, e
                );
                if let Err(e) = self.schedule_acquisition(lease, delay, true) {
                    debug!("Not scheduling retry for {}: {}", topic, e);
                }
            }
        }
    }

    /// Gives back a lease no open contest owns, if it is still held.
    async fn release_orphan(&self, lease: &Arc<dyn Lease>) {
        if !lease.is_held() {
            return;
        }
        lease.release().await;
        info!(
            "Released lease for {} held after withdrawal (epoch {})",
            lease.path(),
            lease.epoch()
        );
        self.notify(LeadershipEvent::booted(Leadership::new(
            lease.path(),
            self.local_node,
            lease.epoch(),
        )));
    }

    async fn renew(self: Arc<Self>, lease: Arc<dyn Lease>) {
        let topic = lease.path().to_string();

        if !self.contest_owns(&lease) {
            // Lease granted after the contest was withdrawn
            self.release_orphan(&lease).await;
            debug!("Renewal for {} stopped", topic);
            return;
        }

        if lease.extend(self.config.term_duration()).await {
            if !self.contest_owns(&lease) {
                // Withdrawn while the extension was in flight
                self.release_orphan(&lease).await;
                debug!("Renewal for {} stopped after withdrawal", topic);
                return;
            }
            debug!("Extended lease for {} at epoch {}", topic, lease.epoch());
            self.notify(LeadershipEvent::reelected(Leadership::new(
                topic,
                self.local_node,
                lease.epoch(),
            )));
            self.schedule_renewal(lease);
        } else if self.contest_owns(&lease) {
            let lost = Error::LeaseLost {
                topic: topic.clone(),
            };
            warn!("{} at epoch {}; re-entering the contest", lost, lease.epoch());
            self.notify(LeadershipEvent::booted(Leadership::new(
                topic.clone(),
                self.local_node,
                lease.epoch(),
            )));
            if let Err(e) = self.schedule_acquisition(lease, Duration::ZERO, true) {
                debug!("Not scheduling re-acquisition for {}: {}", topic, e);
            }
        } else {
            debug!("Renewal for {} stopped after withdrawal", topic);
        }
    }
}

impl std::fmt::Debug for LeadershipManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeadershipManager")
            .field("local_node", &self.inner.local_node)
            .field("open_contests", &self.inner.open_contests.len())
            .field("started", &self.inner.started.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
