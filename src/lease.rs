use crate::{event::Epoch, Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Handle on one topic's distributed exclusive lease.
///
/// Exclusivity and TTL expiry are enforced by the lease service; the
/// handle only remembers the epoch of its most recent grant.
#[async_trait]
pub trait Lease: Send + Sync + fmt::Debug {
    fn path(&self) -> &str;

    /// Epoch of the last grant made to this handle (0 if never granted).
    fn epoch(&self) -> Epoch;

    fn is_held(&self) -> bool;

    async fn acquire(&self, ttl: Duration) -> Result<()>;

    /// `false` means the lease is lost.
    async fn extend(&self, ttl: Duration) -> bool;

    async fn release(&self);
}

pub trait LeaseService: Send + Sync + fmt::Debug {
    fn create(&self, topic: &str) -> Arc<dyn Lease>;
}

#[derive(Debug, Clone, Copy)]
struct Holder {
    lease_id: Uuid,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct TopicLock {
    holder: Option<Holder>,
    epoch: Epoch,
    injected_failures: usize,
}

impl TopicLock {
    fn live_holder(&self, now: Instant) -> Option<Holder> {
        self.holder.filter(|h| now < h.expires_at)
    }
}

#[derive(Debug, Default)]
struct LockTable {
    topics: DashMap<String, TopicLock>,
    grants: AtomicUsize,
    releases: AtomicUsize,
}

/// Cluster-wide lock table kept in process memory.
///
/// Clones share the same table, so every simulated node of a test cluster
/// contends on the same locks.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLeaseService {
    table: Arc<LockTable>,
}

impl InMemoryLeaseService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lease away from its holder; the holder's next extension fails.
    pub fn revoke(&self, topic: &str) -> bool {
        match self.table.topics.get_mut(topic) {
            Some(mut lock) => lock.holder.take().is_some(),
            None => false,
        }
    }

    /// Makes the next `count` acquisition attempts for `topic` fail.
    pub fn fail_acquisitions(&self, topic: &str, count: usize) {
        self.table
            .topics
            .entry(topic.to_string())
            .or_default()
            .injected_failures += count;
    }

    /// Epoch of the current live grant, if any.
    pub fn current_epoch(&self, topic: &str) -> Option<Epoch> {
        let now = Instant::now();
        self.table
            .topics
            .get(topic)
            .and_then(|lock| lock.live_holder(now).map(|_| lock.epoch))
    }

    pub fn is_locked(&self, topic: &str) -> bool {
        self.current_epoch(topic).is_some()
    }

    pub fn grant_count(&self) -> usize {
        self.table.grants.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.table.releases.load(Ordering::SeqCst)
    }
}

impl LeaseService for InMemoryLeaseService {
    fn create(&self, topic: &str) -> Arc<dyn Lease> {
        Arc::new(InMemoryLease {
            id: Uuid::new_v4(),
            path: topic.to_string(),
            epoch: AtomicU64::new(0),
            table: self.table.clone(),
        })
    }
}

#[derive(Debug)]
pub struct InMemoryLease {
    id: Uuid,
    path: String,
    epoch: AtomicU64,
    table: Arc<LockTable>,
}

#[async_trait]
impl Lease for InMemoryLease {
    fn path(&self) -> &str {
        &self.path
    }

    fn epoch(&self) -> Epoch {
        self.epoch.load(Ordering::SeqCst)
    }

    fn is_held(&self) -> bool {
        let now = Instant::now();
        self.table
            .topics
            .get(&self.path)
            .and_then(|lock| lock.live_holder(now))
            .map_or(false, |h| h.lease_id == self.id)
    }

    async fn acquire(&self, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut lock = self.table.topics.entry(self.path.clone()).or_default();

        if lock.injected_failures > 0 {
            lock.injected_failures -= 1;
            return Err(Error::AcquisitionFailure {
                topic: self.path.clone(),
                reason: "lock service unavailable".to_string(),
            });
        }

        if let Some(holder) = lock.live_holder(now) {
            if holder.lease_id != self.id {
                return Err(Error::AcquisitionFailure {
                    topic: self.path.clone(),
                    reason: "held by another node".to_string(),
                });
            }
        }

        lock.epoch += 1;
        lock.holder = Some(Holder {
            lease_id: self.id,
            expires_at: now + ttl,
        });
        self.epoch.store(lock.epoch, Ordering::SeqCst);
        self.table.grants.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn extend(&self, ttl: Duration) -> bool {
        let now = Instant::now();
        let Some(mut lock) = self.table.topics.get_mut(&self.path) else {
            return false;
        };

        match lock.live_holder(now) {
            Some(holder) if holder.lease_id == self.id => {
                lock.holder = Some(Holder {
                    lease_id: self.id,
                    expires_at: now + ttl,
                });
                true
            }
            _ => false,
        }
    }

    async fn release(&self) {
        self.table.releases.fetch_add(1, Ordering::SeqCst);
        if let Some(mut lock) = self.table.topics.get_mut(&self.path) {
            if lock.holder.map_or(false, |h| h.lease_id == self.id) {
                lock.holder = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    const TTL: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_lease_acquisition() {
        let service = InMemoryLeaseService::new();
        let lease = service.create("x");

        lease.acquire(TTL).await.unwrap();
        assert!(lease.is_held());
        assert_eq!(lease.epoch(), 1);
        assert_eq!(service.current_epoch("x"), Some(1));

        // Conflicting lease from another handle
        let other = service.create("x");
        let result = other.acquire(TTL).await;
        assert!(matches!(result, Err(Error::AcquisitionFailure { .. })));
        assert!(!other.is_held());
    }

    #[tokio::test]
    async fn test_each_grant_bumps_epoch() {
        let service = InMemoryLeaseService::new();
        let first = service.create("x");
        let second = service.create("x");

        first.acquire(TTL).await.unwrap();
        first.release().await;
        second.acquire(TTL).await.unwrap();

        assert_eq!(first.epoch(), 1);
        assert_eq!(second.epoch(), 2);
        assert_eq!(service.grant_count(), 2);
        assert_eq!(service.release_count(), 1);
    }

    #[tokio::test]
    async fn test_lease_renewal() {
        let service = InMemoryLeaseService::new();
        let lease = service.create("x");

        lease.acquire(TTL).await.unwrap();
        assert!(lease.extend(TTL).await);
        assert_eq!(lease.epoch(), 1);
    }

    #[tokio::test]
    async fn test_revoked_lease_cannot_extend() {
        let service = InMemoryLeaseService::new();
        let lease = service.create("x");

        lease.acquire(TTL).await.unwrap();
        assert!(service.revoke("x"));
        assert!(!lease.extend(TTL).await);
        assert!(!lease.is_held());
        // Epoch of the lost term is still reported
        assert_eq!(lease.epoch(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expires_after_ttl() {
        let service = InMemoryLeaseService::new();
        let lease = service.create("x");

        lease.acquire(TTL).await.unwrap();
        tokio::time::advance(TTL + Duration::from_millis(1)).await;

        assert!(!lease.is_held());
        assert!(!lease.extend(TTL).await);

        let other = service.create("x");
        other.acquire(TTL).await.unwrap();
        assert_eq!(other.epoch(), 2);
    }

    #[tokio::test]
    async fn test_injected_acquisition_failures() {
        let service = InMemoryLeaseService::new();
        let lease = service.create("x");
        service.fail_acquisitions("x", 2);

        assert_err!(lease.acquire(TTL).await);
        assert_err!(lease.acquire(TTL).await);
        assert_ok!(lease.acquire(TTL).await);
    }
}
