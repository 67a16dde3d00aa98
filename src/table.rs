// Local replica of topic -> current leadership, merged by epoch

use crate::{
    event::{Leadership, LeadershipEvent, LeadershipEventType, NodeId},
    listener::LeadershipEventListener,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// What a merge did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Entry inserted or replaced by a newer epoch.
    Accepted,
    /// Entry removed by a boot notice.
    Evicted,
    /// Stale, duplicate, or boot for an unknown topic.
    Ignored,
}

/// Eventually-consistent leader board for one node.
///
/// A single mutex guards the map; it is held only for one
/// lookup-then-replace/evict and never across a callback.
#[derive(Debug, Default)]
pub struct LeaderTable {
    board: Mutex<HashMap<String, Leadership>>,
}

impl LeaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leader(&self, topic: &str) -> Option<NodeId> {
        self.board.lock().get(topic).map(Leadership::leader)
    }

    pub fn get(&self, topic: &str) -> Option<Leadership> {
        self.board.lock().get(topic).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, Leadership> {
        self.board.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.board.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.board.lock().is_empty()
    }

    /// Applies one event.
    ///
    /// Elected/reelected replace the entry only on a strictly greater epoch.
    /// Booted evicts when the held epoch is less than *or equal to* the
    /// incoming one, so a boot also removes an equal-epoch entry written by
    /// any node. The asymmetry is deliberate.
    pub fn merge(&self, event: &LeadershipEvent) -> MergeOutcome {
        let update = event.subject();
        let mut board = self.board.lock();
        let current_epoch = board.get(update.topic()).map(Leadership::epoch);

        let outcome = match event.event_type() {
            LeadershipEventType::LeaderElected | LeadershipEventType::LeaderReelected => {
                match current_epoch {
                    Some(epoch) if epoch >= update.epoch() => MergeOutcome::Ignored,
                    _ => {
                        board.insert(update.topic().to_string(), update.clone());
                        MergeOutcome::Accepted
                    }
                }
            }
            LeadershipEventType::LeaderBooted => match current_epoch {
                Some(epoch) if epoch <= update.epoch() => {
                    board.remove(update.topic());
                    MergeOutcome::Evicted
                }
                _ => MergeOutcome::Ignored,
            },
        };
        drop(board);

        debug!("Leader table merge of {}: {:?}", event, outcome);
        outcome
    }
}

impl LeadershipEventListener for LeaderTable {
    fn event(&self, event: &LeadershipEvent) {
        self.merge(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn elected(topic: &str, leader: NodeId, epoch: u64) -> LeadershipEvent {
        LeadershipEvent::elected(Leadership::new(topic, leader, epoch))
    }

    fn booted(topic: &str, leader: NodeId, epoch: u64) -> LeadershipEvent {
        LeadershipEvent::booted(Leadership::new(topic, leader, epoch))
    }

    #[test]
    fn test_first_election_accepted() {
        let table = LeaderTable::new();
        let node = NodeId::new();

        assert_eq!(table.merge(&elected("x", node, 1)), MergeOutcome::Accepted);
        assert_eq!(table.leader("x"), Some(node));
    }

    #[test]
    fn test_duplicate_election_is_noop() {
        let table = LeaderTable::new();
        let node = NodeId::new();

        table.merge(&elected("x", node, 3));
        assert_eq!(table.merge(&elected("x", node, 3)), MergeOutcome::Ignored);
        assert_eq!(table.get("x").unwrap().epoch(), 3);
    }

    #[test]
    fn test_stale_election_rejected() {
        let table = LeaderTable::new();
        let newer = NodeId::new();
        let older = NodeId::new();

        table.merge(&elected("x", newer, 5));
        assert_eq!(table.merge(&elected("x", older, 4)), MergeOutcome::Ignored);
        assert_eq!(table.leader("x"), Some(newer));
    }

    #[test]
    fn test_reelection_with_higher_epoch_replaces() {
        let table = LeaderTable::new();
        let a = NodeId::new();
        let b = NodeId::new();

        table.merge(&elected("x", a, 1));
        let reelected = LeadershipEvent::reelected(Leadership::new("x", b, 2));
        assert_eq!(table.merge(&reelected), MergeOutcome::Accepted);
        assert_eq!(table.leader("x"), Some(b));
    }

    #[test]
    fn test_boot_with_equal_epoch_evicts() {
        let table = LeaderTable::new();
        let holder = NodeId::new();
        let other = NodeId::new();

        table.merge(&elected("x", holder, 3));
        // Boot from a different node with the same epoch still evicts
        assert_eq!(table.merge(&booted("x", other, 3)), MergeOutcome::Evicted);
        assert_eq!(table.leader("x"), None);
    }

    #[test]
    fn test_boot_of_superseded_term_ignored() {
        let table = LeaderTable::new();
        let node = NodeId::new();

        table.merge(&elected("x", node, 5));
        assert_eq!(table.merge(&booted("x", node, 4)), MergeOutcome::Ignored);
        assert_eq!(table.leader("x"), Some(node));
    }

    #[test]
    fn test_boot_for_unknown_topic_ignored() {
        let table = LeaderTable::new();
        assert_eq!(
            table.merge(&booted("missing", NodeId::new(), 9)),
            MergeOutcome::Ignored
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_readers_see_whole_entries() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(LeaderTable::new());
        let nodes: Vec<NodeId> = (0..4).map(|_| NodeId::new()).collect();

        let writer = {
            let table = table.clone();
            let nodes = nodes.clone();
            thread::spawn(move || {
                for epoch in 1..=2_000u64 {
                    let leader = nodes[(epoch % 4) as usize];
                    table.merge(&elected("x", leader, epoch));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                let nodes = nodes.clone();
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        if let Some(entry) = table.get("x") {
                            // leader must match the epoch that wrote it
                            assert_eq!(entry.leader(), nodes[(entry.epoch() % 4) as usize]);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(table.get("x").unwrap().epoch(), 2_000);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Elect(u64),
        Reelect(u64),
        Boot(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u64..20).prop_map(Op::Elect),
            (1u64..20).prop_map(Op::Reelect),
            (1u64..20).prop_map(Op::Boot),
        ]
    }

    proptest! {
        #[test]
        fn prop_accepted_epochs_never_decrease(ops in prop::collection::vec(op_strategy(), 1..64)) {
            let table = LeaderTable::new();
            let node = NodeId::new();
            let mut last_accepted = 0u64;

            for op in ops {
                let (event, epoch) = match op {
                    Op::Elect(e) => (elected("t", node, e), e),
                    Op::Reelect(e) => (LeadershipEvent::reelected(Leadership::new("t", node, e)), e),
                    Op::Boot(e) => (booted("t", node, e), e),
                };
                let before = table.get("t");
                let outcome = table.merge(&event);

                match outcome {
                    MergeOutcome::Accepted => {
                        // Only an empty slot or strictly older entry may be replaced
                        if let Some(prev) = &before {
                            prop_assert!(prev.epoch() < epoch);
                        }
                        if before.is_some() {
                            prop_assert!(epoch > last_accepted);
                        }
                        last_accepted = epoch;
                    }
                    MergeOutcome::Evicted => {
                        prop_assert!(before.unwrap().epoch() <= epoch);
                        prop_assert!(table.get("t").is_none());
                    }
                    MergeOutcome::Ignored => {
                        prop_assert_eq!(table.get("t"), before);
                    }
                }
            }
        }

        #[test]
        fn prop_reapplying_same_event_is_idempotent(epoch in 1u64..100) {
            let table = LeaderTable::new();
            let event = elected("t", NodeId::new(), epoch);

            table.merge(&event);
            let once = table.snapshot();
            prop_assert_eq!(table.merge(&event), MergeOutcome::Ignored);
            prop_assert_eq!(table.snapshot(), once);
        }
    }
}
