//! Deduplicated holding area for keys awaiting reconciliation.

use std::collections::{HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// Identifier of an entity whose derived state needs reconciling.
///
/// Equality defines deduplication.
pub trait ReconciliationKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> ReconciliationKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Set of pending keys.
///
/// `insert` and `drain` share one lock, so a key inserted while a drain runs
/// lands either in that drain's batch or in the set for the next one, never
/// both and never neither. Keys drain oldest-first, and a drain costs only
/// the size of the batch it returns.
#[derive(Debug)]
pub struct PendingKeySet<K> {
    keys: Mutex<Keys<K>>,
}

/// `order` and `members` always hold the same keys.
#[derive(Debug)]
struct Keys<K> {
    order: VecDeque<K>,
    members: HashSet<K>,
}

impl<K: ReconciliationKey> Default for PendingKeySet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ReconciliationKey> PendingKeySet<K> {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(Keys {
                order: VecDeque::new(),
                members: HashSet::new(),
            }),
        }
    }

    /// Marks `key` pending. Returns `true` if it was not already pending.
    pub fn insert(&self, key: K) -> bool {
        let mut keys = self.keys.lock();
        if !keys.members.insert(key.clone()) {
            return false;
        }
        keys.order.push_back(key);
        true
    }

    /// Removes and returns up to `max` keys.
    pub fn drain(&self, max: usize) -> Vec<K> {
        let mut keys = self.keys.lock();
        let n = max.min(keys.order.len());
        let batch: Vec<K> = keys.order.drain(..n).collect();
        for key in &batch {
            keys.members.remove(key);
        }
        batch
    }

    pub fn contains(&self, key: &K) -> bool {
        self.keys.lock().members.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().order.is_empty()
    }
}

/// Write-path handle onto a reconciler's pending set.
///
/// Cloning is cheap. `insert` never fails and performs no I/O, so it can sit
/// on the hot path of any request.
#[derive(Debug)]
pub struct Enqueuer<K> {
    pending: Arc<PendingKeySet<K>>,
}

impl<K> Clone for Enqueuer<K> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<K: ReconciliationKey> Enqueuer<K> {
    pub fn new(pending: Arc<PendingKeySet<K>>) -> Self {
        Self { pending }
    }

    /// Marks `key` as needing reconciliation.
    pub fn insert(&self, key: K) {
        self.pending.insert(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_insert_is_idempotent() {
        let set = PendingKeySet::new();
        assert!(set.insert("exp-1".to_string()));
        assert!(!set.insert("exp-1".to_string()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_drain_respects_bound_and_order() {
        let set = PendingKeySet::new();
        for i in 0..10 {
            set.insert(i);
        }

        assert_eq!(set.drain(4), vec![0, 1, 2, 3]);
        assert_eq!(set.len(), 6);
        assert_eq!(set.drain(100), vec![4, 5, 6, 7, 8, 9]);
        assert!(set.drain(4).is_empty());
    }

    #[test]
    fn test_large_backlog_drains_in_order_without_loss() {
        let set = PendingKeySet::new();
        for i in 0..100_000 {
            set.insert(i);
        }

        let mut drained = Vec::new();
        while !set.is_empty() {
            let batch = set.drain(7);
            assert!(batch.len() <= 7);
            drained.extend(batch);
        }
        assert_eq!(drained, (0..100_000).collect::<Vec<_>>());
        assert!(!set.contains(&0));
        assert!(set.insert(0));
    }

    #[test]
    fn test_drain_zero_returns_nothing() {
        let set = PendingKeySet::new();
        set.insert(1);
        assert!(set.drain(0).is_empty());
        assert!(set.contains(&1));
    }

    #[test]
    fn test_drained_key_can_be_reinserted() {
        let set = PendingKeySet::new();
        set.insert("exp-1");
        assert_eq!(set.drain(1), vec!["exp-1"]);
        assert!(set.insert("exp-1"));
    }

    #[test]
    fn test_concurrent_inserts_and_drains_lose_nothing() {
        let set = Arc::new(PendingKeySet::new());
        let writers: Vec<_> = (0..8)
            .map(|w| {
                let set = Arc::clone(&set);
                thread::spawn(move || {
                    for i in 0..500 {
                        set.insert(w * 1_000 + i);
                    }
                })
            })
            .collect();

        let drainer = {
            let set = Arc::clone(&set);
            thread::spawn(move || {
                let mut drained = Vec::new();
                for _ in 0..2_000 {
                    drained.extend(set.drain(7));
                }
                drained
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        let mut drained = drainer.join().unwrap();
        drained.extend(set.drain(usize::MAX));

        let unique: HashSet<_> = drained.iter().copied().collect();
        assert_eq!(drained.len(), 8 * 500, "a key was drained twice");
        assert_eq!(unique.len(), 8 * 500, "a key was lost");
    }

    #[test]
    fn test_same_key_hammered_during_drains_is_never_lost() {
        let set = Arc::new(PendingKeySet::new());
        let inserters: Vec<_> = (0..4)
            .map(|_| {
                let set = Arc::clone(&set);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        set.insert("parent");
                    }
                })
            })
            .collect();

        let mut seen = 0;
        for _ in 0..200 {
            seen += set.drain(1).len();
        }
        for inserter in inserters {
            inserter.join().unwrap();
        }
        // The last insert happened after every earlier drain or is still pending
        seen += set.drain(1).len();

        assert!(seen >= 1);
        assert!(set.is_empty());
    }

    #[test]
    fn test_enqueuer_shares_the_set() {
        let set = Arc::new(PendingKeySet::new());
        let enqueuer = Enqueuer::new(Arc::clone(&set));
        let clone = enqueuer.clone();

        enqueuer.insert(1_u64);
        clone.insert(1_u64);
        clone.insert(2_u64);

        assert_eq!(set.len(), 2);
    }
}
