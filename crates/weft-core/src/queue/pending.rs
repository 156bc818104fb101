//! Resource bookkeeping: who holds which key, and who is waiting.
//!
//! Design:
//! - `held`: key -> holding task. A key is present iff a running task declared it.
//! - `waiters`: tasks that failed admission, keyed by arrival number.
//! - `by_key`: key -> arrival numbers of the waiters that declared it.
//! - Invariant: a task is never both a holder and a waiter, and every waiter
//!   is blocked by at least one held key.
//!
//! Because of the last invariant a release can only unblock waiters that
//! share one of the freed keys, so `sweep` walks those and nothing else.
//!
//! This type is plain data. The caller (queue state) owns the lock and
//! performs dispatch after releasing it.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};

use crate::domain::{ResourceKey, TaskId};

struct Waiter<K> {
    task: TaskId,
    keys: HashSet<K>,
}

pub struct PendingSet<K> {
    /// Key -> task currently holding it.
    held: HashMap<K, TaskId>,

    /// Blocked tasks, oldest first.
    waiters: BTreeMap<u64, Waiter<K>>,

    /// Key -> blocked tasks that declared it.
    by_key: HashMap<K, BTreeSet<u64>>,

    next_arrival: u64,
}

/// All-or-nothing acquisition against `held`.
fn acquire<K: ResourceKey>(held: &mut HashMap<K, TaskId>, task: TaskId, keys: &HashSet<K>) -> bool {
    if keys.iter().any(|key| held.contains_key(key)) {
        return false;
    }
    for key in keys {
        held.insert(key.clone(), task);
    }
    true
}

impl<K: ResourceKey> PendingSet<K> {
    pub fn new() -> Self {
        Self {
            held: HashMap::new(),
            waiters: BTreeMap::new(),
            by_key: HashMap::new(),
            next_arrival: 0,
        }
    }

    /// Acquire every key for `task`, or none of them.
    ///
    /// An empty key set always succeeds.
    pub fn try_acquire(&mut self, task: TaskId, keys: &HashSet<K>) -> bool {
        acquire(&mut self.held, task, keys)
    }

    /// Append `task` to the waiting list.
    pub fn park(&mut self, task: TaskId, keys: &HashSet<K>) {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        for key in keys {
            self.by_key.entry(key.clone()).or_default().insert(arrival);
        }
        self.waiters.insert(
            arrival,
            Waiter {
                task,
                keys: keys.clone(),
            },
        );
    }

    /// Release the keys in `keys` that are held by `task`.
    ///
    /// Keys held by other tasks are left alone, so a stale or repeated
    /// release cannot free someone else's resource. Returns how many keys
    /// were freed.
    pub fn release(&mut self, task: TaskId, keys: &HashSet<K>) -> usize {
        let mut released = 0;
        for key in keys {
            if self.held.get(key) == Some(&task) {
                self.held.remove(key);
                released += 1;
            }
        }
        released
    }

    /// Admit waiters unblocked by freeing `freed`, in arrival order.
    ///
    /// Only waiters that declared one of the freed keys are candidates.
    /// An admitted waiter holds its keys immediately, so a later waiter that
    /// shares a key with it stays parked.
    pub fn sweep(&mut self, freed: &HashSet<K>) -> Vec<TaskId> {
        let Self {
            held,
            waiters,
            by_key,
            ..
        } = self;

        // one cursor per freed key, merged by arrival number
        let cursors: Vec<&K> = freed.iter().filter(|key| !held.contains_key(*key)).collect();
        let mut heads = BinaryHeap::new();
        for (slot, key) in cursors.iter().enumerate() {
            if let Some(&arrival) = by_key.get(*key).and_then(|set| set.first()) {
                heads.push(Reverse((arrival, slot)));
            }
        }

        let mut admitted = Vec::new();
        let mut tried = HashSet::new();
        while let Some(Reverse((arrival, slot))) = heads.pop() {
            let key = cursors[slot];
            if held.contains_key(key) {
                continue; // 同じ sweep 内で再び取られた
            }

            if tried.insert(arrival)
                && let Some(waiter) = waiters.get(&arrival)
                && acquire(held, waiter.task, &waiter.keys)
            {
                admitted.push(waiter.task);
                if let Some(waiter) = waiters.remove(&arrival) {
                    for k in &waiter.keys {
                        if let Some(set) = by_key.get_mut(k) {
                            set.remove(&arrival);
                            if set.is_empty() {
                                by_key.remove(k);
                            }
                        }
                    }
                }
                // this waiter declared `key`, so the cursor is done
                continue;
            }

            let next = by_key
                .get(key)
                .and_then(|set| set.range(arrival + 1..).next().copied());
            if let Some(next) = next {
                heads.push(Reverse((next, slot)));
            }
        }
        admitted
    }

    #[cfg(test)]
    pub fn holder(&self, key: &K) -> Option<TaskId> {
        self.held.get(key).copied()
    }

    #[cfg(test)]
    pub fn is_held(&self, key: &K) -> bool {
        self.held.contains_key(key)
    }

    #[cfg(test)]
    pub fn is_waiting(&self, task: TaskId) -> bool {
        self.waiters.values().any(|waiter| waiter.task == task)
    }

    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    #[cfg(test)]
    pub fn waiting_len(&self) -> usize {
        self.waiters.len()
    }
}

impl<K: ResourceKey> Default for PendingSet<K> {
    fn default() -> Self {
        Self::new()
    }
}
