//! Task contract: what a unit of work declares to the queue.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

/// Bound for resource keys (branch refs, project names, ...).
///
/// The queue only hashes and compares keys; it never interprets them.
pub trait ResourceKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<K> ResourceKey for K where K: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// A unit of work that needs exclusive access to a set of resource keys.
///
/// `resources()` must return the same set every time it is called; the queue
/// reads it at admission and again at release.
///
/// # 使用例
/// ```ignore
/// struct RefUpdate {
///     refs: HashSet<String>,
/// }
///
/// impl ResourceTask for RefUpdate {
///     type Key = String;
///     fn resources(&self) -> &HashSet<String> {
///         &self.refs
///     }
/// }
/// ```
pub trait ResourceTask: Send + Sync + 'static {
    type Key: ResourceKey;

    /// Keys held exclusively while the task runs. Empty means always admissible.
    fn resources(&self) -> &HashSet<Self::Key>;

    /// Label used in logs and snapshots.
    fn name(&self) -> &str {
        "task"
    }
}

/// Ready-made task: a name, a key set and an opaque payload.
#[derive(Debug, Clone)]
pub struct KeyedTask<K, P = ()> {
    name: String,
    resources: HashSet<K>,
    payload: P,
}

impl<K: ResourceKey> KeyedTask<K, ()> {
    pub fn new(name: impl Into<String>, resources: impl IntoIterator<Item = K>) -> Self {
        Self::with_payload(name, resources, ())
    }
}

impl<K: ResourceKey, P> KeyedTask<K, P> {
    pub fn with_payload(
        name: impl Into<String>,
        resources: impl IntoIterator<Item = K>,
        payload: P,
    ) -> Self {
        Self {
            name: name.into(),
            resources: resources.into_iter().collect(),
            payload,
        }
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }
}

impl<K, P> ResourceTask for KeyedTask<K, P>
where
    K: ResourceKey,
    P: Send + Sync + 'static,
{
    type Key = K;

    fn resources(&self) -> &HashSet<K> {
        &self.resources
    }

    fn name(&self) -> &str {
        &self.name
    }
}
