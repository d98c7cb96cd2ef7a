use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashSet;
use parking_lot::RwLock;

use crate::{Experiment, ExperimentResult, FeatureResult};

/// Identity of one exposure for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssignmentKey {
    pub experiment_key: String,
    pub hash_attribute: String,
    pub hash_value: String,
    pub variation_id: usize,
}

impl AssignmentKey {
    #[must_use]
    pub fn new(experiment: &Experiment, result: &ExperimentResult) -> Self {
        Self {
            experiment_key: experiment.key.clone(),
            hash_attribute: result.hash_attribute().to_owned(),
            hash_value: result.hash_value().to_owned(),
            variation_id: result.variation_id(),
        }
    }
}

/// Remembers which assignments were already reported.
#[derive(Debug, Default)]
pub struct TrackingDeduplicator {
    seen: DashSet<AssignmentKey>,
}

impl TrackingDeduplicator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time `key` is seen, atomically.
    pub fn first_exposure(&self, key: AssignmentKey) -> bool {
        self.seen.insert(key)
    }

    #[must_use]
    pub fn contains(&self, key: &AssignmentKey) -> bool {
        self.seen.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&self) {
        self.seen.clear();
    }
}

/// Called once per new exposure.
pub type ExposureCallback = dyn Fn(&Experiment, &ExperimentResult) + Send + Sync;

/// Called after every feature evaluation.
pub type FeatureUsageCallback = dyn Fn(&str, &FeatureResult) + Send + Sync;

trait Unsubscribe: Send + Sync {
    fn remove(&self, id: u64);
}

/// Registry of callbacks. Invocation works on a snapshot, so a callback may
/// subscribe or cancel without deadlocking.
pub(crate) struct Listeners<F: ?Sized> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(u64, Arc<F>)>>,
}

impl<F: ?Sized> Default for Listeners<F> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<F: ?Sized + Send + Sync + 'static> Listeners<F> {
    pub(crate) fn add(self: &Arc<Self>, listener: Arc<F>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().push((id, listener));
        let registry: Weak<dyn Unsubscribe> = Arc::downgrade(self) as Weak<dyn Unsubscribe>;
        Subscription { id, registry }
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub(crate) fn clear(&self) {
        self.entries.write().clear();
    }
}

impl<F: ?Sized + Send + Sync> Unsubscribe for Listeners<F> {
    fn remove(&self, id: u64) {
        self.entries.write().retain(|(entry, _)| *entry != id);
    }
}

/// Handle for a registered callback. Dropping it keeps the callback;
/// call [`cancel`](Self::cancel) to remove it.
#[must_use = "dropping a Subscription keeps the callback registered; call cancel() to remove it"]
pub struct Subscription {
    id: u64,
    registry: Weak<dyn Unsubscribe>,
}

impl Subscription {
    pub fn cancel(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
