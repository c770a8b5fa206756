use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

/// Idle entries are pruned once the map grows past this many locks.
const PRUNE_THRESHOLD: usize = 256;

/// Lazily created per-resource locks keyed by physical name.
///
/// A lock entry is only dropped from the map while nobody else holds a handle to it,
/// so two callers can never hold distinct locks for the same name at the same time.
#[derive(Debug, Default)]
pub(crate) struct ResourceLocks {
    entries: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ResourceLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Handle to the lock for `name`; lock it with `.lock()`.
    pub(crate) fn handle(&self, name: &str) -> Arc<Mutex<()>> {
        let mut entries = self.entries.lock();
        if entries.len() >= PRUNE_THRESHOLD && !entries.contains_key(name) {
            entries.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        entries
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the entry for `name` after the resource was deleted. Consumes the caller's
    /// handle; the entry stays if other callers still hold or wait on it.
    pub(crate) fn release(&self, name: &str, handle: Arc<Mutex<()>>) {
        drop(handle);
        let mut entries = self.entries.lock();
        if entries
            .get(name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            entries.remove(name);
        }
    }

    /// Drop every idle entry.
    pub(crate) fn purge(&self) {
        self.entries
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_shares_one_lock() {
        let locks = ResourceLocks::new();
        let a = locks.handle("file");
        let b = locks.handle("file");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &locks.handle("other")));
    }

    #[test]
    fn release_keeps_entry_while_others_hold_it() {
        let locks = ResourceLocks::new();
        let mine = locks.handle("file");
        let theirs = locks.handle("file");
        locks.release("file", mine);
        assert_eq!(locks.len(), 1);
        locks.release("file", theirs);
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn purge_and_prune_drop_idle_entries() {
        let locks = ResourceLocks::new();
        let held = locks.handle("held");
        for i in 0..PRUNE_THRESHOLD {
            drop(locks.handle(&format!("idle-{i}")));
        }
        assert!(locks.len() <= PRUNE_THRESHOLD);
        drop(locks.handle("one-more"));
        assert!(locks.len() < PRUNE_THRESHOLD);

        locks.purge();
        assert_eq!(locks.len(), 1);
        drop(held);
        locks.purge();
        assert_eq!(locks.len(), 0);
    }
}
