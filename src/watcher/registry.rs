//! Handle registry: native handle to HandleWatcher routing table.

use std::collections::HashMap;

use super::handle_watcher::WatcherId;
use super::source::WatchHandle;

/// Maps open native handles to the HandleWatcher that owns them.
///
/// Holds identifiers only. A HandleWatcher inserts itself when it opens a
/// handle and removes itself when it closes one.
#[derive(Debug, Default)]
pub(crate) struct HandleRegistry {
    handles: HashMap<WatchHandle, WatcherId>,
}

impl HandleRegistry {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record `handle` as owned by `watcher`.
    ///
    /// Returns `false` without touching the table if the handle is already
    /// registered.
    pub(crate) fn register(&mut self, handle: WatchHandle, watcher: WatcherId) -> bool {
        if let Some(owner) = self.handles.get(&handle) {
            tracing::warn!(%handle, %owner, %watcher, "Handle already registered");
            return false;
        }
        self.handles.insert(handle, watcher);
        true
    }

    #[must_use]
    pub(crate) fn lookup(&self, handle: WatchHandle) -> Option<WatcherId> {
        self.handles.get(&handle).copied()
    }

    pub(crate) fn unregister(&mut self, handle: WatchHandle) -> Option<WatcherId> {
        self.handles.remove(&handle)
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.handles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandleRegistry::new();
        let handle = WatchHandle::new(1);

        assert!(registry.register(handle, WatcherId::new(10)));
        assert_eq!(registry.lookup(handle), Some(WatcherId::new(10)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_register_keeps_owner() {
        let mut registry = HandleRegistry::new();
        let handle = WatchHandle::new(1);

        assert!(registry.register(handle, WatcherId::new(10)));
        assert!(!registry.register(handle, WatcherId::new(11)));
        assert_eq!(registry.lookup(handle), Some(WatcherId::new(10)));
    }

    #[test]
    fn test_unregister_makes_handle_stale() {
        let mut registry = HandleRegistry::new();
        let handle = WatchHandle::new(4);
        registry.register(handle, WatcherId::new(1));

        assert_eq!(registry.unregister(handle), Some(WatcherId::new(1)));
        assert_eq!(registry.lookup(handle), None);
        assert_eq!(registry.unregister(handle), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut registry = HandleRegistry::new();
        registry.register(WatchHandle::new(1), WatcherId::new(1));
        registry.register(WatchHandle::new(2), WatcherId::new(2));

        registry.clear();
        assert!(registry.is_empty());
    }
}
