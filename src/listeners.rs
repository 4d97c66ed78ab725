//! Ordered multi-subscriber callback registry.
//!
//! Every component that broadcasts (worker wakeups, detection results, captured
//! frames) keeps a `ListenerList`. Registration hands back a `ListenerId`; the id
//! is the only way to disconnect, there is no connection object to hold on to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Opaque disconnect token returned when a listener is registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registration-ordered list of shared callbacks.
///
/// Callbacks are invoked from a snapshot, so the registry lock is never held
/// while user code runs. A callback may therefore add or remove listeners on
/// the same list without deadlocking.
pub struct ListenerList<F: ?Sized> {
    entries: Mutex<Vec<(ListenerId, Arc<F>)>>,
    next_id: AtomicU64,
}

impl<F: ?Sized> ListenerList<F> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append a listener. It runs after every listener registered before it.
    pub fn add(&self, listener: Arc<F>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Disconnect a listener. Returns false if the id was unknown.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Current listeners in registration order.
    pub fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<F: ?Sized> Default for ListenerList<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Callback = dyn Fn(&mut Vec<u32>) + Send + Sync;

    #[test]
    fn snapshot_preserves_registration_order() {
        let list: ListenerList<Callback> = ListenerList::new();
        list.add(Arc::new(|out: &mut Vec<u32>| out.push(1)));
        list.add(Arc::new(|out: &mut Vec<u32>| out.push(2)));
        list.add(Arc::new(|out: &mut Vec<u32>| out.push(3)));

        let mut out = Vec::new();
        for listener in list.snapshot() {
            listener(&mut out);
        }
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn remove_disconnects_only_that_listener() {
        let list: ListenerList<Callback> = ListenerList::new();
        let first = list.add(Arc::new(|out: &mut Vec<u32>| out.push(1)));
        list.add(Arc::new(|out: &mut Vec<u32>| out.push(2)));

        assert!(list.remove(first));
        assert!(!list.remove(first));
        assert_eq!(list.len(), 1);

        let mut out = Vec::new();
        for listener in list.snapshot() {
            listener(&mut out);
        }
        assert_eq!(out, vec![2]);
    }
}
