//! Single-item overwrite buffer between one producer and one consumer.
//!
//! `LatestSlot` replaces an unbounded queue: the producer overwrites, the
//! consumer only ever sees the most recent value. Older unconsumed values are
//! dropped on purpose.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Mutex-guarded "latest value" slot.
#[derive(Debug)]
pub struct LatestSlot<T> {
    value: Mutex<Option<T>>,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        // Store and take are single assignments, so the value is never torn.
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite the slot, discarding any unconsumed value.
    pub fn store(&self, value: T) {
        *self.lock() = Some(value);
    }

    /// Remove and return the current value. Used by worker passes that are the
    /// slot's only consumer.
    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    /// Return the slot to the empty state.
    pub fn reset(&self) {
        *self.lock() = None;
    }

    pub fn has_value(&self) -> bool {
        self.lock().is_some()
    }
}

impl<T: Clone> LatestSlot<T> {
    /// Non-consuming read. Returns the same value until the next `store`.
    pub fn load(&self) -> Option<T> {
        self.lock().clone()
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn load_before_store_is_none() {
        let slot: LatestSlot<u32> = LatestSlot::new();
        assert_eq!(slot.load(), None);
        assert!(!slot.has_value());
    }

    #[test]
    fn load_returns_last_stored_value() {
        let slot = LatestSlot::new();
        for v in 1..=10 {
            slot.store(v);
        }
        assert_eq!(slot.load(), Some(10));
        assert_eq!(slot.load(), Some(10));
    }

    #[test]
    fn reset_and_take_empty_the_slot() {
        let slot = LatestSlot::new();
        slot.store("a".to_string());
        slot.reset();
        assert_eq!(slot.load(), None);

        slot.store("b".to_string());
        assert_eq!(slot.take().as_deref(), Some("b"));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn concurrent_store_and_load_never_tear() {
        let slot = Arc::new(LatestSlot::new());
        let writer_slot = slot.clone();
        let writer = std::thread::spawn(move || {
            for i in 0u64..10_000 {
                writer_slot.store((i, i.wrapping_mul(31)));
            }
        });

        let mut last_seen = 0;
        while !writer.is_finished() {
            if let Some((a, b)) = slot.load() {
                assert_eq!(b, a.wrapping_mul(31));
                assert!(a >= last_seen);
                last_seen = a;
            }
        }
        writer.join().unwrap();
        assert_eq!(slot.load(), Some((9_999, 9_999u64.wrapping_mul(31))));
    }
}
