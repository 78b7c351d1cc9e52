// Pending window store
//
// Keyed table of in-flight windows behind a single lock. Every operation is
// one critical section, so a window can be removed by at most one caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::event::ChatEvent;
use crate::key::CoalescingKey;
use crate::window::{FlushHandle, PendingWindow};

#[derive(Debug)]
struct Slot {
    window: PendingWindow,
    flush: Option<FlushHandle>,
}

impl Slot {
    fn into_evicted(self) -> Evicted {
        Evicted {
            window: self.window,
            flush: self.flush,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    windows: HashMap<CoalescingKey, Slot>,
    next_window_id: u64,
}

impl StoreState {
    fn allocate_id(&mut self) -> u64 {
        self.next_window_id += 1;
        self.next_window_id
    }
}

/// A window taken out of the store, together with its armed timer (if any).
#[derive(Debug)]
pub struct Evicted {
    pub window: PendingWindow,
    flush: Option<FlushHandle>,
}

impl Evicted {
    /// Aborts the armed timer and returns the window.
    pub fn cancel_timer(self) -> PendingWindow {
        if let Some(flush) = self.flush {
            flush.cancel();
        }
        self.window
    }

    /// Returns the window, leaving the timer task running. Used by the timer
    /// task itself, which must not abort its own execution.
    pub fn detach_timer(self) -> PendingWindow {
        self.window
    }
}

/// Result of [`PendingWindowStore::upsert`].
#[derive(Debug)]
pub struct Upserted {
    /// Copy of the window after the update.
    pub window: PendingWindow,
    pub is_new: bool,
    /// Set when the previous window for this key had already passed its
    /// deadline; it was evicted and replaced by a fresh window.
    pub expired: Option<Evicted>,
}

/// Thread-safe window table shared between ingest calls and timer callbacks.
#[derive(Debug, Clone, Default)]
pub struct PendingWindowStore {
    inner: Arc<Mutex<StoreState>>,
}

impl PendingWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the window for the event's key, or folds the event into the
    /// existing one. A window already past `opened_at + window` is evicted and
    /// replaced instead of being extended.
    pub fn upsert(&self, event: &ChatEvent, summary: String, window: Duration) -> Upserted {
        let key = event.key();
        let mut guard = self.inner.lock();

        let is_expired = guard
            .windows
            .get(&key)
            .is_some_and(|slot| slot.window.is_expired(event.at, window));
        let expired = if is_expired {
            guard.windows.remove(&key).map(Slot::into_evicted)
        } else {
            None
        };

        if let Some(slot) = guard.windows.get_mut(&key) {
            slot.window.absorb(event, summary);
            return Upserted {
                window: slot.window.clone(),
                is_new: false,
                expired,
            };
        }

        let window_id = guard.allocate_id();
        let opened = PendingWindow::open(window_id, event, summary);
        guard.windows.insert(
            key,
            Slot {
                window: opened.clone(),
                flush: None,
            },
        );

        Upserted {
            window: opened,
            is_new: true,
            expired,
        }
    }

    /// Attaches the timer handle to the window it was armed for. Hands the
    /// handle back if that window is no longer pending.
    pub fn attach_flush(
        &self,
        key: &CoalescingKey,
        window_id: u64,
        flush: FlushHandle,
    ) -> Result<(), FlushHandle> {
        let mut guard = self.inner.lock();
        match guard.windows.get_mut(key) {
            Some(slot) if slot.window.window_id == window_id => {
                if let Some(previous) = slot.flush.replace(flush) {
                    previous.cancel();
                }
                Ok(())
            }
            _ => Err(flush),
        }
    }

    pub fn remove(&self, key: &CoalescingKey) -> Option<Evicted> {
        self.inner.lock().windows.remove(key).map(Slot::into_evicted)
    }

    /// Removes the window only if it is still the one identified by `window_id`.
    pub fn remove_if_current(&self, key: &CoalescingKey, window_id: u64) -> Option<Evicted> {
        let mut guard = self.inner.lock();
        let is_current = guard
            .windows
            .get(key)
            .is_some_and(|slot| slot.window.window_id == window_id);
        if is_current {
            guard.windows.remove(key).map(Slot::into_evicted)
        } else {
            None
        }
    }

    /// Removes every window for the destination + conversation in one step.
    pub fn remove_conversation(&self, destination_id: &str, conversation_id: &str) -> Vec<Evicted> {
        let mut guard = self.inner.lock();
        let keys: Vec<CoalescingKey> = guard
            .windows
            .keys()
            .filter(|key| key.in_conversation(destination_id, conversation_id))
            .cloned()
            .collect();

        keys.iter()
            .filter_map(|key| guard.windows.remove(key))
            .map(Slot::into_evicted)
            .collect()
    }

    /// Point-in-time copy of all pending windows.
    pub fn snapshot(&self) -> Vec<PendingWindow> {
        self.collect(|_| true)
    }

    pub fn find_by_destination(&self, destination_id: &str) -> Vec<PendingWindow> {
        self.collect(|key| key.belongs_to(destination_id))
    }

    pub fn find_by_conversation(
        &self,
        destination_id: &str,
        conversation_id: &str,
    ) -> Vec<PendingWindow> {
        self.collect(|key| key.in_conversation(destination_id, conversation_id))
    }

    pub fn get(&self, key: &CoalescingKey) -> Option<PendingWindow> {
        self.inner
            .lock()
            .windows
            .get(key)
            .map(|slot| slot.window.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().windows.is_empty()
    }

    fn collect(&self, matches: impl Fn(&CoalescingKey) -> bool) -> Vec<PendingWindow> {
        self.inner
            .lock()
            .windows
            .iter()
            .filter(|(key, _)| matches(key))
            .map(|(_, slot)| slot.window.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    const WINDOW: Duration = Duration::from_secs(300);

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn event(dest: &str, origin: &str, conv: &str, payload: &str, secs: i64) -> ChatEvent {
        ChatEvent::new(dest, origin, conv, "Bob", payload, at(secs))
    }

    fn upsert(store: &PendingWindowStore, e: &ChatEvent) -> Upserted {
        store.upsert(e, e.payload.clone(), WINDOW)
    }

    #[test]
    fn test_upsert_creates_then_updates() {
        let store = PendingWindowStore::new();

        let first = upsert(&store, &event("u1", "u2", "c1", "hi", 0));
        assert!(first.is_new);
        assert!(first.expired.is_none());
        assert_eq!(first.window.event_count, 1);

        let second = upsert(&store, &event("u1", "u2", "c1", "how are you", 1));
        assert!(!second.is_new);
        assert_eq!(second.window.window_id, first.window.window_id);
        assert_eq!(second.window.event_count, 2);
        assert_eq!(second.window.last_payload_summary, "how are you");
        assert_eq!(second.window.last_event_at, at(1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_upsert_replaces_expired_window() {
        let store = PendingWindowStore::new();
        let first = upsert(&store, &event("u1", "u2", "c1", "hi", 0));
        upsert(&store, &event("u1", "u2", "c1", "again", 200));

        let late = upsert(&store, &event("u1", "u2", "c1", "late", 300));
        assert!(late.is_new);
        assert_eq!(late.window.event_count, 1);
        assert_ne!(late.window.window_id, first.window.window_id);

        let expired = late.expired.expect("expired window returned").detach_timer();
        assert_eq!(expired.window_id, first.window.window_id);
        assert_eq!(expired.event_count, 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = PendingWindowStore::new();
        let e = event("u1", "u2", "c1", "hi", 0);
        upsert(&store, &e);

        let removed = store.remove(&e.key()).expect("window present");
        assert_eq!(removed.window.event_count, 1);
        assert!(store.remove(&e.key()).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_if_current_ignores_newer_window() {
        let store = PendingWindowStore::new();
        let e = event("u1", "u2", "c1", "hi", 0);
        let stale_id = upsert(&store, &e).window.window_id;
        store.remove(&e.key());
        let fresh_id = upsert(&store, &e).window.window_id;

        assert!(store.remove_if_current(&e.key(), stale_id).is_none());
        assert_eq!(store.len(), 1);
        assert!(store.remove_if_current(&e.key(), fresh_id).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_filters_and_conversation_removal() {
        let store = PendingWindowStore::new();
        upsert(&store, &event("u1", "u2", "c1", "a", 0));
        upsert(&store, &event("u1", "u3", "c1", "b", 0));
        upsert(&store, &event("u1", "u2", "c2", "c", 0));
        upsert(&store, &event("u9", "u2", "c1", "d", 0));

        assert_eq!(store.snapshot().len(), 4);
        assert_eq!(store.find_by_destination("u1").len(), 3);
        assert_eq!(store.find_by_conversation("u1", "c1").len(), 2);
        assert!(store.find_by_conversation("u1", "c3").is_empty());

        let removed = store.remove_conversation("u1", "c1");
        assert_eq!(removed.len(), 2);
        assert!(store.find_by_conversation("u1", "c1").is_empty());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_concurrent_upserts_do_not_lose_increments() {
        let store = PendingWindowStore::new();
        let threads = 8;
        let per_thread = 250;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..per_thread {
                        let e = event("u1", "u2", "c1", "msg", i % 10);
                        upsert(&store, &e);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let windows = store.snapshot();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].event_count, threads * per_thread as usize);
    }
}
