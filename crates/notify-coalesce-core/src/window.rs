// Pending window accumulation
//
// Aggregates events for one coalescing key until the window is flushed

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::event::ChatEvent;
use crate::key::CoalescingKey;

/// In-flight aggregate for one coalescing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWindow {
    /// Unique per window; a key reopened after a flush gets a new id.
    pub window_id: u64,
    pub key: CoalescingKey,
    pub origin_name: String,
    pub event_count: usize,
    /// Most recent payload, already truncated to the display bound.
    pub last_payload_summary: String,
    pub opened_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
}

impl PendingWindow {
    pub(crate) fn open(window_id: u64, event: &ChatEvent, summary: String) -> Self {
        Self {
            window_id,
            key: event.key(),
            origin_name: event.display_name().to_string(),
            event_count: 1,
            last_payload_summary: summary,
            opened_at: event.at,
            last_event_at: event.at,
        }
    }

    pub(crate) fn absorb(&mut self, event: &ChatEvent, summary: String) {
        self.event_count += 1;
        self.origin_name = event.display_name().to_string();
        self.last_payload_summary = summary;
        self.last_event_at = self.last_event_at.max(event.at);
    }

    /// `opened_at + window`, or `None` when that is past the representable range.
    pub fn deadline(&self, window: Duration) -> Option<DateTime<Utc>> {
        let window = TimeDelta::from_std(window).ok()?;
        self.opened_at.checked_add_signed(window)
    }

    /// Expiry is measured from when the window opened, not from the last event.
    pub fn is_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.deadline(window).is_some_and(|deadline| now >= deadline)
    }
}

/// Handle to the deferred flush task armed for a window.
///
/// Dropping the handle detaches the task; only [`FlushHandle::cancel`] stops it.
#[derive(Debug)]
pub struct FlushHandle(JoinHandle<()>);

impl FlushHandle {
    pub(crate) fn new(handle: JoinHandle<()>) -> Self {
        Self(handle)
    }

    pub fn cancel(self) {
        self.0.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_open_and_absorb() {
        let first = ChatEvent::new("u1", "u2", "c1", "Bob", "hi", at(0));
        let mut window = PendingWindow::open(7, &first, "hi".to_string());
        assert_eq!(window.event_count, 1);
        assert_eq!(window.opened_at, at(0));

        let second = ChatEvent::new("u1", "u2", "c1", "Bobby", "how are you", at(1));
        window.absorb(&second, "how are you".to_string());
        assert_eq!(window.event_count, 2);
        assert_eq!(window.origin_name, "Bobby");
        assert_eq!(window.last_payload_summary, "how are you");
        assert_eq!(window.opened_at, at(0));
        assert_eq!(window.last_event_at, at(1));
    }

    #[test]
    fn test_expiry_uses_open_time() {
        let first = ChatEvent::new("u1", "u2", "c1", "Bob", "hi", at(0));
        let mut window = PendingWindow::open(1, &first, "hi".to_string());
        let late = ChatEvent::new("u1", "u2", "c1", "Bob", "again", at(250));
        window.absorb(&late, "again".to_string());

        let five_minutes = Duration::from_secs(300);
        assert_eq!(window.deadline(five_minutes), Some(at(300)));
        assert!(!window.is_expired(at(299), five_minutes));
        // 301s after open but only 51s after the last event.
        assert!(window.is_expired(at(301), five_minutes));
    }

    #[test]
    fn test_unrepresentable_deadline_never_expires() {
        let first = ChatEvent::new("u1", "u2", "c1", "Bob", "hi", at(0));
        let window = PendingWindow::open(1, &first, "hi".to_string());
        assert_eq!(window.deadline(Duration::MAX), None);
        assert!(!window.is_expired(at(1_000_000), Duration::MAX));
    }
}
