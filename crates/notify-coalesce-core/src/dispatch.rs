//! Outbound notification and the dispatch collaborator seam.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::summary::summarize;
use crate::window::PendingWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    NewMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Chat,
}

/// The single summarized notification produced by flushing one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub event_type: EventType,
    pub entity_type: EntityType,
    /// Conversation id
    pub entity_id: String,
    /// Sender display name
    pub entity_name: String,
    pub message: String,
    pub link: String,
    pub event_count: usize,
    pub first_event_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
}

impl Notification {
    pub fn from_window(window: &PendingWindow, link: String) -> Self {
        Self {
            event_type: EventType::NewMessage,
            entity_type: EntityType::Chat,
            entity_id: window.key.conversation_id.clone(),
            entity_name: window.origin_name.clone(),
            message: summarize(window),
            link,
            event_count: window.event_count,
            first_event_at: window.opened_at,
            last_event_at: window.last_event_at,
        }
    }
}

/// Durably persists and fans out a finished notification to its recipient.
///
/// Called outside the store lock; implementations may do network or
/// database I/O. Failures are reported, never retried.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, recipient_id: &str, notification: Notification) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChatEvent;
    use chrono::TimeZone;

    #[test]
    fn test_notification_from_window() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap();
        let event = ChatEvent::new("u1", "u2", "c1", "Bob", "hi", at);
        let window = PendingWindow::open(1, &event, "hi".to_string());

        let notification = Notification::from_window(&window, "/chat/c1".to_string());
        assert_eq!(notification.entity_type, EntityType::Chat);
        assert_eq!(notification.entity_id, "c1");
        assert_eq!(notification.entity_name, "Bob");
        assert_eq!(notification.message, "New message from Bob: hi");
        assert_eq!(notification.link, "/chat/c1");
        assert_eq!(notification.event_count, 1);
    }

    #[test]
    fn test_notification_wire_shape() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap();
        let event = ChatEvent::new("u1", "u2", "c1", "Bob", "hi", at);
        let window = PendingWindow::open(1, &event, "hi".to_string());
        let notification = Notification::from_window(&window, "/chat/c1".to_string());

        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["eventType"], "NEW_MESSAGE");
        assert_eq!(value["entityType"], "CHAT");
        assert_eq!(value["entityId"], "c1");
        assert_eq!(value["eventCount"], 1);
        assert_eq!(value["firstEventAt"], "2024-01-15T14:30:00Z");
    }
}
