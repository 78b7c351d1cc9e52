// Inbound chat event
//
// One raw event from a producer (e.g. a chat message handler).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoalesceError, Result};
use crate::key::CoalescingKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub destination_id: String,
    pub origin_id: String,
    pub conversation_id: String,
    /// Human-readable sender name, resolved before the event reaches the engine.
    #[serde(default)]
    pub origin_name: String,
    pub payload: String,
    pub at: DateTime<Utc>,
}

impl ChatEvent {
    pub fn new(
        destination_id: impl Into<String>,
        origin_id: impl Into<String>,
        conversation_id: impl Into<String>,
        origin_name: impl Into<String>,
        payload: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            destination_id: destination_id.into(),
            origin_id: origin_id.into(),
            conversation_id: conversation_id.into(),
            origin_name: origin_name.into(),
            payload: payload.into(),
            at,
        }
    }

    /// Rejects blank key components and blank payloads.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("destination_id", &self.destination_id),
            ("origin_id", &self.origin_id),
            ("conversation_id", &self.conversation_id),
            ("payload", &self.payload),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(CoalesceError::InvalidInput { field });
            }
        }

        Ok(())
    }

    pub fn key(&self) -> CoalescingKey {
        CoalescingKey::new(
            self.destination_id.clone(),
            self.origin_id.clone(),
            self.conversation_id.clone(),
        )
    }

    /// Falls back to the origin id when no display name was resolved.
    pub fn display_name(&self) -> &str {
        if self.origin_name.trim().is_empty() {
            &self.origin_id
        } else {
            &self.origin_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(payload: &str) -> ChatEvent {
        ChatEvent::new("u1", "u2", "c1", "Bob", payload, Utc::now())
    }

    #[test]
    fn test_validate_accepts_complete_event() {
        assert!(event("hi").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        let err = event("   ").validate().unwrap_err();
        assert!(matches!(err, CoalesceError::InvalidInput { field: "payload" }));

        let mut missing_dest = event("hi");
        missing_dest.destination_id.clear();
        assert!(matches!(
            missing_dest.validate(),
            Err(CoalesceError::InvalidInput {
                field: "destination_id"
            })
        ));

        let mut missing_conv = event("hi");
        missing_conv.conversation_id = " ".to_string();
        assert!(matches!(
            missing_conv.validate(),
            Err(CoalesceError::InvalidInput {
                field: "conversation_id"
            })
        ));
    }

    #[test]
    fn test_display_name_fallback() {
        let mut e = event("hi");
        assert_eq!(e.display_name(), "Bob");
        e.origin_name.clear();
        assert_eq!(e.display_name(), "u2");
    }

    #[test]
    fn test_deserialize_camel_case() {
        let json = r#"{"destinationId":"u1","originId":"u2","conversationId":"c1","payload":"hi","at":"2024-01-15T14:30:00Z"}"#;
        let e: ChatEvent = serde_json::from_str(json).unwrap();
        assert_eq!(e.key(), CoalescingKey::new("u1", "u2", "c1"));
        assert_eq!(e.origin_name, "");
    }
}
