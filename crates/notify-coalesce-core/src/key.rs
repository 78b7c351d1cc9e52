// Coalescing key
//
// Events sharing a key are merged into one pending window.

use std::fmt;

/// Composite of (destination, origin, conversation).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoalescingKey {
    pub destination_id: String,
    pub origin_id: String,
    pub conversation_id: String,
}

impl CoalescingKey {
    pub fn new(
        destination_id: impl Into<String>,
        origin_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            destination_id: destination_id.into(),
            origin_id: origin_id.into(),
            conversation_id: conversation_id.into(),
        }
    }

    pub fn belongs_to(&self, destination_id: &str) -> bool {
        self.destination_id == destination_id
    }

    pub fn in_conversation(&self, destination_id: &str, conversation_id: &str) -> bool {
        self.destination_id == destination_id && self.conversation_id == conversation_id
    }
}

impl fmt::Display for CoalescingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}<-{}@{}",
            self.destination_id, self.origin_id, self.conversation_id
        )
    }
}
