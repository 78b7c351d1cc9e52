// notify-coalesce-core - Windowed coalescing of chat notifications
//
// Collapses bursts of chat events that share a (destination, origin,
// conversation) key into one pending window and hands a single summarized
// notification to the dispatch collaborator when the window closes.
//
// Window lifecycle: ABSENT -> OPEN -> FLUSHING -> ABSENT. A window is closed
// by exactly one of: its armed timer, an explicit flush, a bulk flush, or a
// clear (which discards without dispatching).

use std::time::Duration;

mod dispatch;
mod engine;
mod error;
mod event;
mod key;
mod store;
mod summary;
mod window;

pub use dispatch::{Dispatcher, EntityType, EventType, Notification};
pub use engine::{CoalescingEngine, FlushFailure, FlushOutcome, FlushReport, IngestOutcome};
pub use error::{CoalesceError, Result};
pub use event::ChatEvent;
pub use key::CoalescingKey;
pub use store::{Evicted, PendingWindowStore, Upserted};
pub use summary::{summarize, truncate_summary, ELLIPSIS};
pub use window::{FlushHandle, PendingWindow};

/// Default window duration (five minutes).
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(300);
/// Default display bound for the payload summary, in characters.
pub const DEFAULT_MAX_SUMMARY_CHARS: usize = 50;
/// Default path prefix for conversation links.
pub const DEFAULT_LINK_PREFIX: &str = "/chat";

/// Engine configuration, fixed for the lifetime of an engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalesceConfig {
    pub window: Duration,
    pub max_summary_chars: usize,
    pub link_prefix: String,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_summary_chars: DEFAULT_MAX_SUMMARY_CHARS,
            link_prefix: DEFAULT_LINK_PREFIX.to_string(),
        }
    }
}

impl CoalesceConfig {
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Rejects settings under which no window could ever coalesce or render.
    pub fn validate(&self) -> Result<()> {
        if self.window.is_zero() {
            return Err(CoalesceError::InvalidConfig {
                reason: "window must be greater than zero",
            });
        }
        if self.max_summary_chars == 0 {
            return Err(CoalesceError::InvalidConfig {
                reason: "max_summary_chars must be greater than zero",
            });
        }
        Ok(())
    }

    /// Conversation-scoped link, e.g. `/chat/{conversation_id}`.
    pub fn conversation_link(&self, conversation_id: &str) -> String {
        format!(
            "{}/{}",
            self.link_prefix.trim_end_matches('/'),
            conversation_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoalesceConfig::default();
        assert_eq!(config.window, Duration::from_secs(300));
        assert_eq!(config.max_summary_chars, 50);
        assert_eq!(config.link_prefix, "/chat");
    }

    #[test]
    fn test_conversation_link() {
        let config = CoalesceConfig::default();
        assert_eq!(config.conversation_link("c1"), "/chat/c1");

        let trailing = CoalesceConfig {
            link_prefix: "/inbox/".to_string(),
            ..CoalesceConfig::default()
        };
        assert_eq!(trailing.conversation_link("c9"), "/inbox/c9");
    }

    #[test]
    fn test_validate_rejects_zero_settings() {
        assert!(CoalesceConfig::default().validate().is_ok());

        let zero_window = CoalesceConfig::default().with_window(Duration::ZERO);
        assert_eq!(zero_window.validate().unwrap_err().code(), "C004");

        let zero_summary = CoalesceConfig {
            max_summary_chars: 0,
            ..CoalesceConfig::default()
        };
        assert!(matches!(
            zero_summary.validate(),
            Err(CoalesceError::InvalidConfig { .. })
        ));
    }
}
