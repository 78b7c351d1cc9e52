// Window summarization
//
// One message per flushed window. The payload is only shown for a single
// event; larger windows collapse to a count.

use crate::window::PendingWindow;

/// Appended to summaries cut at the display bound.
pub const ELLIPSIS: &str = "...";

/// Keeps the first `max_chars` characters and appends [`ELLIPSIS`] when the
/// payload is longer. Counts chars, so multi-byte text is never split.
pub fn truncate_summary(payload: &str, max_chars: usize) -> String {
    match payload.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &payload[..cut], ELLIPSIS),
        None => payload.to_string(),
    }
}

pub fn summarize(window: &PendingWindow) -> String {
    if window.event_count == 1 {
        format!(
            "New message from {}: {}",
            window.origin_name, window.last_payload_summary
        )
    } else {
        format!(
            "{} new messages from {}",
            window.event_count, window.origin_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChatEvent;
    use chrono::Utc;

    #[test]
    fn test_exact_bound_is_not_truncated() {
        let payload = "a".repeat(50);
        assert_eq!(truncate_summary(&payload, 50), payload);
    }

    #[test]
    fn test_one_past_bound_is_truncated() {
        let payload = "a".repeat(51);
        let summary = truncate_summary(&payload, 50);
        assert_eq!(summary, format!("{}...", "a".repeat(50)));
    }

    #[test]
    fn test_truncation_counts_chars_not_bytes() {
        let payload = "é".repeat(60);
        let summary = truncate_summary(&payload, 50);
        assert_eq!(summary.chars().count(), 53);
        assert!(summary.starts_with(&"é".repeat(50)));
    }

    #[test]
    fn test_long_message_keeps_first_fifty_chars() {
        let payload = "hello world this is a very long message exceeding fifty characters total";
        assert_eq!(
            truncate_summary(payload, 50),
            "hello world this is a very long message exceeding ..."
        );
    }

    #[test]
    fn test_summaries() {
        let first = ChatEvent::new("u1", "u2", "c1", "Bob", "hi", Utc::now());
        let mut window = PendingWindow::open(1, &first, "hi".to_string());
        assert_eq!(summarize(&window), "New message from Bob: hi");

        let second = ChatEvent::new("u1", "u2", "c1", "Bob", "how are you", Utc::now());
        window.absorb(&second, "how are you".to_string());
        assert_eq!(summarize(&window), "2 new messages from Bob");
    }
}
