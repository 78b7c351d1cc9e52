// Event feed
//
// Reads chat events as JSON lines and hands them to the engine. A bad line
// is logged and counted; only I/O errors on the reader stop the replay.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use notify_coalesce_core::{ChatEvent, CoalescingEngine, IngestOutcome};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

/// One input line. `at` defaults to the time the line is read.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub destination_id: String,
    pub origin_id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub origin_name: String,
    pub payload: String,
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

impl EventRecord {
    pub fn into_event(self, now: DateTime<Utc>) -> ChatEvent {
        ChatEvent::new(
            self.destination_id,
            self.origin_id,
            self.conversation_id,
            self.origin_name,
            self.payload,
            self.at.unwrap_or(now),
        )
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    pub lines: usize,
    pub ingested: usize,
    /// Lines that were not valid event JSON
    pub malformed: usize,
    /// Well-formed events the engine refused
    pub rejected: usize,
    /// Ingests that found an expired window and flushed it first
    pub reopened: usize,
}

pub async fn replay<R>(engine: &CoalescingEngine, reader: R) -> Result<FeedStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = FeedStats::default();
    let mut lines = reader.lines();

    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read event input")?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        stats.lines += 1;

        let record: EventRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = stats.lines, error = %e, "Skipping malformed event line");
                counter!("coalesce.feed.malformed").increment(1);
                stats.malformed += 1;
                continue;
            }
        };

        match engine.ingest(record.into_event(Utc::now())) {
            Ok(outcome) => {
                stats.ingested += 1;
                if let IngestOutcome::Reopened { .. } = outcome {
                    stats.reopened += 1;
                }
                debug!(line = stats.lines, ?outcome, "Ingested event");
            }
            Err(e) => {
                warn!(
                    line = stats.lines,
                    error = %e,
                    code = e.code(),
                    "Rejected event"
                );
                stats.rejected += 1;
            }
        }
    }

    Ok(stats)
}
