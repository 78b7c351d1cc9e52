// JSON-lines notification sink
//
// Serializes each dispatched notification as one line on an async writer.
// Writes are serialized through a tokio mutex so concurrent timer flushes
// never interleave partial lines.

use anyhow::{Context, Result};
use async_trait::async_trait;
use notify_coalesce_core::{Dispatcher, Notification};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundLine<'a> {
    recipient_id: &'a str,
    #[serde(flatten)]
    notification: &'a Notification,
}

pub struct JsonLinesDispatcher<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesDispatcher<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> Dispatcher for JsonLinesDispatcher<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn dispatch(&self, recipient_id: &str, notification: Notification) -> Result<()> {
        let mut line = serde_json::to_vec(&OutboundLine {
            recipient_id,
            notification: &notification,
        })
        .context("Failed to encode notification")?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .context("Failed to write notification")?;
        writer
            .flush()
            .await
            .context("Failed to flush notification sink")?;
        Ok(())
    }
}
