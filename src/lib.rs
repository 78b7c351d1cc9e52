// notify-coalesce - Chat notification coalescing driver
//
// Feeds JSON-lines chat events through the coalescing engine and writes one
// summarized notification per closed window to stdout.
//
// Features:
// - Config layering (defaults, TOML, env, CLI)
// - Structured logging with tracing
// - Graceful shutdown that flushes pending windows

use anyhow::{Context, Result};
use notify_coalesce_config::RuntimeConfig;
use notify_coalesce_core::{CoalesceConfig, CoalescingEngine, FlushReport, PendingWindowStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::signal;
use tracing::{info, warn};

mod feed;
mod init;
mod sink;

pub use feed::{replay, EventRecord, FeedStats};
pub use init::init_tracing;
pub use sink::JsonLinesDispatcher;

/// How the driver decides that it is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownMode {
    /// Flush everything as soon as the input is exhausted.
    FlushOnEof,
    /// Keep timers running after EOF until Ctrl+C or SIGTERM.
    #[default]
    WaitForSignal,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Event input; stdin when unset.
    pub input: Option<PathBuf>,
    pub shutdown: ShutdownMode,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub feed: FeedStats,
    /// Windows still pending at shutdown
    pub final_flush: FlushReport,
}

/// Engine settings derived from the runtime configuration.
pub fn coalesce_config(config: &RuntimeConfig) -> CoalesceConfig {
    CoalesceConfig {
        window: config.batch.window(),
        max_summary_chars: config.batch.max_summary_chars,
        link_prefix: config.batch.link_prefix.clone(),
    }
}

/// Graceful shutdown handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

/// Dispatch every window still pending, logging each failed key.
pub async fn flush_pending_windows(engine: &CoalescingEngine) -> FlushReport {
    let pending = engine.pending_len();
    if pending > 0 {
        info!(
            window_count = pending,
            "Flushing pending windows before shutdown"
        );
    }

    let report = engine.flush_all().await;
    for failure in &report.failures {
        warn!(
            key = %failure.key,
            event_count = failure.event_count,
            error = %failure.error,
            "Pending notification lost at shutdown"
        );
    }
    report
}

/// Run the coalescing pipeline over an arbitrary reader and writer.
pub async fn run_pipeline<R, W>(
    config: &RuntimeConfig,
    reader: R,
    writer: W,
    mode: ShutdownMode,
) -> Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let dispatcher = Arc::new(JsonLinesDispatcher::new(writer));
    let engine = CoalescingEngine::new(
        coalesce_config(config),
        PendingWindowStore::new(),
        dispatcher,
    )
    .context("Failed to build coalescing engine")?;

    info!(
        window_secs = config.batch.window_secs,
        max_summary_chars = config.batch.max_summary_chars,
        link_prefix = %config.batch.link_prefix,
        "Coalescing engine ready"
    );

    let mut summary = RunSummary::default();
    let replay = feed::replay(&engine, reader);
    tokio::pin!(replay);

    tokio::select! {
        result = &mut replay => {
            summary.feed = result?;
            info!(
                lines = summary.feed.lines,
                ingested = summary.feed.ingested,
                malformed = summary.feed.malformed,
                rejected = summary.feed.rejected,
                "Event input exhausted"
            );

            if mode == ShutdownMode::WaitForSignal {
                info!("Waiting for Ctrl+C or SIGTERM; pending windows flush on their timers");
                shutdown_signal().await;
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown requested before input was exhausted");
        }
    }

    summary.final_flush = flush_pending_windows(&engine).await;
    Ok(summary)
}

/// Entry point for the driver binary
pub async fn run_with_config(config: RuntimeConfig, options: RunOptions) -> Result<()> {
    let stdout = tokio::io::stdout();

    let summary = match &options.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open event input: {}", path.display()))?;
            run_pipeline(&config, BufReader::new(file), stdout, options.shutdown).await?
        }
        None => {
            let stdin = tokio::io::stdin();
            run_pipeline(&config, BufReader::new(stdin), stdout, options.shutdown).await?
        }
    };

    let failed = summary.final_flush.failures.len();
    if failed > 0 {
        anyhow::bail!("{} pending notifications could not be dispatched", failed);
    }

    info!("Shutdown complete");
    Ok(())
}
