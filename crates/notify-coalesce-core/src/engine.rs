// Coalescing engine
//
// Public surface for event producers. Ingest folds events into windows and
// arms one deferred flush per window; flushing removes the window from the
// store first and only then calls the dispatcher, so the store lock is never
// held across dispatch I/O.
//
// A window leaves the store either into a caller's flush or into a tracked
// dispatch task (timer or rollover). Bulk flush awaits the tracked tasks, so
// no window is in flight without someone able to wait for it.

use std::fmt;
use std::sync::{Arc, Weak};

use metrics::{counter, histogram};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, Notification};
use crate::error::{CoalesceError, Result};
use crate::event::ChatEvent;
use crate::key::CoalescingKey;
use crate::store::PendingWindowStore;
use crate::summary::truncate_summary;
use crate::window::{FlushHandle, PendingWindow};
use crate::CoalesceConfig;

/// What `ingest` did with the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First event for the key; a flush was armed.
    Opened,
    /// Folded into the open window for the key.
    Coalesced { event_count: usize },
    /// The key's window had already passed its deadline. It was flushed in
    /// the background and a new window was opened for this event.
    Reopened { flushed_event_count: usize },
}

/// Result of an explicit single-key flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Dispatched { event_count: usize },
    /// No window was pending for the key (already flushed or cleared).
    NotPending,
}

#[derive(Debug)]
pub struct FlushFailure {
    pub key: CoalescingKey,
    pub event_count: usize,
    pub error: anyhow::Error,
}

/// Outcome of [`CoalescingEngine::flush_all`]. Failures do not stop the loop.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub flushed: usize,
    pub failures: Vec<FlushFailure>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.flushed + self.failures.len()
    }

    fn record(&mut self, outcome: std::result::Result<usize, FlushFailure>) {
        match outcome {
            Ok(_) => self.flushed += 1,
            Err(failure) => self.failures.push(failure),
        }
    }
}

/// Why a window was dispatched from a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushTrigger {
    Timer,
    Rollover,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushTrigger::Timer => write!(f, "timer"),
            FlushTrigger::Rollover => write!(f, "rollover"),
        }
    }
}

type DispatchTask = JoinHandle<std::result::Result<usize, FlushFailure>>;

/// Thread-safe coalescing engine shared across producers. Cloning is cheap.
#[derive(Clone)]
pub struct CoalescingEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: CoalesceConfig,
    store: PendingWindowStore,
    dispatcher: Arc<dyn Dispatcher>,
    runtime: Handle,
    /// Background dispatches whose windows have already left the store.
    in_flight: Mutex<Vec<DispatchTask>>,
}

impl CoalescingEngine {
    /// Builds an engine on the current Tokio runtime.
    pub fn new(
        config: CoalesceConfig,
        store: PendingWindowStore,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| CoalesceError::NoRuntime)?;
        Self::with_runtime(config, store, dispatcher, runtime)
    }

    pub fn with_runtime(
        config: CoalesceConfig,
        store: PendingWindowStore,
        dispatcher: Arc<dyn Dispatcher>,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                dispatcher,
                runtime,
                in_flight: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &CoalesceConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &PendingWindowStore {
        &self.inner.store
    }

    /// Folds the event into its key's window. Never dispatches synchronously
    /// and never blocks on I/O.
    pub fn ingest(&self, event: ChatEvent) -> Result<IngestOutcome> {
        event.validate()?;

        let config = &self.inner.config;
        let summary = truncate_summary(&event.payload, config.max_summary_chars);
        let upserted = self.inner.store.upsert(&event, summary, config.window);
        counter!("coalesce.events.ingested").increment(1);

        let flushed_event_count = upserted.expired.map(|expired| {
            let window = expired.cancel_timer();
            let count = window.event_count;
            debug!(
                key = %window.key,
                event_count = count,
                "Window expired before its timer fired; flushing in background"
            );
            let task = self.inner.spawn_dispatch(window, FlushTrigger::Rollover);
            self.inner.track(&mut self.inner.in_flight.lock(), task);
            count
        });

        let window = upserted.window;
        if !upserted.is_new {
            debug!(
                key = %window.key,
                event_count = window.event_count,
                "Coalesced event into pending window"
            );
            return Ok(IngestOutcome::Coalesced {
                event_count: window.event_count,
            });
        }

        counter!("coalesce.windows.opened").increment(1);
        let flush = self.arm_timer(&window);
        // Handed back when the window already left the store, possibly through
        // this very timer. Dropping detaches it; a timer that lost the race
        // finds nothing in `remove_if_current`.
        let _ = self
            .inner
            .store
            .attach_flush(&window.key, window.window_id, flush);
        debug!(
            key = %window.key,
            window_secs = config.window.as_secs(),
            "Opened pending window"
        );

        Ok(match flushed_event_count {
            Some(flushed_event_count) => IngestOutcome::Reopened {
                flushed_event_count,
            },
            None => IngestOutcome::Opened,
        })
    }

    /// Flushes one key now. A second call for the same key is a no-op.
    pub async fn flush(&self, key: &CoalescingKey) -> Result<FlushOutcome> {
        let Some(evicted) = self.inner.store.remove(key) else {
            debug!(key = %key, "Flush requested for key with no pending window");
            return Ok(FlushOutcome::NotPending);
        };

        let window = evicted.cancel_timer();
        let event_count = window.event_count;
        self.inner
            .dispatch_window(&window)
            .await
            .map_err(|source| CoalesceError::Dispatch {
                key: key.clone(),
                source,
            })?;

        Ok(FlushOutcome::Dispatched { event_count })
    }

    /// Flushes every pending window (e.g. on shutdown) and waits for timer
    /// and rollover dispatches already under way. Keeps going past failed
    /// dispatches and reports them.
    ///
    /// Background dispatches that finished but were not yet collected are
    /// counted here as well.
    pub async fn flush_all(&self) -> FlushReport {
        let mut report = FlushReport::default();

        for pending in self.inner.store.snapshot() {
            // A timer or another flush may have won the race for this key.
            let Some(evicted) = self.inner.store.remove(&pending.key) else {
                continue;
            };

            let window = evicted.cancel_timer();
            match self.inner.dispatch_window(&window).await {
                Ok(()) => report.flushed += 1,
                Err(error) => {
                    warn!(
                        key = %window.key,
                        event_count = window.event_count,
                        error = %error,
                        "Failed to dispatch pending window during bulk flush"
                    );
                    report.failures.push(FlushFailure {
                        key: window.key,
                        event_count: window.event_count,
                        error,
                    });
                }
            }
        }

        // Taken after the store is drained: any window a timer won above is
        // registered here by now.
        let in_flight = std::mem::take(&mut *self.inner.in_flight.lock());
        for task in in_flight {
            match task.await {
                Ok(outcome) => report.record(outcome),
                Err(error) => {
                    warn!(error = %error, "Background dispatch task did not complete");
                }
            }
        }

        if report.attempted() > 0 {
            info!(
                flushed = report.flushed,
                failed = report.failures.len(),
                "Flushed pending windows"
            );
        }

        report
    }

    /// Discards the destination's pending windows for a conversation without
    /// dispatching, e.g. once the recipient has opened it.
    pub fn clear_for_conversation(&self, destination_id: &str, conversation_id: &str) -> usize {
        let evicted = self
            .inner
            .store
            .remove_conversation(destination_id, conversation_id);
        let cleared = evicted.len();

        for window in evicted {
            window.cancel_timer();
        }

        if cleared > 0 {
            counter!("coalesce.windows.cleared").increment(cleared as u64);
            debug!(
                destination = destination_id,
                conversation = conversation_id,
                cleared,
                "Cleared pending windows without dispatch"
            );
        }

        cleared
    }

    pub fn has_pending(&self, destination_id: &str, conversation_id: &str) -> bool {
        !self
            .inner
            .store
            .find_by_conversation(destination_id, conversation_id)
            .is_empty()
    }

    /// Sum of event counts across all of the destination's pending windows.
    pub fn pending_event_count(&self, destination_id: &str) -> usize {
        self.inner
            .store
            .find_by_destination(destination_id)
            .iter()
            .map(|window| window.event_count)
            .sum()
    }

    pub fn pending_windows(&self, destination_id: &str) -> Vec<PendingWindow> {
        self.inner.store.find_by_destination(destination_id)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.store.len()
    }

    fn arm_timer(&self, window: &PendingWindow) -> FlushHandle {
        let engine: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let key = window.key.clone();
        let window_id = window.window_id;
        let delay = self.inner.config.window;

        FlushHandle::new(self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // Engine dropped: nothing left to dispatch to.
            let Some(engine) = engine.upgrade() else {
                return;
            };
            engine.on_timer(&key, window_id);
        }))
    }
}

impl EngineInner {
    /// Moves the timer's window from the store into a tracked dispatch.
    ///
    /// Runs without an await point, so aborting the timer task can never
    /// strand a window between the two.
    fn on_timer(self: &Arc<Self>, key: &CoalescingKey, window_id: u64) {
        let mut in_flight = self.in_flight.lock();
        let Some(evicted) = self.store.remove_if_current(key, window_id) else {
            debug!(key = %key, "Timer fired for a window that was already flushed");
            return;
        };

        let task = self.spawn_dispatch(evicted.detach_timer(), FlushTrigger::Timer);
        self.track(&mut in_flight, task);
    }

    fn track(&self, in_flight: &mut Vec<DispatchTask>, task: DispatchTask) {
        in_flight.retain(|task| !task.is_finished());
        in_flight.push(task);
    }

    fn spawn_dispatch(
        self: &Arc<Self>,
        window: PendingWindow,
        trigger: FlushTrigger,
    ) -> DispatchTask {
        let engine = Arc::clone(self);
        self.runtime.spawn(async move {
            match engine.dispatch_window(&window).await {
                Ok(()) => Ok(window.event_count),
                Err(error) => {
                    warn!(
                        key = %window.key,
                        event_count = window.event_count,
                        trigger = %trigger,
                        error = %error,
                        "Failed to dispatch window; notification dropped"
                    );
                    Err(FlushFailure {
                        key: window.key,
                        event_count: window.event_count,
                        error,
                    })
                }
            }
        })
    }

    async fn dispatch_window(&self, window: &PendingWindow) -> anyhow::Result<()> {
        let link = self.config.conversation_link(&window.key.conversation_id);
        let notification = Notification::from_window(window, link);

        match self
            .dispatcher
            .dispatch(&window.key.destination_id, notification)
            .await
        {
            Ok(()) => {
                counter!("coalesce.notifications.dispatched").increment(1);
                histogram!("coalesce.window.events").record(window.event_count as f64);
                info!(
                    destination = %window.key.destination_id,
                    origin = %window.key.origin_id,
                    conversation = %window.key.conversation_id,
                    event_count = window.event_count,
                    "Dispatched coalesced notification"
                );
                Ok(())
            }
            Err(error) => {
                counter!("coalesce.dispatch.failures").increment(1);
                Err(error)
            }
        }
    }
}

impl fmt::Debug for CoalescingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingEngine")
            .field("config", &self.inner.config)
            .field("pending", &self.inner.store.len())
            .field("in_flight", &self.inner.in_flight.lock().len())
            .finish_non_exhaustive()
    }
}
