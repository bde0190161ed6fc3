//! Status watching
//!
//! A watch delivers the current snapshot of a tracking record (if it exists)
//! and then one snapshot per store write, in write order, until it is
//! cancelled. The watcher never cancels on its own: callers stop once they
//! observe a terminal status.

use std::cell::Cell;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use receiptflow_core::TrackingRecord;
use receiptflow_db::{RecordStream, StoreError, StoreResult, TrackingStore};
use tokio_util::sync::CancellationToken;

static NEXT_WATCH_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Watch whose callback is running on this thread, if any.
    static ACTIVE_WATCH: Cell<Option<u64>> = const { Cell::new(None) };
}

struct WatchState {
    id: u64,
    cancelled: AtomicBool,
    token: CancellationToken,
    /// Held for the duration of every callback invocation.
    gate: Mutex<()>,
}

/// Handle to a running watch
#[derive(Clone)]
pub struct WatchHandle {
    state: Arc<WatchState>,
}

impl WatchHandle {
    /// Stop the watch.
    ///
    /// Once this returns no further callback starts. Calling it again, or from
    /// inside the callback itself, is fine.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.token.cancel();

        let inside_callback = ACTIVE_WATCH.with(|active| active.get() == Some(self.state.id));
        if !inside_callback {
            // Wait out an invocation that is already running.
            drop(self.state.gate.lock().unwrap_or_else(|e| e.into_inner()));
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

/// Pull-based subscription to one tracking record
pub struct StatusSubscription {
    stream: Option<RecordStream>,
}

impl StatusSubscription {
    /// Next snapshot, or `None` once cancelled or the store closed the stream.
    pub async fn next(&mut self) -> Option<TrackingRecord> {
        self.stream.as_mut()?.next().await
    }

    pub fn cancel(&mut self) {
        self.stream = None;
    }
}

/// Observes tracking records through a [`TrackingStore`]
#[derive(Clone)]
pub struct StatusWatcher {
    store: Arc<dyn TrackingStore>,
}

impl StatusWatcher {
    pub fn new(store: Arc<dyn TrackingStore>) -> Self {
        Self { store }
    }

    /// Invoke `on_change` with every snapshot of `doc_id`.
    ///
    /// Returning [`ControlFlow::Break`] from the callback ends the watch, as
    /// does [`WatchHandle::cancel`].
    pub async fn watch<F>(&self, doc_id: &str, mut on_change: F) -> StoreResult<WatchHandle>
    where
        F: FnMut(TrackingRecord) -> ControlFlow<()> + Send + 'static,
    {
        let mut stream = self.store.subscribe(doc_id).await?;
        let state = Arc::new(WatchState {
            id: NEXT_WATCH_ID.fetch_add(1, Ordering::Relaxed),
            cancelled: AtomicBool::new(false),
            token: CancellationToken::new(),
            gate: Mutex::new(()),
        });
        let handle = WatchHandle {
            state: state.clone(),
        };

        let doc_id = doc_id.to_string();
        tokio::spawn(async move {
            loop {
                let record = tokio::select! {
                    biased;
                    _ = state.token.cancelled() => break,
                    next = stream.next() => match next {
                        Some(record) => record,
                        None => break,
                    },
                };

                let flow = {
                    let _gate = state.gate.lock().unwrap_or_else(|e| e.into_inner());
                    if state.cancelled.load(Ordering::SeqCst) {
                        break;
                    }
                    ACTIVE_WATCH.with(|active| active.set(Some(state.id)));
                    let flow = on_change(record);
                    ACTIVE_WATCH.with(|active| active.set(None));
                    flow
                };

                if flow.is_break() {
                    state.cancelled.store(true, Ordering::SeqCst);
                    break;
                }
            }
            tracing::debug!(doc_id = %doc_id, "Status watch ended");
        });

        Ok(handle)
    }

    pub async fn subscribe(&self, doc_id: &str) -> StoreResult<StatusSubscription> {
        let stream = self.store.subscribe(doc_id).await?;
        Ok(StatusSubscription {
            stream: Some(stream),
        })
    }

    /// Wait until `doc_id` reaches `done` or `error` and return that snapshot.
    pub async fn wait_for_terminal(&self, doc_id: &str) -> StoreResult<TrackingRecord> {
        let mut subscription = self.subscribe(doc_id).await?;
        while let Some(record) = subscription.next().await {
            if record.is_terminal() {
                return Ok(record);
            }
        }
        Err(StoreError::Closed)
    }
}
