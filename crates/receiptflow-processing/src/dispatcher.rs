//! Trigger dispatcher: one isolated invocation per finalize event, optional
//! redelivery with exponential backoff.
//!
//! Shutdown: [`TriggerDispatcher::shutdown`] stops the dispatch loop and any
//! pending redelivery. Invocations already running are left to finish.

use receiptflow_storage::ObjectFinalizedEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::trigger::ReceiptProcessor;

/// Maximum delay in seconds before redelivering a failed event. Caps exponential
/// backoff so that high attempt counts do not produce excessively long delays.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Computes backoff in seconds for a given retry count (exponential with cap).
#[inline]
pub fn compute_retry_backoff_seconds(retry_count: u32) -> u64 {
    2_u64.saturating_pow(retry_count).min(MAX_RETRY_BACKOFF_SECS)
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Deliveries per event, including the first. `1` disables redelivery.
    pub max_attempts: u32,
    /// Length of one backoff second.
    pub backoff_unit: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl DispatcherConfig {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct TriggerDispatcher {
    processor: ReceiptProcessor,
    config: DispatcherConfig,
    shutdown: CancellationToken,
}

impl TriggerDispatcher {
    pub fn new(processor: ReceiptProcessor, config: DispatcherConfig) -> Self {
        Self {
            processor,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Run [`Self::run`] on its own task.
    pub fn spawn(&self, events: mpsc::UnboundedReceiver<ObjectFinalizedEvent>) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.run(events).await })
    }

    /// Dispatch events until the channel closes and every invocation has
    /// finished, or until shutdown.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<ObjectFinalizedEvent>) {
        tracing::info!(
            bucket = %self.processor.bucket(),
            max_attempts = self.config.max_attempts,
            "Processing trigger started"
        );

        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Processing trigger shutting down");
                    in_flight.detach_all();
                    return;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join_error(joined);
                }
                event = events.recv() => match event {
                    Some(event) => {
                        in_flight.spawn(Self::deliver(
                            self.processor.clone(),
                            self.config.clone(),
                            self.shutdown.clone(),
                            event,
                        ));
                    }
                    None => break,
                },
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            log_join_error(joined);
        }
        tracing::info!("Processing trigger stopped");
    }

    /// Signals the dispatch loop to stop. Returns immediately.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn deliver(
        processor: ReceiptProcessor,
        config: DispatcherConfig,
        shutdown: CancellationToken,
        event: ObjectFinalizedEvent,
    ) {
        let max_attempts = config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let last_attempt = attempt >= max_attempts;
            let error = match processor.attempt(&event, last_attempt).await {
                Ok(_) => return,
                Err(e) => e,
            };

            if last_attempt {
                tracing::error!(
                    object = %event.name,
                    attempts = attempt,
                    error = %error,
                    "Receipt processing failed after max attempts"
                );
                return;
            }

            let backoff_seconds = compute_retry_backoff_seconds(attempt);
            tracing::info!(
                object = %event.name,
                attempt = attempt + 1,
                backoff_seconds = backoff_seconds,
                error = %error,
                "Scheduling trigger redelivery"
            );
            let delay = config
                .backoff_unit
                .saturating_mul(u32::try_from(backoff_seconds).unwrap_or(u32::MAX));
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Trigger invocation panicked");
    }
}
