// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::aggregator::{Entry, DEFAULT_BATCH_SIZE_BYTES};
use crate::aggregator_service::{AggregatorHandle, AggregatorService};
use crate::errors::LokiError;
use crate::flusher::Flusher;
use crate::labels::LabelSet;

pub const DEFAULT_PUSH_URL: &str = "http://localhost:3100/loki/api/v1/push";
pub const DEFAULT_BATCH_WAIT: Duration = Duration::from_secs(2);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LokiConfig {
    /// Full push endpoint, e.g. `http://localhost:3100/loki/api/v1/push`.
    pub url: String,
    /// Longest time an entry waits before being shipped.
    pub batch_wait: Duration,
    /// Pending line bytes that trigger an early flush.
    pub batch_size: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Sent as `X-Scope-OrgID` for multi-tenant Loki deployments.
    pub tenant_id: Option<String>,
}

impl LokiConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            batch_wait: DEFAULT_BATCH_WAIT,
            batch_size: DEFAULT_BATCH_SIZE_BYTES,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            tenant_id: None,
        }
    }
}

impl Default for LokiConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PUSH_URL)
    }
}

/// Asynchronous, batching Loki client.
///
/// [`LokiClient::handle`] never blocks: entries are queued to the aggregator
/// and shipped by a background flush loop. Push failures are logged and the
/// batch is dropped. [`LokiClient::stop`] flushes whatever is still pending.
pub struct LokiClient {
    handle: AggregatorHandle,
    cancel: CancellationToken,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl LokiClient {
    /// Builds the client and spawns its aggregator and flush tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: LokiConfig) -> Result<Self, LokiError> {
        let flusher = Flusher::new(&config)?;
        let (service, handle) = AggregatorService::new(config.batch_size);
        tokio::spawn(service.run());

        let cancel = CancellationToken::new();
        let flush_task = tokio::spawn(run_flush_loop(
            handle.clone(),
            flusher,
            config.batch_wait,
            cancel.clone(),
        ));
        debug!("Loki client pushing to {}", config.url);

        Ok(Self {
            handle,
            cancel,
            flush_task: Mutex::new(Some(flush_task)),
        })
    }

    pub fn handle(
        &self,
        labels: LabelSet,
        timestamp: OffsetDateTime,
        line: String,
    ) -> Result<(), LokiError> {
        if self.cancel.is_cancelled() {
            return Err(LokiError::Stopped);
        }
        self.handle
            .insert(Entry {
                labels,
                timestamp,
                line,
            })
            .map_err(|_| LokiError::Stopped)
    }

    /// Flushes pending entries and waits for the background tasks to finish.
    ///
    /// Later calls return immediately.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.flush_task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Loki flush task failed: {e}");
            }
        }
    }
}

async fn run_flush_loop(
    handle: AggregatorHandle,
    flusher: Flusher,
    batch_wait: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(batch_wait);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            () = handle.batch_full() => {}
        }
        flush_pending(&handle, &flusher).await;
    }

    debug!("Loki client stopping, flushing pending entries");
    flush_pending(&handle, &flusher).await;
    if handle.shutdown().is_err() {
        debug!("Loki aggregator service already stopped");
    }
}

async fn flush_pending(handle: &AggregatorHandle, flusher: &Flusher) {
    match handle.flush().await {
        Ok(Some(request)) => {
            if let Err(e) = flusher.send(&request).await {
                error!(
                    "Dropping {} entries after failed Loki push: {e}",
                    request.entry_count()
                );
            }
        }
        Ok(None) => {}
        Err(e) => error!("Failed to collect Loki batch: {e}"),
    }
}
