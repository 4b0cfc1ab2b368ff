// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Actor owning the [`Aggregator`].
//!
//! Producers hold cloneable [`AggregatorHandle`]s and send commands over an
//! unbounded channel; a single [`AggregatorService`] task applies them in
//! order, so the aggregator itself needs no locking. When an insert fills the
//! pending batch, the service wakes whoever is waiting on
//! [`AggregatorHandle::batch_full`].

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error};

use crate::aggregator::{Aggregator, Entry, PushRequest};

#[derive(Debug)]
pub enum AggregatorCommand {
    Insert(Entry),
    /// Drain everything pending; `None` when there was nothing to send.
    Flush(oneshot::Sender<Option<PushRequest>>),
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct AggregatorHandle {
    tx: mpsc::UnboundedSender<AggregatorCommand>,
    full: Arc<Notify>,
}

impl AggregatorHandle {
    pub fn insert(&self, entry: Entry) -> Result<(), mpsc::error::SendError<AggregatorCommand>> {
        self.tx.send(AggregatorCommand::Insert(entry))
    }

    pub async fn flush(&self) -> Result<Option<PushRequest>, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(AggregatorCommand::Flush(response_tx))
            .map_err(|e| format!("Failed to send flush command: {e}"))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {e}"))
    }

    /// Resolves once an insert has pushed the pending batch past its size limit.
    pub async fn batch_full(&self) {
        self.full.notified().await;
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<AggregatorCommand>> {
        self.tx.send(AggregatorCommand::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct AggregatorService {
    aggregator: Aggregator,
    rx: mpsc::UnboundedReceiver<AggregatorCommand>,
    full: Arc<Notify>,
}

impl AggregatorService {
    #[must_use]
    pub fn new(max_batch_bytes: usize) -> (Self, AggregatorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let full = Arc::new(Notify::new());
        let service = Self {
            aggregator: Aggregator::new(max_batch_bytes),
            rx,
            full: Arc::clone(&full),
        };
        (service, AggregatorHandle { tx, full })
    }

    /// Processes commands until a `Shutdown` arrives or every handle is dropped.
    pub async fn run(mut self) {
        debug!("Loki aggregator service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                AggregatorCommand::Insert(entry) => {
                    let was_full = self.aggregator.is_full();
                    self.aggregator.add(entry);
                    if !was_full && self.aggregator.is_full() {
                        self.full.notify_one();
                    }
                }
                AggregatorCommand::Flush(response_tx) => {
                    if response_tx.send(self.aggregator.take_batch()).is_err() {
                        error!("Failed to send Loki flush response - receiver dropped");
                    }
                }
                AggregatorCommand::Shutdown => {
                    debug!("Loki aggregator service shutting down");
                    break;
                }
            }
        }
    }
}
