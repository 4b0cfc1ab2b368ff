// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Boundary to the log store.

use async_trait::async_trait;
use loki_push::{LabelSet, LokiClient};
use time::OffsetDateTime;
use tracing::error;

use crate::service::ServiceDescriptor;

pub const SERVICE_LABEL: &str = "service_name";
pub const ENV_LABEL: &str = "env";

/// Destination for normalized records.
///
/// `submit` must not block: implementations queue and ship asynchronously and
/// report failures only through logging. `shutdown` flushes what is queued.
#[async_trait]
pub trait Sink: Send + Sync {
    fn submit(&self, labels: &LabelSet, timestamp: OffsetDateTime, line: String);

    async fn shutdown(&self);
}

/// Routing labels for every record of `service`.
pub fn service_labels(service: &ServiceDescriptor) -> LabelSet {
    let mut labels = LabelSet::new().with(SERVICE_LABEL, service.name.as_str());
    if let Some(env) = &service.env {
        labels.insert(ENV_LABEL, env.as_str());
    }
    labels
}

#[async_trait]
impl Sink for LokiClient {
    fn submit(&self, labels: &LabelSet, timestamp: OffsetDateTime, line: String) {
        if let Err(e) = self.handle(labels.clone(), timestamp, line) {
            error!("Failed to queue log entry for Loki: {e}");
        }
    }

    async fn shutdown(&self) {
        self.stop().await;
    }
}
