// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while building, queueing or shipping Loki pushes.
#[derive(Debug, thiserror::Error)]
pub enum LokiError {
    #[error("failed to build Loki HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to encode push payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Loki rejected push with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Loki push failed after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },

    #[error("Loki client is stopped")]
    Stopped,
}
