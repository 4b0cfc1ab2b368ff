// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio_tungstenite::tungstenite;

/// Failure to open a tail session. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("tail session request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("tail API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("tail API reported failure: {0}")]
    Rejected(String),

    #[error("failed to decode tail session response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failure to establish the stream connection.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("invalid stream endpoint {url}: {source}")]
    Endpoint {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("websocket handshake with {url} timed out after {timeout:?}")]
    HandshakeTimeout { url: String, timeout: Duration },

    #[error("websocket dial failed: {0}")]
    Connect(#[from] tungstenite::Error),
}

/// Startup failure of a single service tailer.
#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("startup cancelled")]
    Cancelled,

    #[error("startup task failed: {0}")]
    Task(#[source] tokio::task::JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to unmarshal tail event: {0}")]
    Json(#[from] serde_json::Error),

    #[error("log timestamp out of range: {0}")]
    Timestamp(#[from] time::error::ComponentRange),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to start tailing {service}: {source}")]
    Startup {
        service: String,
        #[source]
        source: TailError,
    },

    #[error("no service could be tailed")]
    NoServicesStarted,
}
