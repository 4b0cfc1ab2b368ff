// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching client for the Loki push API.
//!
//! Entries are handed to a [`client::LokiClient`], grouped into streams by
//! their [`labels::LabelSet`] inside an actor-owned aggregator, and shipped by
//! a background flush loop whenever the batch wait elapses or the pending
//! batch reaches its size limit.
//!
//! ```text
//!   LokiClient::handle ──> AggregatorService ──> Flusher ──> POST /loki/api/v1/push
//!                               ^                   │
//!                               └── flush loop ─────┘
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregator;
pub mod aggregator_service;
pub mod client;
pub mod errors;
pub mod flusher;
pub mod labels;

pub use client::{LokiClient, LokiConfig};
pub use errors::LokiError;
pub use labels::LabelSet;
