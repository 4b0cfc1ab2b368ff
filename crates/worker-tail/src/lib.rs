// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tails execution logs of remotely hosted edge workers and forwards them,
//! normalized, to a log store.
//!
//! For every configured [`service::ServiceDescriptor`] the [`pipeline::Pipeline`]
//! opens a tail session ([`session`]), keeps a websocket stream to it
//! ([`stream`]) owned by a [`tailer::ServiceTailer`], and runs one consumer
//! task that turns each raw event into [`parser::LogRecord`]s and submits them
//! to a [`sink::Sink`].
//!
//! ```text
//!   SessionNegotiator ──> stream reader ──(bounded mpsc)──> consumer ──> parser ──> Sink
//!         per service          task                           task
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod errors;
pub mod parser;
pub mod pipeline;
pub mod service;
pub mod session;
pub mod sink;
pub mod stream;
pub mod tailer;

pub use pipeline::{Pipeline, PipelineReport, StartupPolicy};
pub use service::{ApiToken, ServiceDescriptor};
pub use sink::Sink;
