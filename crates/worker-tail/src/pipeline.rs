// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Coordinates tailers and consumers across every configured service.
//!
//! # Lifecycle
//!
//! 1. Every service is started concurrently: session negotiation, then the
//!    stream handshake. Cancellation aborts starts still in flight.
//! 2. Each service gets one consumer task as soon as it is connected. The
//!    consumer parses raw messages and submits the resulting records to the
//!    sink.
//! 3. On cancellation every tailer is closed, every consumer is awaited until
//!    its sequence ends, and only then is the sink shut down.
//!
//! Startup failures are isolated per service by default; see [`StartupPolicy`].

use futures_util::future::join_all;
use serde::Deserialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{PipelineError, TailError};
use crate::parser;
use crate::service::ServiceDescriptor;
use crate::session::{SessionNegotiator, TailSession};
use crate::sink::{self, Sink};
use crate::stream::{RawMessage, StreamOptions};
use crate::tailer::ServiceTailer;

/// What to do when a service fails to start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupPolicy {
    /// Report the failure and keep tailing the other services.
    #[default]
    Isolate,
    /// Stop everything on the first failure.
    FailFast,
}

#[derive(Debug)]
pub enum StartupOutcome {
    Started,
    Failed(TailError),
}

#[derive(Debug)]
pub struct ServiceStartup {
    pub service: String,
    pub outcome: StartupOutcome,
}

impl ServiceStartup {
    pub fn is_started(&self) -> bool {
        matches!(self.outcome, StartupOutcome::Started)
    }
}

/// Counters reported by one consumer task when its stream ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub service: String,
    pub messages: u64,
    pub records: u64,
    pub parse_failures: u64,
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    /// One entry per configured service, in configuration order.
    pub startup: Vec<ServiceStartup>,
    /// One entry per started service, in configuration order.
    pub consumers: Vec<ConsumerStats>,
}

impl PipelineReport {
    pub fn started(&self) -> usize {
        self.startup.iter().filter(|s| s.is_started()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &TailError)> {
        self.startup.iter().filter_map(|s| match &s.outcome {
            StartupOutcome::Failed(e) => Some((s.service.as_str(), e)),
            StartupOutcome::Started => None,
        })
    }
}

pub struct Pipeline {
    negotiator: Arc<SessionNegotiator>,
    stream_options: StreamOptions,
    startup_policy: StartupPolicy,
    sink: Arc<dyn Sink>,
}

impl Pipeline {
    pub fn new(negotiator: SessionNegotiator, sink: Arc<dyn Sink>) -> Self {
        Self {
            negotiator: Arc::new(negotiator),
            stream_options: StreamOptions::default(),
            startup_policy: StartupPolicy::default(),
            sink,
        }
    }

    #[must_use]
    pub fn with_stream_options(mut self, stream_options: StreamOptions) -> Self {
        self.stream_options = stream_options;
        self
    }

    #[must_use]
    pub fn with_startup_policy(mut self, startup_policy: StartupPolicy) -> Self {
        self.startup_policy = startup_policy;
        self
    }

    /// Tails `services` until `cancel` fires, then shuts everything down.
    ///
    /// The sink is shut down on every return path.
    pub async fn run(
        &self,
        services: Vec<ServiceDescriptor>,
        cancel: CancellationToken,
    ) -> Result<PipelineReport, PipelineError> {
        let running = self.start(services, &cancel).await;

        if cancel.is_cancelled() {
            return Ok(running.shutdown().await);
        }

        if self.startup_policy == StartupPolicy::FailFast && running.has_failures() {
            let report = running.shutdown().await;
            return Err(first_failure(report));
        }

        if running.tailers.is_empty() {
            running.shutdown().await;
            return Err(PipelineError::NoServicesStarted);
        }

        info!(
            started = running.tailers.len(),
            failed = running.startup.len() - running.tailers.len(),
            "tailing services"
        );
        cancel.cancelled().await;
        info!("shutdown requested");
        Ok(running.shutdown().await)
    }

    /// Starts every service concurrently.
    ///
    /// Each service's consumer is spawned as soon as that service is connected,
    /// so a slow or stuck start never holds back the others.
    pub async fn start(
        &self,
        services: Vec<ServiceDescriptor>,
        cancel: &CancellationToken,
    ) -> RunningPipeline {
        let names: Vec<String> = services.iter().map(|s| s.name.clone()).collect();
        let starts = services.into_iter().map(|service| {
            tokio::spawn(start_service(
                service,
                Arc::clone(&self.negotiator),
                self.stream_options.clone(),
                Arc::clone(&self.sink),
                cancel.clone(),
            ))
        });
        let results = join_all(starts.collect::<Vec<_>>()).await;

        let mut running = RunningPipeline {
            tailers: Vec::new(),
            consumers: Vec::new(),
            startup: Vec::with_capacity(names.len()),
            sink: Arc::clone(&self.sink),
        };
        for (service, joined) in names.into_iter().zip(results) {
            running.record(service, joined);
        }
        running
    }
}

/// A connected service and its running consumer.
struct StartedService {
    tailer: Arc<ServiceTailer>,
    consumer: JoinHandle<ConsumerStats>,
}

async fn start_service(
    service: ServiceDescriptor,
    negotiator: Arc<SessionNegotiator>,
    options: StreamOptions,
    sink: Arc<dyn Sink>,
    cancel: CancellationToken,
) -> Result<StartedService, TailError> {
    let started = tokio::select! {
        () = cancel.cancelled() => Err(TailError::Cancelled),
        started = ServiceTailer::start(service.clone(), &negotiator, &options) => started,
    };

    match started {
        Ok((tailer, messages)) => {
            let consumer = tokio::spawn(consume(
                tailer.service().clone(),
                tailer.session().clone(),
                messages,
                sink,
            ));
            Ok(StartedService {
                tailer: Arc::new(tailer),
                consumer,
            })
        }
        Err(TailError::Cancelled) => {
            debug!(service = %service.name, "startup cancelled");
            Err(TailError::Cancelled)
        }
        Err(e) => {
            error!(service = %service.name, "failed to start tailing: {e}");
            Err(e)
        }
    }
}

/// Started tailers and their consumers, awaiting shutdown.
pub struct RunningPipeline {
    tailers: Vec<Arc<ServiceTailer>>,
    consumers: Vec<JoinHandle<ConsumerStats>>,
    startup: Vec<ServiceStartup>,
    sink: Arc<dyn Sink>,
}

impl RunningPipeline {
    /// Records the start result of `service`, keeping its tailer and consumer on success.
    fn record(
        &mut self,
        service: String,
        joined: Result<Result<StartedService, TailError>, JoinError>,
    ) {
        let outcome = match joined {
            Ok(Ok(started)) => {
                self.tailers.push(started.tailer);
                self.consumers.push(started.consumer);
                StartupOutcome::Started
            }
            Ok(Err(e)) => StartupOutcome::Failed(e),
            Err(e) => {
                error!(service = %service, "service startup task failed: {e}");
                StartupOutcome::Failed(TailError::Task(e))
            }
        };
        self.startup.push(ServiceStartup { service, outcome });
    }

    fn has_failures(&self) -> bool {
        self.startup.iter().any(|s| !s.is_started())
    }

    /// Closes every tailer, waits for every consumer, then shuts the sink down.
    pub async fn shutdown(self) -> PipelineReport {
        debug!(services = self.tailers.len(), "closing tail streams");
        join_all(self.tailers.iter().map(|tailer| tailer.close())).await;

        let mut consumers = Vec::with_capacity(self.consumers.len());
        for joined in join_all(self.consumers).await {
            match joined {
                Ok(stats) => consumers.push(stats),
                Err(e) => error!("consumer task failed: {e}"),
            }
        }

        debug!("all consumers finished, shutting down sink");
        self.sink.shutdown().await;

        PipelineReport {
            startup: self.startup,
            consumers,
        }
    }
}

fn first_failure(report: PipelineReport) -> PipelineError {
    report
        .startup
        .into_iter()
        .find_map(|s| match s.outcome {
            StartupOutcome::Failed(source) => Some(PipelineError::Startup {
                service: s.service,
                source,
            }),
            StartupOutcome::Started => None,
        })
        .unwrap_or(PipelineError::NoServicesStarted)
}

/// Drains one service's raw messages into the sink until the sequence ends.
async fn consume(
    service: ServiceDescriptor,
    session: TailSession,
    mut messages: mpsc::Receiver<RawMessage>,
    sink: Arc<dyn Sink>,
) -> ConsumerStats {
    let labels = sink::service_labels(&service);
    let mut stats = ConsumerStats {
        service: service.name.clone(),
        ..ConsumerStats::default()
    };

    while let Some(raw) = messages.recv().await {
        stats.messages += 1;
        let records = match parser::parse(&raw) {
            Ok(records) => records,
            Err(e) => {
                stats.parse_failures += 1;
                warn!(service = %service.name, "failed to parse tail event: {e}");
                continue;
            }
        };

        for record in records {
            match serde_json::to_string(&record) {
                Ok(line) => {
                    sink.submit(&labels, record.time, line);
                    stats.records += 1;
                }
                Err(e) => warn!(service = %service.name, "failed to serialize log record: {e}"),
            }
        }
    }

    if session.is_expired(OffsetDateTime::now_utc()) {
        info!(
            service = %service.name,
            expires_at = %session.expires_at,
            "tail stream ended after its session expired"
        );
    } else {
        debug!(service = %service.name, "tail stream ended");
    }
    stats
}
