// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod config;
mod logger;

use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use loki_push::LokiClient;
use worker_tail::session::{SessionNegotiator, DEFAULT_REQUEST_TIMEOUT};
use worker_tail::{Pipeline, PipelineReport};

#[tokio::main]
pub async fn main() -> ExitCode {
    let path = config::config_path();
    let loaded = config::load(&path);

    let log_level = loaded
        .as_ref()
        .map(|config| config.log_level)
        .unwrap_or_default();
    if let Err(e) = logger::init(log_level) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration in {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };

    let loki = match LokiClient::new(config.loki.to_loki_config()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("failed to create Loki client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let negotiator =
        match SessionNegotiator::new(config.api_base_url.clone(), DEFAULT_REQUEST_TIMEOUT) {
            Ok(negotiator) => negotiator,
            Err(e) => {
                error!("failed to create tail API client: {e}");
                loki.stop().await;
                return ExitCode::FAILURE;
            }
        };

    let pipeline = Pipeline::new(negotiator, loki)
        .with_stream_options(config.stream_options())
        .with_startup_policy(config.startup_policy);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    info!(
        services = config.services.len(),
        loki = %config.loki.url,
        "starting worker tail agent"
    );
    match pipeline.run(config.services, cancel).await {
        Ok(report) => {
            log_report(&report);
            info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Cancels `cancel` on Ctrl+C or, on unix, SIGTERM.
async fn cancel_on_signal(cancel: CancellationToken) {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for interrupt signal: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to listen for terminate signal: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("received interrupt, shutting down"),
        () = terminate => info!("received terminate signal, shutting down"),
    }
    cancel.cancel();
}

fn log_report(report: &PipelineReport) {
    for (service, reason) in report.failed() {
        warn!(service = %service, "service was not tailed: {reason}");
    }
    for stats in &report.consumers {
        info!(
            service = %stats.service,
            messages = stats.messages,
            records = stats.records,
            parse_failures = stats.parse_failures,
            "tail stream summary"
        );
    }
}
