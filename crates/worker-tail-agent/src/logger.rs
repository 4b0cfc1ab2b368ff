// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Dependencies that are too chatty at debug level.
const QUIET_TARGETS: &str = "h2=off,hyper=off,rustls=off,tungstenite=off,tokio_tungstenite=off";

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("could not parse log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("could not install the global subscriber: {0}")]
    Install(#[from] SetGlobalDefaultError),
}

pub fn env_filter(level: LogLevel) -> String {
    format!("{QUIET_TARGETS},{level}")
}

/// Installs the process-wide subscriber. Call once, before anything logs.
pub fn init(level: LogLevel) -> Result<(), LoggerError> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter(level))?)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
