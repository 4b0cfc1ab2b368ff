// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Normalizes raw tail events into [`LogRecord`]s.
//!
//! A tail event describes one worker invocation: the request that triggered
//! it, the response status and every console line the worker emitted. Each
//! console line becomes one record carrying the invocation's request context.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::errors::ParseError;

/// Canonical, storage-ready shape of one log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub level: String,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TailEvent {
    logs: Option<Vec<TailLog>>,
    event: Option<InvocationEvent>,
}

// Absent and null leaf fields read as zero values, so one sparse log line
// never costs the whole event.
#[derive(Debug, Deserialize)]
struct TailLog {
    #[serde(default, deserialize_with = "null_as_default")]
    message: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    level: String,
    #[serde(default, deserialize_with = "null_as_default")]
    timestamp: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InvocationEvent {
    request: Option<RequestInfo>,
    response: Option<ResponseInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RequestInfo {
    #[serde(deserialize_with = "null_as_default")]
    url: String,
    #[serde(deserialize_with = "null_as_default")]
    method: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResponseInfo {
    #[serde(deserialize_with = "null_as_default")]
    status: u16,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parses one raw tail event.
///
/// Returns an empty vector when the invocation logged nothing. Malformed
/// payloads are an error; callers skip them and keep streaming.
pub fn parse(data: &[u8]) -> Result<Vec<LogRecord>, ParseError> {
    let raw: TailEvent = serde_json::from_slice(data)?;

    let logs = match raw.logs {
        Some(logs) if !logs.is_empty() => logs,
        _ => return Ok(Vec::new()),
    };

    let event = raw.event.unwrap_or_default();
    let request = event.request.unwrap_or_default();
    let status = event.response.map(|r| r.status).unwrap_or_default();

    logs.into_iter()
        .map(|log| {
            Ok(LogRecord {
                time: from_unix_millis(log.timestamp)?,
                level: log.level.to_uppercase(),
                method: request.method.clone(),
                url: request.url.clone(),
                status,
                message: join_message(&log.message),
            })
        })
        .collect()
}

fn from_unix_millis(millis: i64) -> Result<OffsetDateTime, ParseError> {
    Ok(OffsetDateTime::from_unix_timestamp_nanos(
        i128::from(millis) * 1_000_000,
    )?)
}

// Console arguments may be any JSON value; strings are kept verbatim.
fn join_message(parts: &[Value]) -> String {
    parts
        .iter()
        .map(|part| match part {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
