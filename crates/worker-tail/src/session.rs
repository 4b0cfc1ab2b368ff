// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Opens tail sessions through the workers API.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::debug;

use crate::errors::SessionError;
use crate::service::ServiceDescriptor;

pub const DEFAULT_API_BASE_URL: &str = "https://api.cloudflare.com/client/v4";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A server-side registration authorizing one stream connection.
///
/// `expires_at` is informational: sessions are not renewed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailSession {
    pub id: String,
    pub url: String,
    pub expires_at: OffsetDateTime,
}

impl TailSession {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

#[derive(Deserialize)]
struct TailEnvelope {
    result: Option<TailResult>,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

#[derive(Deserialize)]
struct TailResult {
    id: String,
    url: String,
    #[serde(with = "time::serde::rfc3339")]
    expires_at: OffsetDateTime,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone)]
pub struct SessionNegotiator {
    client: reqwest::Client,
    api_base_url: String,
}

impl SessionNegotiator {
    pub fn new(api_base_url: impl Into<String>, timeout: Duration) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SessionError::Client)?;
        Ok(Self::with_client(client, api_base_url))
    }

    pub fn with_client(client: reqwest::Client, api_base_url: impl Into<String>) -> Self {
        let api_base_url = api_base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            api_base_url,
        }
    }

    /// Tail endpoint for a service; environment-scoped when `env` is set.
    pub fn tail_url(&self, service: &ServiceDescriptor) -> String {
        match &service.env {
            Some(env) => format!(
                "{}/accounts/{}/workers/scripts/{}/{}/tails",
                self.api_base_url, service.account_id, service.name, env
            ),
            None => format!(
                "{}/accounts/{}/workers/scripts/{}/tails",
                self.api_base_url, service.account_id, service.name
            ),
        }
    }

    /// Issues a single authenticated request to open a tail session.
    pub async fn open(&self, service: &ServiceDescriptor) -> Result<TailSession, SessionError> {
        let url = self.tail_url(service);
        debug!(service = %service.name, "opening tail session");

        let resp = self
            .client
            .post(&url)
            .header(
                AUTHORIZATION,
                format!("Bearer {}", service.api_token.expose()),
            )
            .header(CONTENT_TYPE, "application/json")
            .body(r#"{"filters":[]}"#)
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(SessionError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let body = resp.text().await?;

        let envelope: TailEnvelope = serde_json::from_str(&body)?;
        match envelope.result {
            Some(result) if envelope.success => Ok(TailSession {
                id: result.id,
                url: result.url,
                expires_at: result.expires_at,
            }),
            _ => Err(SessionError::Rejected(describe_errors(&envelope.errors))),
        }
    }
}

fn describe_errors(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "response did not contain a session".to_string();
    }
    errors
        .iter()
        .map(|e| format!("{} ({})", e.message, e.code))
        .collect::<Vec<_>>()
        .join("; ")
}
