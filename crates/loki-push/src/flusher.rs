// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::aggregator::PushRequest;
use crate::client::LokiConfig;
use crate::errors::LokiError;

const TENANT_HEADER: &str = "X-Scope-OrgID";

/// Ships push payloads to a single Loki endpoint.
#[derive(Debug, Clone)]
pub struct Flusher {
    client: reqwest::Client,
    url: String,
    tenant_id: Option<String>,
    max_retries: u32,
    retry_backoff: Duration,
}

impl Flusher {
    pub fn new(config: &LokiConfig) -> Result<Self, LokiError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(LokiError::Client)?;
        Ok(Self {
            client,
            url: config.url.clone(),
            tenant_id: config.tenant_id.clone(),
            max_retries: config.max_retries.max(1),
            retry_backoff: config.retry_backoff,
        })
    }

    /// Sends one payload, retrying throttling, server errors and transport failures.
    ///
    /// Other 4xx responses mean the payload will never be accepted, so they are
    /// returned immediately.
    pub async fn send(&self, request: &PushRequest) -> Result<(), LokiError> {
        let body = serde_json::to_vec(request)?;
        let entries = request.entry_count();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let mut builder = self
                .client
                .post(&self.url)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
            if let Some(tenant_id) = &self.tenant_id {
                builder = builder.header(TENANT_HEADER, tenant_id);
            }

            let reason = match builder.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        debug!("Pushed {entries} entries to Loki");
                        return Ok(());
                    }
                    let text = resp.text().await.unwrap_or_default();
                    if !is_retryable(status) {
                        error!("{status}: Loki rejected push of {entries} entries: {text}");
                        return Err(LokiError::Rejected {
                            status: status.as_u16(),
                            body: text,
                        });
                    }
                    format!("status {status}: {text}")
                }
                Err(e) => e.to_string(),
            };

            if attempts >= self.max_retries {
                return Err(LokiError::RetriesExhausted { attempts, reason });
            }
            warn!("Loki push attempt {attempts} failed, retrying: {reason}");
            tokio::time::sleep(self.retry_backoff * attempts).await;
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Aggregator;
    use crate::aggregator::Entry;
    use crate::labels::LabelSet;
    use mockito::{Matcher, Server};
    use time::macros::datetime;

    fn config(url: String) -> LokiConfig {
        LokiConfig {
            max_retries: 3,
            retry_backoff: Duration::from_millis(1),
            ..LokiConfig::new(url)
        }
    }

    fn request() -> PushRequest {
        let mut aggregator = Aggregator::default();
        aggregator.add(Entry {
            labels: LabelSet::new().with("service_name", "checkout"),
            timestamp: datetime!(2023-11-14 22:13:20 UTC),
            line: r#"{"message":"hi"}"#.to_string(),
        });
        aggregator.take_batch().unwrap()
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn sends_json_payload() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(serde_json::json!({
                "streams": [{
                    "stream": {"service_name": "checkout"},
                    "values": [["1700000000000000000", "{\"message\":\"hi\"}"]]
                }]
            })))
            .with_status(204)
            .create_async()
            .await;

        let flusher = Flusher::new(&config(format!("{}/loki/api/v1/push", server.url()))).unwrap();
        flusher.send(&request()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn sets_tenant_header_when_configured() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .match_header("x-scope-orgid", "team-a")
            .with_status(204)
            .create_async()
            .await;

        let mut config = config(format!("{}/loki/api/v1/push", server.url()));
        config.tenant_id = Some("team-a".to_string());
        Flusher::new(&config).unwrap().send(&request()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn retries_server_errors_until_exhausted() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(503)
            .with_body("unavailable")
            .expect(3)
            .create_async()
            .await;

        let flusher = Flusher::new(&config(format!("{}/loki/api/v1/push", server.url()))).unwrap();
        let err = flusher.send(&request()).await.unwrap_err();
        assert!(matches!(err, LokiError::RetriesExhausted { attempts: 3, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(400)
            .with_body("entry out of order")
            .expect(1)
            .create_async()
            .await;

        let flusher = Flusher::new(&config(format!("{}/loki/api/v1/push", server.url()))).unwrap();
        let err = flusher.send(&request()).await.unwrap_err();
        match err {
            LokiError::Rejected { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "entry out of order");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        mock.assert_async().await;
    }
}
