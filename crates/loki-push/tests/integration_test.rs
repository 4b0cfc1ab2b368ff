// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use loki_push::{LabelSet, LokiClient, LokiConfig, LokiError};
use mockito::{Matcher, Server};
use std::time::Duration;
use time::macros::datetime;
use tokio::time::{sleep, timeout};

fn config(server: &Server) -> LokiConfig {
    LokiConfig {
        batch_wait: Duration::from_secs(60),
        retry_backoff: Duration::from_millis(1),
        ..LokiConfig::new(format!("{}/loki/api/v1/push", server.url()))
    }
}

#[tokio::test]
async fn stop_flushes_pending_entries() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/loki/api/v1/push")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "streams": [{
                "stream": {"service_name": "checkout", "env": "production"},
                "values": [["1700000000000000000", "hi"]]
            }]
        })))
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let client = LokiClient::new(config(&server)).unwrap();
    let labels = LabelSet::new()
        .with("service_name", "checkout")
        .with("env", "production");
    client
        .handle(labels, datetime!(2023-11-14 22:13:20 UTC), "hi".to_string())
        .unwrap();

    client.stop().await;
    mock.assert_async().await;
}

#[tokio::test]
async fn flushes_after_batch_wait() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/loki/api/v1/push")
        .with_status(204)
        .create_async()
        .await;

    let client = LokiClient::new(LokiConfig {
        batch_wait: Duration::from_millis(50),
        ..config(&server)
    })
    .unwrap();
    client
        .handle(
            LabelSet::new().with("service_name", "api"),
            datetime!(2023-11-14 22:13:20 UTC),
            "tick".to_string(),
        )
        .unwrap();

    let waited = timeout(Duration::from_secs(2), async {
        while !mock.matched_async().await {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "entry should be pushed once the batch wait elapses");
    client.stop().await;
}

#[tokio::test]
async fn flushes_early_when_batch_is_full() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/loki/api/v1/push")
        .with_status(204)
        .create_async()
        .await;

    let client = LokiClient::new(LokiConfig {
        batch_size: 16,
        ..config(&server)
    })
    .unwrap();
    client
        .handle(
            LabelSet::new().with("service_name", "api"),
            datetime!(2023-11-14 22:13:20 UTC),
            "a line longer than sixteen bytes".to_string(),
        )
        .unwrap();

    let waited = timeout(Duration::from_secs(2), async {
        while !mock.matched_async().await {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "full batch should be pushed before the batch wait");
    client.stop().await;
}

#[tokio::test]
async fn rejects_entries_after_stop() {
    let server = Server::new_async().await;
    let client = LokiClient::new(config(&server)).unwrap();
    client.stop().await;
    client.stop().await;

    let result = client.handle(
        LabelSet::new().with("service_name", "api"),
        datetime!(2023-11-14 22:13:20 UTC),
        "late".to_string(),
    );
    assert!(matches!(result, Err(LokiError::Stopped)));
}
