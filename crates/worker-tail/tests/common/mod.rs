// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use loki_push::LabelSet;
use mockito::{Mock, ServerGuard};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use worker_tail::Sink;

/// What the tail server does once its scripted messages are sent.
#[derive(Debug, Clone, Copy)]
pub enum AfterMessages {
    /// Keep the connection open until the client goes away.
    Hold,
    /// Keep sending the same event as fast as the client reads.
    Flood,
    /// Close the connection with the given code.
    Close(CloseCode),
}

pub struct TailServer {
    pub url: String,
    /// Close frames received from the client.
    pub close_frames: Arc<AtomicUsize>,
    /// Value of the sub-protocol header the client requested.
    pub requested_protocol: Arc<Mutex<Option<String>>>,
    pub handle: JoinHandle<()>,
}

impl TailServer {
    /// Waits for the single connection the server accepts to finish.
    pub async fn finished(&mut self) {
        timeout(Duration::from_secs(5), &mut self.handle)
            .await
            .expect("tail server did not finish")
            .expect("tail server panicked");
    }
}

/// Serves exactly one websocket connection that echoes the requested sub-protocol.
pub async fn spawn_tail_server(messages: Vec<String>, after: AfterMessages) -> TailServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let close_frames = Arc::new(AtomicUsize::new(0));
    let requested_protocol = Arc::new(Mutex::new(None));

    let closes = Arc::clone(&close_frames);
    let protocol = Arc::clone(&requested_protocol);
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = move |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
            if let Some(value) = request.headers().get(SEC_WEBSOCKET_PROTOCOL) {
                *protocol.lock().unwrap() = value.to_str().ok().map(str::to_string);
                response
                    .headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, value.clone());
            }
            Ok(response)
        };
        let ws = accept_hdr_async(stream, callback).await.unwrap();
        let (mut tx, mut rx) = ws.split();

        for message in messages {
            if tx.send(Message::Text(message)).await.is_err() {
                return;
            }
        }

        let flood = match after {
            AfterMessages::Hold => None,
            AfterMessages::Flood => Some(tokio::spawn(async move {
                while tx.send(Message::Text(event("flood"))).await.is_ok() {}
            })),
            AfterMessages::Close(code) => {
                let _ = tx
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: "".into(),
                    })))
                    .await;
                None
            }
        };

        while let Some(frame) = rx.next().await {
            match frame {
                Ok(Message::Close(_)) => {
                    closes.fetch_add(1, Ordering::SeqCst);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        if let Some(flood) = flood {
            flood.abort();
        }
    });

    TailServer {
        url: format!("ws://{addr}/tail/1"),
        close_frames,
        requested_protocol,
        handle,
    }
}

/// A tail event with a single console line.
pub fn event(message: &str) -> String {
    serde_json::json!({
        "outcome": "ok",
        "logs": [{"message": [message], "level": "log", "timestamp": 1700000000000i64}],
        "event": {
            "request": {"url": "/buy", "method": "POST"},
            "response": {"status": 200}
        }
    })
    .to_string()
}

pub fn session_body(ws_url: &str) -> String {
    serde_json::json!({
        "result": {"id": "tail-1", "url": ws_url, "expires_at": "2099-01-01T00:00:00Z"},
        "success": true,
        "errors": [],
        "messages": []
    })
    .to_string()
}

/// Mocks the session API for one service, pointing it at `ws_url`.
pub async fn mock_session(
    api: &mut ServerGuard,
    script_path: &str,
    ws_url: &str,
) -> Mock {
    api.mock(
        "POST",
        format!("/accounts/acc/workers/scripts/{script_path}/tails").as_str(),
    )
    .with_status(200)
    .with_body(session_body(ws_url))
    .create_async()
    .await
}

pub struct Submission {
    pub labels: LabelSet,
    pub timestamp: OffsetDateTime,
    pub line: String,
}

impl Submission {
    pub fn body(&self) -> serde_json::Value {
        serde_json::from_str(&self.line).unwrap()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub submissions: Mutex<Vec<Submission>>,
    pub shut_down: AtomicBool,
    pub late_submissions: AtomicUsize,
}

impl RecordingSink {
    pub fn len(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub async fn wait_for(&self, count: usize) {
        let waited = timeout(Duration::from_secs(5), async {
            while self.len() < count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "expected {count} submissions, got {}", self.len());
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn submit(&self, labels: &LabelSet, timestamp: OffsetDateTime, line: String) {
        if self.shut_down.load(Ordering::SeqCst) {
            self.late_submissions.fetch_add(1, Ordering::SeqCst);
        }
        self.submissions.lock().unwrap().push(Submission {
            labels: labels.clone(),
            timestamp,
            line,
        });
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

/// Accepts one connection and never answers the websocket upgrade.
pub async fn spawn_silent_endpoint() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        sleep(Duration::from_secs(60)).await;
    });
    (format!("ws://{addr}/tail/stuck"), handle)
}
