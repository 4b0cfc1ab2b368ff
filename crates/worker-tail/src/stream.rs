// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Push connection to a tail session's stream endpoint.
//!
//! [`connect`] performs the websocket handshake and spawns a reader task that
//! forwards every data frame onto a bounded channel. The channel is the only
//! hand-off between the reader and its consumer: when it is full the reader
//! stops reading from the socket. The channel's sender is dropped exactly once,
//! when the reader task exits, which is how consumers observe end-of-stream.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::errors::StreamError;

/// Sub-protocol token the tail endpoint expects.
pub const TRACE_SUBPROTOCOL: &str = "trace-v1";
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// One undecoded payload received from the stream.
pub type RawMessage = Vec<u8>;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    pub handshake_timeout: Duration,
    /// Capacity of the reader → consumer channel.
    pub channel_capacity: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Write half of an open stream plus its reader task.
pub struct Connection {
    writer: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
    stop: CancellationToken,
}

/// Reader task of a connection whose write half has been released.
pub struct ReaderHandle {
    reader: JoinHandle<()>,
}

impl Connection {
    /// Sends a normal-closure frame and closes the write half. Errors are ignored.
    pub async fn send_close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::Borrowed(""),
        };
        let close = async {
            self.writer.send(Message::Close(Some(frame))).await?;
            self.writer.close().await
        };
        match timeout(CLOSE_FRAME_TIMEOUT, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("failed to send close frame: {e}"),
            Err(_) => debug!("timed out sending close frame"),
        }
    }

    /// Drops the write half and tells the reader to stop.
    pub fn release(self) -> ReaderHandle {
        self.stop.cancel();
        ReaderHandle {
            reader: self.reader,
        }
    }
}

impl ReaderHandle {
    /// Waits for the reader task to exit. No message is delivered afterwards.
    pub async fn wait(self) {
        if let Err(e) = self.reader.await {
            error!("stream reader task failed: {e}");
        }
    }
}

/// Opens the stream connection and starts its reader task.
///
/// The handshake is bounded by `options.handshake_timeout`; failing it is a
/// startup error rather than a stream error.
pub async fn connect(
    url: &str,
    options: &StreamOptions,
) -> Result<(Connection, mpsc::Receiver<RawMessage>), StreamError> {
    let mut request = url
        .into_client_request()
        .map_err(|source| StreamError::Endpoint {
            url: url.to_string(),
            source,
        })?;
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(TRACE_SUBPROTOCOL),
    );

    let (ws, _) = timeout(options.handshake_timeout, connect_async(request))
        .await
        .map_err(|_| StreamError::HandshakeTimeout {
            url: url.to_string(),
            timeout: options.handshake_timeout,
        })??;

    let (writer, reader) = ws.split();
    let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
    let stop = CancellationToken::new();
    let reader = tokio::spawn(read_loop(reader, tx, stop.clone()));

    Ok((
        Connection {
            writer,
            reader,
            stop,
        },
        rx,
    ))
}

async fn read_loop(
    mut reader: SplitStream<WsStream>,
    tx: mpsc::Sender<RawMessage>,
    stop: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            frame = reader.next() => frame,
        };

        let payload = match frame {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(bytes))) => bytes,
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Close(frame))) => {
                match frame {
                    Some(frame) if !is_expected_close(frame.code) => {
                        warn!(code = %frame.code, reason = %frame.reason, "stream closed unexpectedly");
                    }
                    _ => debug!("stream closed by peer"),
                }
                break;
            }
            Some(Err(e)) => {
                if !is_expected_error(&e) {
                    error!("websocket read error: {e}");
                }
                break;
            }
            None => break,
        };

        // Blocks while the consumer is behind; this is the backpressure point.
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            sent = tx.send(payload) => {
                if sent.is_err() {
                    debug!("message receiver dropped");
                    break;
                }
            }
        }
    }
    debug!("stream reader exiting");
}

fn is_expected_close(code: CloseCode) -> bool {
    matches!(code, CloseCode::Normal | CloseCode::Away)
}

fn is_expected_error(e: &tungstenite::Error) -> bool {
    matches!(
        e,
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed
    )
}
