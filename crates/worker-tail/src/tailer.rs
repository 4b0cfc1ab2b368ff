// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::errors::TailError;
use crate::service::ServiceDescriptor;
use crate::session::{SessionNegotiator, TailSession};
use crate::stream::{self, Connection, RawMessage, StreamOptions};

/// Owns the tail session and stream connection of one service.
pub struct ServiceTailer {
    service: ServiceDescriptor,
    session: TailSession,
    // Only the handle is guarded; messages flow through the channel.
    connection: Mutex<Option<Connection>>,
}

impl ServiceTailer {
    /// Opens a session for `service` and connects to its stream.
    ///
    /// Returns the tailer together with the receiving end of its raw message
    /// sequence, which ends when the connection closes or is closed.
    pub async fn start(
        service: ServiceDescriptor,
        negotiator: &SessionNegotiator,
        options: &StreamOptions,
    ) -> Result<(Self, mpsc::Receiver<RawMessage>), TailError> {
        let session = negotiator.open(&service).await?;
        debug!(
            service = %service.name,
            session_id = %session.id,
            expires_at = %session.expires_at,
            "opened tail session"
        );

        let (connection, messages) = stream::connect(&session.url, options).await?;
        info!(service = %service.name, "connected to tail stream");

        Ok((
            Self {
                service,
                session,
                connection: Mutex::new(Some(connection)),
            },
            messages,
        ))
    }

    pub fn service(&self) -> &ServiceDescriptor {
        &self.service
    }

    pub fn session(&self) -> &TailSession {
        &self.session
    }

    pub async fn is_closed(&self) -> bool {
        self.connection.lock().await.is_none()
    }

    /// Tears the connection down. Safe to call concurrently and repeatedly.
    ///
    /// The first call sends a close frame and clears the handle under the lock,
    /// then waits outside the lock for the reader task to exit, so no message
    /// is delivered once it returns. Later calls find no handle and return.
    pub async fn close(&self) {
        let reader = {
            let mut guard = self.connection.lock().await;
            let Some(mut connection) = guard.take() else {
                debug!(service = %self.service.name, "tail stream already closed");
                return;
            };
            connection.send_close().await;
            connection.release()
        };
        reader.wait().await;
        debug!(service = %self.service.name, "tail stream closed");
    }
}
