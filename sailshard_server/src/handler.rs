//! Per-connection handler.
//!
//! Reads lines from one client and echoes each back to that client only,
//! tagged with the client's address. The handler is the only component that
//! removes its connection from the registry, and it does so exactly once when
//! its loop ends.

use std::{fmt, sync::Arc, time::Duration};

use anyhow::Context;
use futures_util::StreamExt;
use sailshard_shared::{
    lines::{Line, LineReader},
    net::{encode, WireMsg},
};
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::{
    conn::{ConnHandle, SendError},
    registry::ConnectionRegistry,
    shutdown::Shutdown,
};

/// Why a handler stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerExit {
    /// Peer closed its side.
    Eof,
    /// Reading from the peer failed.
    ReadError(String),
    /// The connection was kicked (slow consumer or failed write).
    Kicked,
    /// Echo could not be queued.
    EchoFailed(SendError),
    /// Server is shutting down.
    Shutdown,
}

impl fmt::Display for HandlerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerExit::Eof => write!(f, "peer closed connection"),
            HandlerExit::ReadError(e) => write!(f, "read error: {}", e),
            HandlerExit::Kicked => write!(f, "dropped by server"),
            HandlerExit::EchoFailed(e) => write!(f, "echo failed: {}", e),
            HandlerExit::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// Reader loop for one registered connection.
pub struct ConnectionHandler {
    handle: ConnHandle,
    registry: Arc<ConnectionRegistry>,
    echo_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(
        handle: ConnHandle,
        registry: Arc<ConnectionRegistry>,
        echo_timeout: Duration,
    ) -> Self {
        Self {
            handle,
            registry,
            echo_timeout,
        }
    }

    /// Runs until end of stream, a read error, a kick, or shutdown, then
    /// deregisters the connection. Dropping `self` releases this handler's
    /// producer handle so the writer task can finish and close the socket.
    pub async fn run<R>(self, mut reader: LineReader<R>, mut shutdown: Shutdown) -> HandlerExit
    where
        R: AsyncRead + Unpin,
    {
        let exit = loop {
            let line = tokio::select! {
                biased;
                _ = self.handle.kicked() => break HandlerExit::Kicked,
                _ = shutdown.wait() => break HandlerExit::Shutdown,
                line = reader.next() => line.transpose(),
            };

            match line {
                Ok(Some(Line::Text(body))) => {
                    if let Err(e) = self.echo(body).await {
                        break HandlerExit::EchoFailed(e);
                    }
                }
                Ok(Some(Line::Oversized { discarded })) => {
                    debug!(peer = %self.handle.peer(), discarded, "Oversized line skipped");
                }
                Ok(None) => break HandlerExit::Eof,
                Err(e) => break HandlerExit::ReadError(e.to_string()),
            }
        };

        if self.registry.deregister(self.handle.id()) {
            info!(
                conn = %self.handle.id(),
                peer = %self.handle.peer(),
                reason = %exit,
                clients = self.registry.len(),
                "Client disconnected"
            );
        }
        exit
    }

    async fn echo(&self, body: String) -> Result<(), SendError> {
        let msg = WireMsg::echo(self.handle.peer().to_string(), body);
        let frame = match encode(&msg).context("encode echo") {
            Ok(frame) => frame,
            Err(e) => {
                warn!(peer = %self.handle.peer(), error = %e, "Echo skipped");
                return Ok(());
            }
        };
        self.handle.send(frame, self.echo_timeout).await
    }
}
