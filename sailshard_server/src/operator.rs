//! Operator broadcaster: every line typed on the server console becomes a
//! `server_line` frame for all connected clients.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use sailshard_shared::{
    lines::{Line, LineReader},
    net::{encode, WireMsg},
};
use tokio::{io::AsyncRead, sync::mpsc};
use tracing::{info, warn};

use crate::{
    broadcast::{broadcast, BroadcastReport},
    registry::ConnectionRegistry,
    shutdown::Shutdown,
};

/// A local, line-oriented input source.
#[async_trait]
pub trait LineSource: Send {
    /// Next line without its terminator, `None` at end of input.
    async fn next_line(&mut self) -> anyhow::Result<Option<String>>;
}

/// Lines pushed from elsewhere in the process (stdin thread, tests, embedding).
#[async_trait]
impl LineSource for mpsc::Receiver<String> {
    async fn next_line(&mut self) -> anyhow::Result<Option<String>> {
        Ok(self.recv().await)
    }
}

/// Lines read directly from a byte stream. Oversized lines are skipped.
#[async_trait]
impl<R> LineSource for LineReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_line(&mut self) -> anyhow::Result<Option<String>> {
        loop {
            match self.next().await.transpose().context("read operator input")? {
                Some(Line::Text(text)) => return Ok(Some(text)),
                Some(Line::Oversized { discarded }) => {
                    warn!(discarded, "Operator line too long, skipped");
                }
                None => return Ok(None),
            }
        }
    }
}

/// Fans operator lines out to every registered connection.
pub struct OperatorBroadcaster {
    registry: Arc<ConnectionRegistry>,
    max_line_len: usize,
}

impl OperatorBroadcaster {
    /// Lines longer than `max_line_len` bytes are refused, the same limit
    /// clients are held to.
    pub fn new(registry: Arc<ConnectionRegistry>, max_line_len: usize) -> Self {
        Self {
            registry,
            max_line_len,
        }
    }

    /// Broadcasts one line verbatim.
    pub fn publish(&self, body: &str) -> anyhow::Result<BroadcastReport> {
        anyhow::ensure!(
            body.len() <= self.max_line_len,
            "operator line of {} bytes exceeds {}",
            body.len(),
            self.max_line_len
        );
        let frame = encode(&WireMsg::server_line(body)).context("encode server line")?;
        Ok(broadcast(&self.registry, &frame))
    }

    /// Broadcasts lines until the source ends, fails, or shutdown fires.
    /// End of input stops only this loop. Returns the number of lines sent.
    pub async fn run<S: LineSource>(self, mut source: S, mut shutdown: Shutdown) -> u64 {
        let mut sent = 0u64;
        loop {
            let line = tokio::select! {
                _ = shutdown.wait() => break,
                line = source.next_line() => line,
            };
            match line {
                Ok(Some(body)) => match self.publish(&body) {
                    Ok(report) => {
                        sent += 1;
                        info!(
                            delivered = report.delivered,
                            dropped = report.dropped,
                            "Operator line broadcast"
                        );
                    }
                    Err(e) => warn!(error = %e, "Operator line not sent"),
                },
                Ok(None) => {
                    info!(sent, "Operator input closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Operator input failed");
                    break;
                }
            }
        }
        sent
    }
}
