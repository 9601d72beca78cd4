//! Client implementation.
//!
//! Holds one TCP connection to the broadcast server. Incoming frames are
//! decoded as they arrive; lines that do not decode are skipped, so a newer
//! server adding message types does not break older clients.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use futures_util::StreamExt;
use sailshard_shared::{
    config::ClientConfig,
    lines::{line_reader, Line, LineReader},
    net::{decode, WireMsg},
};
use tokio::{
    io::AsyncWriteExt,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    time,
};
use tracing::{debug, info};

/// Connection to a broadcast server.
pub struct ShardClient {
    reader: LineReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    local: SocketAddr,
    server: SocketAddr,
}

impl ShardClient {
    /// Connects to the configured server.
    pub async fn connect(cfg: &ClientConfig) -> anyhow::Result<Self> {
        let server: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(%server, "Connecting to server");

        let stream = TcpStream::connect(server)
            .await
            .context("tcp connect")?;
        let local = stream.local_addr().context("local_addr")?;
        let (read_half, write_half) = stream.into_split();

        info!(%local, %server, "Connected to server");
        Ok(Self {
            reader: line_reader(read_half, cfg.max_frame_len),
            writer: write_half,
            local,
            server,
        })
    }

    /// Our address as the server sees it; `echo` replies carry it in `from`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    /// Sends one line of text. The server echoes it back to us.
    pub async fn send_line(&mut self, line: &str) -> anyhow::Result<()> {
        if line.contains('\n') {
            anyhow::bail!("line contains a newline");
        }
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.writer.write_all(&buf).await.context("tcp write")?;
        Ok(())
    }

    /// Next decodable frame, `None` when the server closes the connection.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> anyhow::Result<Option<WireMsg>> {
        loop {
            match self.reader.next().await.transpose().context("tcp read")? {
                Some(Line::Text(line)) => match decode(&line) {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(e) => debug!(error = %e, "Skipping undecodable frame"),
                },
                Some(Line::Oversized { discarded }) => {
                    debug!(discarded, "Skipping oversized frame");
                }
                None => return Ok(None),
            }
        }
    }

    /// Like [`ShardClient::recv`], giving up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> anyhow::Result<Option<WireMsg>> {
        match time::timeout(timeout, self.recv()).await {
            Ok(res) => res,
            Err(_) => Ok(None),
        }
    }

    /// Half-closes the connection; the server sees end of stream.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.writer.shutdown().await.context("tcp shutdown")?;
        Ok(())
    }
}

/// One display line per frame.
pub fn render(msg: &WireMsg) -> String {
    match msg {
        WireMsg::Tick(t) => format!("Tick {} @ {}", t.tick, t.ts),
        WireMsg::Echo(e) | WireMsg::ServerLine(e) => format!("[{}]: {}", e.from, e.body),
    }
}
