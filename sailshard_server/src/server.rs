//! Server lifecycle.
//!
//! The server is a handful of independent tasks sharing one registry:
//! - the accept loop (runs in the caller's task),
//! - one [`ConnectionHandler`] plus one writer task per client,
//! - the [`TickBroadcaster`],
//! - the [`OperatorBroadcaster`].
//!
//! Binding the listener is the only fatal step. Everything after that is
//! per-connection and best-effort.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use sailshard_shared::{config::ServerConfig, lines::line_reader};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinSet,
};
use tracing::{error, info, warn};

use crate::{
    conn::{ConnHandle, ConnId},
    handler::{ConnectionHandler, HandlerExit},
    operator::{LineSource, OperatorBroadcaster},
    registry::ConnectionRegistry,
    shutdown::Shutdown,
    tick::TickBroadcaster,
};

/// Pause after a failed accept, so descriptor exhaustion does not spin.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Broadcast server bound to its listening socket.
pub struct BroadcastServer {
    cfg: ServerConfig,
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastServer {
    /// Validates the config and binds the listener.
    pub async fn bind(cfg: ServerConfig) -> anyhow::Result<Self> {
        cfg.validate().context("invalid server config")?;
        let addr: SocketAddr = cfg.listen_addr.parse().context("parse listen_addr")?;
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;

        Ok(Self {
            cfg,
            listener,
            registry: Arc::new(ConnectionRegistry::new()),
        })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.cfg
    }

    /// Runs until `shutdown` fires. Operator input ending does not stop the
    /// server.
    pub async fn run<S>(self, operator: S, shutdown: Shutdown) -> anyhow::Result<()>
    where
        S: LineSource + 'static,
    {
        let ticker = TickBroadcaster::new(self.registry.clone(), self.cfg.tick_period());
        let tick_task = tokio::spawn(ticker.run(shutdown.clone()));
        let operator_task = tokio::spawn(
            OperatorBroadcaster::new(self.registry.clone(), self.cfg.max_line_len)
                .run(operator, shutdown.clone()),
        );

        let mut handlers = JoinSet::new();
        self.accept_loop(&mut handlers, shutdown).await;

        info!(clients = self.registry.len(), "Shutting down");
        for conn in self.registry.snapshot() {
            conn.kick();
        }
        while let Some(joined) = handlers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Connection task failed");
            }
        }
        tick_task.await.context("join tick broadcaster")?;
        operator_task.await.context("join operator broadcaster")?;
        Ok(())
    }

    async fn accept_loop(&self, handlers: &mut JoinSet<HandlerExit>, mut shutdown: Shutdown) {
        let mut next_id = 0u64;
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Connection task failed");
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        next_id += 1;
                        self.admit(ConnId(next_id), stream, peer, handlers, &shutdown);
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
    }

    /// Registers a freshly accepted stream and starts its writer and handler.
    fn admit(
        &self,
        id: ConnId,
        stream: TcpStream,
        peer: SocketAddr,
        handlers: &mut JoinSet<HandlerExit>,
        shutdown: &Shutdown,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(conn = %id, %peer, error = %e, "Failed to set TCP_NODELAY");
        }
        let (read_half, write_half) = stream.into_split();
        let (handle, outbox) = ConnHandle::channel(id, peer, self.cfg.outbound_capacity);

        if let Err(e) = self.registry.register(handle.clone()) {
            error!(conn = %id, %peer, error = %e, "Registration failed, closing");
            return;
        }
        info!(conn = %id, %peer, clients = self.registry.len(), "Client connected");

        let writer = tokio::spawn(outbox.run(write_half, self.cfg.write_timeout()));
        let handler = ConnectionHandler::new(handle, self.registry.clone(), self.cfg.echo_timeout());
        let reader = line_reader(read_half, self.cfg.max_line_len);
        let shutdown = shutdown.clone();
        handlers.spawn(async move {
            let exit = handler.run(reader, shutdown).await;
            if let Err(e) = writer.await {
                warn!(conn = %id, %peer, error = %e, "Writer task failed");
            }
            exit
        });
    }
}

/// Helper for tests: bind to an ephemeral port on localhost.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(BroadcastServer, ServerConfig)> {
    let cfg = ServerConfig {
        listen_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        tick_hz,
        ..Default::default()
    };
    let server = BroadcastServer::bind(cfg).await?;
    let mut cfg = server.config().clone();
    cfg.listen_addr = server.local_addr()?.to_string();
    Ok((server, cfg))
}
