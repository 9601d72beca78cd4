//! Shared harness for the integration tests: runs a real server on an
//! ephemeral port with a programmable operator console.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use sailshard_client::ShardClient;
use sailshard_server::{
    server::bind_ephemeral,
    shutdown::{self, ShutdownTrigger},
    ConnectionRegistry,
};
use sailshard_shared::{
    config::ClientConfig,
    net::{TickMsg, WireMsg},
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant},
};

/// Installs a test-friendly tracing subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// A server running in the background.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub registry: Arc<ConnectionRegistry>,
    /// Feeds the operator console. Dropping it ends operator input.
    pub operator: Option<mpsc::Sender<String>>,
    trigger: ShutdownTrigger,
    task: JoinHandle<anyhow::Result<()>>,
}

impl RunningServer {
    pub async fn start(tick_hz: u32) -> anyhow::Result<Self> {
        let (server, cfg) = bind_ephemeral(tick_hz).await?;
        let addr: SocketAddr = cfg.listen_addr.parse()?;
        let registry = server.registry();
        let (operator, console_rx) = mpsc::channel(32);
        let (trigger, shutdown) = shutdown::channel();
        let task = tokio::spawn(server.run(console_rx, shutdown));

        Ok(Self {
            addr,
            registry,
            operator: Some(operator),
            trigger,
            task,
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server_addr: self.addr.to_string(),
            ..Default::default()
        }
    }

    /// Connects a client and waits until the server has registered it.
    pub async fn connect(&self) -> anyhow::Result<ShardClient> {
        let expected = self.registry.len() + 1;
        let client = ShardClient::connect(&self.client_config()).await?;
        anyhow::ensure!(
            self.wait_for_clients(expected, Duration::from_secs(2)).await,
            "server did not register client"
        );
        Ok(client)
    }

    /// Types a line on the operator console.
    pub async fn say(&self, line: &str) -> anyhow::Result<()> {
        let operator = self.operator.as_ref().context("operator input closed")?;
        operator
            .send(line.to_string())
            .await
            .context("operator send")?;
        Ok(())
    }

    /// Polls the registry until it holds exactly `n` connections.
    pub async fn wait_for_clients(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.registry.len() == n {
                return true;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        self.registry.len() == n
    }

    /// Triggers shutdown and waits for the server to finish.
    pub async fn stop(self) -> anyhow::Result<()> {
        self.trigger.trigger();
        time::timeout(Duration::from_secs(5), self.task)
            .await
            .context("server did not stop")?
            .context("server task panicked")?
    }
}

/// Receives frames until one matches `pred` or `timeout` elapses.
pub async fn next_matching<F>(
    client: &mut ShardClient,
    timeout: Duration,
    mut pred: F,
) -> anyhow::Result<Option<WireMsg>>
where
    F: FnMut(&WireMsg) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        match client.recv_timeout(remaining).await? {
            Some(msg) if pred(&msg) => return Ok(Some(msg)),
            Some(_) => continue,
            None => return Ok(None),
        }
    }
}

/// Collects the tick frames received during `window`.
pub async fn collect_ticks(
    client: &mut ShardClient,
    window: Duration,
) -> anyhow::Result<Vec<TickMsg>> {
    let deadline = Instant::now() + window;
    let mut ticks = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(ticks);
        }
        match client.recv_timeout(remaining).await? {
            Some(WireMsg::Tick(t)) => ticks.push(t),
            Some(_) => {}
            None => return Ok(ticks),
        }
    }
}

/// True if every tick is exactly one more than the previous one.
pub fn is_consecutive(ticks: &[TickMsg]) -> bool {
    ticks.windows(2).all(|w| w[1].tick == w[0].tick + 1)
}
