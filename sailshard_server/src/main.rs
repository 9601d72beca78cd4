//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p sailshard_server -- [--config server.json] [--addr 0.0.0.0:27015] [--tick-hz 20]
//!
//! The server accepts TCP clients, sends every client a tick heartbeat,
//! echoes each client line back to its sender, and broadcasts every line
//! typed on stdin to all clients. Ctrl-C shuts it down.

use std::env;
use std::io::BufRead;

use anyhow::Context;
use sailshard_server::{server::BroadcastServer, shutdown};
use sailshard_shared::config::ServerConfig;
use tokio::sync::mpsc;
use tracing::{info, warn};

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let path = &args[i + 1];
            let text =
                std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
            ServerConfig::from_json_str(&text).with_context(|| format!("parse config {}", path))?
        }
        _ => ServerConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.listen_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().context("parse --tick-hz")?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

/// Reads stdin on a plain thread and forwards each line, terminator stripped.
/// End of input drops the sender, which ends operator broadcasting.
fn spawn_stdin_reader(tx: mpsc::Sender<String>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match stdin.lock().read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            }
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            let line = String::from_utf8_lossy(&buf).into_owned();
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.listen_addr, tick_hz = cfg.tick_hz, "Starting server");

    let server = BroadcastServer::bind(cfg).await.context("start server")?;
    let local = server.local_addr()?;
    info!(%local, "Sailshard server listening");

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received"),
            Err(e) => {
                warn!(error = %e, "Cannot listen for Ctrl-C");
                return;
            }
        }
        trigger.trigger();
    });

    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    spawn_stdin_reader(console_tx);

    server.run(console_rx, shutdown).await?;
    info!("Server stopped");
    Ok(())
}
