//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p sailshard_client -- [--config client.json] [--addr 127.0.0.1:27015]
//!
//! Prints every frame received from the server and sends each stdin line to
//! the server, which echoes it back.

use std::env;
use std::io::BufRead;

use anyhow::Context;
use sailshard_client::{render, ShardClient};
use sailshard_shared::config::ClientConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<ClientConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let path = &args[i + 1];
            let text =
                std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
            ClientConfig::from_json_str(&text).with_context(|| format!("parse config {}", path))?
        }
        _ => ClientConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    let mut client = ShardClient::connect(&cfg).await.context("connect")?;

    // Stdin reader thread.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    let mut stdin_open = true;
    loop {
        tokio::select! {
            msg = client.recv() => match msg? {
                Some(msg) => println!("{}", render(&msg)),
                None => {
                    println!("Disconnected from server.");
                    break;
                }
            },
            line = console_rx.recv(), if stdin_open => match line {
                Some(line) => client.send_line(&line).await?,
                None => {
                    info!("stdin closed, still listening");
                    stdin_open = false;
                }
            },
        }
    }

    Ok(())
}
