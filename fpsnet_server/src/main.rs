//! Standalone development server binary.
//!
//! Usage:
//!   cargo run -p fpsnet_server -- [--addr 127.0.0.1:8888] [--silent]
//!
//! `--silent` stops the server from acknowledging heartbeats, which lets
//! the client's liveness timeout be observed by hand.

use std::env;

use anyhow::{bail, Context};
use fpsnet_server::{DevServer, ServerOptions};
use tracing::info;

struct Args {
    addr: String,
    options: ServerOptions,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut addr = "127.0.0.1:8888".to_string();
    let mut options = ServerOptions::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" => {
                addr = args.get(i + 1).context("--addr needs a value")?.clone();
                i += 2;
            }
            "--silent" => {
                options.ack_heartbeats = false;
                i += 1;
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(Args { addr, options })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { addr, options } = parse_args()?;
    info!(%addr, ack_heartbeats = options.ack_heartbeats, "Starting server");

    let server = DevServer::bind_with(&addr, options)
        .await
        .context("create server")?;
    let handle = server.handle();

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!(
                accepted = handle.accepted_connections(),
                active = handle.active_connections(),
                "Shutting down"
            );
            Ok(())
        }
    }
}
