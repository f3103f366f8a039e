//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p fpsnet_client -- [--config client.json] [--host 127.0.0.1]
//!       [--port 8888] [--player-id 1] [--heartbeat 5] [--send-interval 0.1]
//!
//! Settings come from the JSON file (if any), then `FPSNET_*` variables
//! (a `.env` file is honoured), then flags.
//!
//! Console commands:
//!   connect [host:port] - Connect to the configured or given server
//!   disconnect          - Drop the connection
//!   join                - Send a join request
//!   status              - Show connection and join status
//!   state               - Show the authoritative state
//!   hp <health> <max>   - Push an attribute update
//!   quit                - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use fpsnet_client::{ClientEvent, NetClient, PlayerSampler, StateProducer};
use fpsnet_shared::{
    config::ClientConfig,
    math::Vec3,
    protocol::{PlayerAttributes, PlayerSnapshot},
};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Walks the local player around a circle; stands in for gameplay.
struct Walker {
    started: Instant,
    radius: f32,
    /// Radians per second.
    speed: f32,
    health: f32,
}

impl Walker {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            radius: 8.0,
            speed: 0.5,
            health: 100.0,
        }
    }
}

impl PlayerSampler for Walker {
    fn sample(&self) -> PlayerSnapshot {
        let angle = self.started.elapsed().as_secs_f32() * self.speed;
        let (sin, cos) = angle.sin_cos();
        let tangent = self.radius * self.speed;
        PlayerSnapshot {
            position: Vec3::new(self.radius * cos, 0.0, self.radius * sin),
            rotation: Vec3::new(0.0, angle.to_degrees() + 90.0, 0.0),
            velocity: Vec3::new(-tangent * sin, 0.0, tangent * cos),
            grounded: true,
            health: self.health,
        }
    }
}

struct Args {
    config: ClientConfig,
    send_interval: Duration,
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> anyhow::Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .with_context(|| format!("{flag} needs a value"))
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    let mut config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = flag_value(&args, i, "--config")?;
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read config {path}"))?;
            ClientConfig::from_json_str(&text).with_context(|| format!("parse config {path}"))?
        }
        None => ClientConfig::default(),
    };
    config
        .apply_overrides(|var| env::var(var).ok())
        .context("environment overrides")?;

    let mut send_interval = Duration::from_millis(100);
    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--config" => {}
            "--host" => config.server_host = flag_value(&args, i, flag)?.to_string(),
            "--port" => {
                config.server_port = flag_value(&args, i, flag)?.parse().context("--port")?
            }
            "--player-id" => {
                config.player_id = flag_value(&args, i, flag)?
                    .parse()
                    .context("--player-id")?
            }
            "--heartbeat" => {
                config.heartbeat_interval_secs = flag_value(&args, i, flag)?
                    .parse()
                    .context("--heartbeat")?
            }
            "--send-interval" => {
                let secs: f32 = flag_value(&args, i, flag)?
                    .parse()
                    .context("--send-interval")?;
                send_interval = Duration::try_from_secs_f32(secs)
                    .ok()
                    .filter(|d| !d.is_zero())
                    .context("--send-interval must be positive")?;
            }
            other => bail!("unknown argument: {other}"),
        }
        i += 2;
    }
    config.validate().context("invalid configuration")?;

    Ok(Args {
        config,
        send_interval,
    })
}

/// Runs one console command. Returns false when the client should exit.
async fn exec_console(
    line: &str,
    client: &NetClient,
    producer: &mut StateProducer<Walker>,
) -> bool {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("connect") => {
            let ok = match parts.next() {
                Some(target) => match target.rsplit_once(':') {
                    Some((host, port)) => match port.parse() {
                        Ok(port) => client.connect_to(host, port).await,
                        Err(_) => {
                            println!("Bad port: {port}");
                            return true;
                        }
                    },
                    None => {
                        println!("Usage: connect [host:port]");
                        return true;
                    }
                },
                None => client.connect().await,
            };
            println!("{}", if ok { "Connected." } else { "Connect failed." });
        }
        Some("disconnect") => client.disconnect(),
        Some("join") => {
            if !client.send_login().await {
                println!("Not connected.");
            }
        }
        Some("status") => {
            println!("Connection: {:?}", client.connection_state());
            println!("Join:       {:?}", client.join_status());
            println!("Player:     {}", client.local_player());
            println!("Sent:       {} samples", producer.sent());
        }
        Some("state") => {
            let s = client.authoritative_state();
            println!(
                "pos=({:.2}, {:.2}, {:.2}) rot=({:.1}, {:.1}, {:.1}) hp={}/{} alive={} (rev {})",
                s.position.x,
                s.position.y,
                s.position.z,
                s.rotation.x,
                s.rotation.y,
                s.rotation.z,
                s.health,
                s.max_health,
                s.connected,
                client.authoritative_revision(),
            );
        }
        Some("hp") => {
            let parsed = (
                parts.next().and_then(|v| v.parse::<f32>().ok()),
                parts.next().and_then(|v| v.parse::<f32>().ok()),
            );
            let (Some(health), Some(max_health)) = parsed else {
                println!("Usage: hp <health> <max>");
                return true;
            };
            producer.sampler_mut().health = health;
            let attributes = PlayerAttributes { health, max_health };
            if !client.push_player_attributes(attributes).await {
                println!("Not connected.");
            }
        }
        Some("quit") | Some("exit") => return false,
        Some(other) => println!("Unknown command: {other}"),
        None => {}
    }
    true
}

fn report(event: &ClientEvent) {
    match event {
        ClientEvent::Connected => println!("Connected to server."),
        ClientEvent::Disconnected { reason } => println!("Disconnected: {reason}"),
        ClientEvent::JoinAccepted(state) => println!(
            "Joined at ({:.2}, {:.2}, {:.2}) with {}/{} hp.",
            state.position.x, state.position.y, state.position.z, state.health, state.max_health
        ),
        ClientEvent::JoinFailed { reason } => println!("Join failed: {reason}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args {
        config,
        send_interval,
    } = parse_args()?;
    info!(
        server = %config.server_addr(),
        player = config.player_id,
        ?send_interval,
        "Starting client"
    );

    let client = NetClient::new(config);
    let mut events = client.subscribe_events();
    let mut producer = StateProducer::new(client.clone(), Walker::new());

    if !client.connect().await {
        warn!("Initial connect failed; use 'connect' to retry");
    }

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Type 'join' to enter the game, 'status' for info, 'quit' to exit.");

    let mut ticker = tokio::time::interval(send_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                producer.tick().await;
            }
            line = console_rx.recv() => {
                let Some(line) = line else { break };
                if !exec_console(&line, &client, &mut producer).await {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => report(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Dropped client events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    client.disconnect();
    info!(sent = producer.sent(), "Client stopped");
    Ok(())
}
