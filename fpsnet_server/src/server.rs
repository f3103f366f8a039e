//! Development server.
//!
//! Speaks the client protocol well enough to exercise it locally:
//! - Accepts any number of clients, one task per connection
//! - Acknowledges heartbeats
//! - Answers join requests with a configured or random spawn state
//! - Records the latest snapshot and attributes pushed by each player
//! - Counts received messages per kind
//!
//! There is no simulation and no fan-out between clients.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::Context;
use fpsnet_shared::{
    codec::{self, CodecError},
    config::PlayerId,
    math::Vec3,
    protocol::{
        Message, MessageKind, Payload, PlayerAttributes, PlayerSnapshot, PlayerState,
        PROTOCOL_VERSION, SERVER_PLAYER_ID,
    },
};
use parking_lot::Mutex;
use rand::Rng;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Half-extent of the square random spawn points are drawn from.
const SPAWN_EXTENT: f32 = 50.0;

/// Behaviour switches, mostly for tests.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Reply to every heartbeat with a heartbeat.
    pub ack_heartbeats: bool,
    /// Reply to join requests.
    pub answer_joins: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            ack_heartbeats: true,
            answer_joins: true,
        }
    }
}

/// What the server knows about one player.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerRecord {
    pub joined: bool,
    pub snapshot: Option<PlayerSnapshot>,
    pub attributes: Option<PlayerAttributes>,
    pub updates: u64,
}

#[derive(Default)]
struct Shared {
    options: ServerOptions,
    spawns: Mutex<HashMap<PlayerId, PlayerState>>,
    players: Mutex<HashMap<PlayerId, PlayerRecord>>,
    received: Mutex<HashMap<u32, u64>>,
    active: AtomicUsize,
    accepted: AtomicUsize,
}

/// Inspection and control handle; cheap to clone.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
}

/// Development server bound to a TCP listener.
pub struct DevServer {
    listener: TcpListener,
    handle: ServerHandle,
}

impl DevServer {
    pub async fn bind(addr: &str) -> anyhow::Result<Self> {
        Self::bind_with(addr, ServerOptions::default()).await
    }

    /// Binds `127.0.0.1:0`.
    pub async fn bind_ephemeral() -> anyhow::Result<Self> {
        Self::bind("127.0.0.1:0").await
    }

    pub async fn bind_with(addr: &str, options: ServerOptions) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        let local_addr = listener.local_addr().context("local_addr")?;
        Ok(Self {
            listener,
            handle: ServerHandle {
                shared: Arc::new(Shared {
                    options,
                    ..Shared::default()
                }),
                local_addr,
            },
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Runs the accept loop on a background task.
    pub fn spawn(self) -> (ServerHandle, JoinHandle<anyhow::Result<()>>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Accepts clients until the listener fails.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            addr = %self.handle.local_addr,
            protocol = PROTOCOL_VERSION,
            "Server listening"
        );
        loop {
            let (stream, peer) = self.listener.accept().await.context("accept")?;
            let shared = Arc::clone(&self.handle.shared);
            shared.accepted.fetch_add(1, Ordering::Relaxed);
            shared.active.fetch_add(1, Ordering::Relaxed);
            info!(%peer, "Client connected");

            tokio::spawn(async move {
                match serve_connection(&shared, stream).await {
                    Ok(()) => info!(%peer, "Client disconnected"),
                    Err(e) => warn!(%peer, error = %format!("{e:#}"), "Client dropped"),
                }
                shared.active.fetch_sub(1, Ordering::Relaxed);
            });
        }
    }
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// State to send when `player` joins, instead of a random spawn.
    pub fn set_spawn_state(&self, player: PlayerId, state: PlayerState) {
        self.shared.spawns.lock().insert(player, state);
    }

    pub fn player(&self, player: PlayerId) -> Option<PlayerRecord> {
        self.shared.players.lock().get(&player).cloned()
    }

    /// Messages of `kind` received across all connections.
    pub fn received(&self, kind: MessageKind) -> u64 {
        self.received_id(kind.id())
    }

    /// Same as [`received`](Self::received), by raw kind id.
    pub fn received_id(&self, kind: u32) -> u64 {
        self.shared.received.lock().get(&kind).copied().unwrap_or(0)
    }

    /// Connections currently open.
    pub fn active_connections(&self) -> usize {
        self.shared.active.load(Ordering::Relaxed)
    }

    /// Connections accepted since start.
    pub fn accepted_connections(&self) -> usize {
        self.shared.accepted.load(Ordering::Relaxed)
    }
}

async fn serve_connection(shared: &Shared, stream: TcpStream) -> anyhow::Result<()> {
    stream.set_nodelay(true).context("set_nodelay")?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let msg = match codec::read_message(&mut reader).await {
            Ok(msg) => msg,
            Err(CodecError::Closed) => return Ok(()),
            Err(e) => return Err(e).context("read frame"),
        };
        if let Some(reply) = shared.handle_message(msg) {
            codec::write_message(&mut writer, &reply)
                .await
                .context("write reply")?;
        }
    }
}

impl Shared {
    /// Records one message and returns the reply, if any.
    fn handle_message(&self, msg: Message) -> Option<Message> {
        let kind = msg.payload.kind_id();
        *self.received.lock().entry(kind).or_default() += 1;

        let player = msg.player_id;
        match msg.payload {
            Payload::Heartbeat => {
                debug!(player, "Heartbeat");
                self.options
                    .ack_heartbeats
                    .then(|| Message::heartbeat(SERVER_PLAYER_ID))
            }
            Payload::PlayerJoinRequest => {
                if !self.options.answer_joins {
                    debug!(player, "Ignoring join request");
                    return None;
                }
                let state = self.spawn_state(player);
                self.players.lock().entry(player).or_default().joined = true;
                info!(
                    player,
                    x = state.position.x,
                    y = state.position.y,
                    z = state.position.z,
                    health = state.attributes.health,
                    "Player joined"
                );
                Some(Message::join_reply(player, state))
            }
            Payload::PlayerUpdate(snapshot) => {
                let mut players = self.players.lock();
                let record = players.entry(player).or_default();
                record.snapshot = Some(snapshot);
                record.updates += 1;
                None
            }
            Payload::PlayerAttributeUpdate(attributes) => {
                debug!(
                    player,
                    health = attributes.health,
                    max_health = attributes.max_health,
                    "Attributes"
                );
                self.players.lock().entry(player).or_default().attributes = Some(attributes);
                None
            }
            Payload::PlayerJoinReply(_) | Payload::PlayerState(_) => {
                warn!(player, kind, "Unexpected client-bound message");
                None
            }
            Payload::Unknown { .. } => {
                warn!(player, kind, "Unknown message kind");
                None
            }
        }
    }

    fn spawn_state(&self, player: PlayerId) -> PlayerState {
        if let Some(state) = self.spawns.lock().get(&player) {
            return *state;
        }
        random_spawn()
    }
}

/// A random point on the ground plane at full health.
fn random_spawn() -> PlayerState {
    let mut rng = rand::thread_rng();
    PlayerState {
        position: Vec3::new(
            rng.gen_range(-SPAWN_EXTENT..SPAWN_EXTENT),
            0.0,
            rng.gen_range(-SPAWN_EXTENT..SPAWN_EXTENT),
        ),
        rotation: Vec3::new(0.0, rng.gen_range(0.0..360.0), 0.0),
        velocity: Vec3::ZERO,
        grounded: true,
        attributes: PlayerAttributes::default(),
        alive: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeats_are_acked() {
        let shared = Shared::default();
        let reply = shared.handle_message(Message::heartbeat(4)).unwrap();
        assert_eq!(reply.player_id, SERVER_PLAYER_ID);
        assert_eq!(reply.payload, Payload::Heartbeat);
        assert_eq!(shared.received.lock()[&MessageKind::Heartbeat.id()], 1);
    }

    #[test]
    fn join_uses_configured_spawn() {
        let shared = Shared::default();
        let state = PlayerState {
            position: Vec3::new(1.0, 2.0, 3.0),
            attributes: PlayerAttributes {
                health: 80.0,
                max_health: 100.0,
            },
            alive: true,
            ..PlayerState::default()
        };
        shared.spawns.lock().insert(1, state);

        let reply = shared.handle_message(Message::join_request(1)).unwrap();
        assert_eq!(reply.player_id, 1);
        assert_eq!(reply.payload, Payload::PlayerJoinReply(state));
        assert!(shared.players.lock()[&1].joined);
    }

    #[test]
    fn random_spawn_is_alive_and_in_bounds() {
        let shared = Shared::default();
        let reply = shared.handle_message(Message::join_request(2)).unwrap();
        let Payload::PlayerJoinReply(state) = reply.payload else {
            panic!("expected join reply");
        };
        assert!(state.alive);
        assert_eq!(state.attributes, PlayerAttributes::default());
        assert!(state.position.x.abs() <= SPAWN_EXTENT);
        assert!(state.position.z.abs() <= SPAWN_EXTENT);
    }

    #[test]
    fn updates_are_recorded_without_reply() {
        let shared = Shared::default();
        let snapshot = PlayerSnapshot {
            position: Vec3::new(5.0, 0.0, 5.0),
            health: 90.0,
            ..PlayerSnapshot::default()
        };
        assert!(shared
            .handle_message(Message::player_update(3, snapshot))
            .is_none());
        assert!(shared
            .handle_message(Message::attribute_update(3, PlayerAttributes::default()))
            .is_none());

        let record = shared.players.lock()[&3].clone();
        assert_eq!(record.snapshot, Some(snapshot));
        assert_eq!(record.attributes, Some(PlayerAttributes::default()));
        assert_eq!(record.updates, 1);
        assert!(!record.joined);
    }

    #[test]
    fn silent_options_suppress_replies() {
        let shared = Shared {
            options: ServerOptions {
                ack_heartbeats: false,
                answer_joins: false,
            },
            ..Shared::default()
        };
        assert!(shared.handle_message(Message::heartbeat(1)).is_none());
        assert!(shared.handle_message(Message::join_request(1)).is_none());
        assert_eq!(shared.received.lock().len(), 2);
    }
}
