//! Client implementation.
//!
//! A [`NetClient`] is a cheap, clonable handle to one logical connection:
//! - At most one live TCP session at a time, numbered so that a stale task
//!   can only tear down its own session.
//! - One receive loop per session, the only reader of the socket.
//! - One heartbeat task per session, also enforcing the liveness window.
//! - All writers share the write half behind an async mutex held for a
//!   whole frame, so frames never interleave on the wire.
//!
//! Socket faults never escape: they end the session, flip the state to
//! `Disconnected` and are reported through [`ClientEvent`]s.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fpsnet_shared::{
    codec::{self, CodecError},
    config::{ClientConfig, PlayerId},
    protocol::{Message, PlayerAttributes, PlayerSnapshot, PROTOCOL_VERSION},
};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{broadcast, watch, Mutex as AsyncMutex},
    time::{self, Instant},
};
use tracing::{debug, info, trace, warn};

use crate::{
    dispatch::{DispatchContext, Dispatcher},
    event::{ClientEvent, DisconnectReason, JoinFailure},
    heartbeat::{HeartbeatAction, HeartbeatMonitor},
    join::{JoinStatus, JoinTracker},
    state::{AuthoritativeState, AuthoritativeStateStore},
};

/// Capacity of the event channel before slow subscribers lag.
const EVENT_CAPACITY: usize = 64;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live session.
    Disconnected,
    /// TCP connect in progress.
    Connecting,
    /// Session established; the receive loop is running.
    Connected,
}

/// Reasons a connect attempt fails.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },
}

type SharedWriter = Arc<AsyncMutex<OwnedWriteHalf>>;

struct Session {
    id: u64,
    writer: SharedWriter,
    /// Sending `true` (or dropping) stops the session's tasks.
    shutdown_tx: watch::Sender<bool>,
}

struct Inner {
    config: ClientConfig,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<Option<Session>>,
    /// Serializes connect attempts.
    connect_lock: AsyncMutex<()>,
    /// Bumped by every `disconnect()`; a connect that started under an
    /// older value is abandoned. Only changed with `session` held.
    disconnect_epoch: AtomicU64,
    next_session: AtomicU64,
    heartbeat: Mutex<HeartbeatMonitor>,
    dispatcher: Dispatcher,
    store: AuthoritativeStateStore,
    join: JoinTracker,
    events: broadcast::Sender<ClientEvent>,
}

/// Handle to the game server connection.
///
/// Construct once at startup and hand clones to whoever needs it. Call
/// [`disconnect`](Self::disconnect) before dropping the last handle; the
/// background tasks keep a live session open otherwise.
#[derive(Clone)]
pub struct NetClient {
    inner: Arc<Inner>,
}

impl NetClient {
    /// Creates a disconnected client with the default message handlers.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_dispatcher(config, Dispatcher::default())
    }

    /// Creates a disconnected client with a custom handler table.
    pub fn with_dispatcher(config: ClientConfig, dispatcher: Dispatcher) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let heartbeat = HeartbeatMonitor::new(
            config.heartbeat_interval(),
            config.heartbeat_grace,
            Instant::now(),
        );
        let store = AuthoritativeStateStore::new(config.player_id);

        Self {
            inner: Arc::new(Inner {
                config,
                state_tx,
                session: Mutex::new(None),
                connect_lock: AsyncMutex::new(()),
                disconnect_epoch: AtomicU64::new(0),
                next_session: AtomicU64::new(0),
                heartbeat: Mutex::new(heartbeat),
                dispatcher,
                store,
                join: JoinTracker::new(),
                events,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn local_player(&self) -> PlayerId {
        self.inner.config.player_id
    }

    // ─── Connection ───

    /// Connects to the configured server. See [`connect_to`](Self::connect_to).
    pub async fn connect(&self) -> bool {
        let cfg = &self.inner.config;
        self.connect_to(&cfg.server_host, cfg.server_port).await
    }

    /// Connects to `host:port`.
    ///
    /// Returns true when a session is live afterwards, including when one
    /// already was (no second socket is opened). Failures are logged and
    /// reported as false.
    pub async fn connect_to(&self, host: &str, port: u16) -> bool {
        let _guard = self.inner.connect_lock.lock().await;
        if self.is_connected() {
            debug!("Already connected");
            return true;
        }

        let epoch = self.inner.disconnect_epoch.load(Ordering::Acquire);
        self.inner.state_tx.send_replace(ConnectionState::Connecting);
        match self.open(host, port).await {
            Ok(stream) => self.start_session(stream, epoch),
            Err(e) => {
                warn!(error = %e, "Connect failed");
                self.inner
                    .state_tx
                    .send_replace(ConnectionState::Disconnected);
                false
            }
        }
    }

    async fn open(&self, host: &str, port: u16) -> Result<TcpStream, ClientError> {
        let addr = format!("{host}:{port}");
        let timeout = self.inner.config.connect_timeout();
        info!(server = %addr, protocol = PROTOCOL_VERSION, "Connecting to server");

        let stream = match time::timeout(timeout, TcpStream::connect(addr.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ClientError::Connect { addr, source }),
            Err(_) => return Err(ClientError::ConnectTimeout { addr, timeout }),
        };
        if let Err(source) = stream.set_nodelay(true) {
            return Err(ClientError::Connect { addr, source });
        }
        Ok(stream)
    }

    /// Installs the session unless a disconnect arrived after `epoch` was
    /// read, in which case the stream is closed and false returned.
    fn start_session(&self, stream: TcpStream, epoch: u64) -> bool {
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        {
            let mut slot = self.inner.session.lock();
            if self.inner.disconnect_epoch.load(Ordering::Acquire) != epoch {
                self.inner
                    .state_tx
                    .send_replace(ConnectionState::Disconnected);
                info!(peer = ?peer, "Connect cancelled by disconnect");
                return false;
            }
            self.inner.heartbeat.lock().reset(Instant::now());
            *slot = Some(Session {
                id,
                writer: Arc::new(AsyncMutex::new(writer)),
                shutdown_tx,
            });
            self.inner.state_tx.send_replace(ConnectionState::Connected);
            let _ = self.inner.events.send(ClientEvent::Connected);
        }
        info!(session = id, peer = ?peer, "Connected to server");

        tokio::spawn(receive_loop(
            Arc::clone(&self.inner),
            id,
            reader,
            shutdown_rx.clone(),
        ));
        tokio::spawn(heartbeat_loop(Arc::clone(&self.inner), id, shutdown_rx));
        true
    }

    /// Closes the current session, if any, or abandons a connect in
    /// progress. Idempotent and safe from any task, including concurrently
    /// with in-flight reads, writes and connects.
    pub fn disconnect(&self) {
        {
            let _slot = self.inner.session.lock();
            self.inner.disconnect_epoch.fetch_add(1, Ordering::AcqRel);
        }
        if self.inner.teardown(None, DisconnectReason::Requested) {
            return;
        }

        let slot = self.inner.session.lock();
        if slot.is_none() && self.connection_state() == ConnectionState::Connecting {
            self.inner
                .state_tx
                .send_replace(ConnectionState::Disconnected);
            debug!("Disconnect cancelled a connect in progress");
        } else {
            debug!("Disconnect requested with no live session");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Observes connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Observes [`ClientEvent`]s from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    // ─── Outbound ───

    /// Sends a join request for the local player and arms the join timeout.
    ///
    /// Returns false (and does nothing) while disconnected.
    pub async fn send_login(&self) -> bool {
        if !self.is_connected() {
            trace!("Not connected, skipping join request");
            return false;
        }

        // Open the window first: the reply may beat the write's return.
        let ticket = self.inner.join.begin();
        if !self
            .inner
            .send(Message::join_request(self.local_player()), None)
            .await
        {
            if self.inner.join.abandon() {
                let _ = self.inner.events.send(ClientEvent::JoinFailed {
                    reason: JoinFailure::Disconnected,
                });
            }
            return false;
        }
        info!(player = self.local_player(), "Join request sent");

        let inner = Arc::clone(&self.inner);
        let timeout = inner.config.join_timeout();
        tokio::spawn(async move {
            time::sleep(timeout).await;
            if inner.join.expire(ticket) {
                warn!(?timeout, "No join reply from server");
                let _ = inner.events.send(ClientEvent::JoinFailed {
                    reason: JoinFailure::Timeout,
                });
            }
        });
        true
    }

    /// Sends one player-state sample. A no-op returning false while
    /// disconnected.
    pub async fn push_player_state(&self, snapshot: PlayerSnapshot) -> bool {
        self.inner
            .send(Message::player_update(self.local_player(), snapshot), None)
            .await
    }

    /// Sends an attribute update. A no-op returning false while disconnected.
    pub async fn push_player_attributes(&self, attributes: PlayerAttributes) -> bool {
        self.inner
            .send(
                Message::attribute_update(self.local_player(), attributes),
                None,
            )
            .await
    }

    // ─── Inbound ───

    /// Last state the server announced for the local player.
    pub fn authoritative_state(&self) -> AuthoritativeState {
        self.inner.store.get()
    }

    /// Bumps on every accepted join reply; 0 means still at defaults.
    pub fn authoritative_revision(&self) -> u64 {
        self.inner.store.revision()
    }

    pub fn join_status(&self) -> JoinStatus {
        self.inner.join.status()
    }
}

impl Inner {
    fn dispatch_context(&self) -> DispatchContext<'_> {
        DispatchContext {
            local_player: self.config.player_id,
            store: &self.store,
            join: &self.join,
            events: &self.events,
        }
    }

    /// Writer and shutdown signal of the live session, optionally only if
    /// it is `session`.
    fn current_writer(
        &self,
        session: Option<u64>,
    ) -> Option<(u64, SharedWriter, watch::Receiver<bool>)> {
        let slot = self.session.lock();
        let s = slot.as_ref()?;
        if session.is_some_and(|id| id != s.id) {
            return None;
        }
        Some((s.id, Arc::clone(&s.writer), s.shutdown_tx.subscribe()))
    }

    /// Encodes `msg` and writes it as one frame under the writer lock.
    /// Returns false when the frame was not fully written. Ending the
    /// session abandons the wait for the lock and any partial write.
    async fn send(&self, msg: Message, session: Option<u64>) -> bool {
        let kind = msg.payload.kind_id();
        let Some((id, writer, mut shutdown)) = self.current_writer(session) else {
            trace!(kind, "Not connected, dropping outbound message");
            return false;
        };
        let frame = match codec::encode_message(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind, error = %e, "Failed to encode outbound message");
                return false;
            }
        };

        let write = async {
            let mut w = writer.lock().await;
            w.write_all(&frame).await
        };
        let result = tokio::select! {
            result = write => result,
            _ = stopped(&mut shutdown) => {
                debug!(session = id, kind, "Send abandoned, session closed");
                return false;
            }
        };
        match result {
            Ok(()) => {
                trace!(kind, bytes = frame.len(), "Frame sent");
                true
            }
            Err(e) => {
                warn!(kind, error = %e, "Send failed");
                self.teardown(Some(id), DisconnectReason::Io(e.to_string()));
                false
            }
        }
    }

    /// Ends the live session. With `only`, ends it only if it is that
    /// session. Returns whether a session was ended.
    fn teardown(&self, only: Option<u64>, reason: DisconnectReason) -> bool {
        let session = {
            let mut slot = self.session.lock();
            match slot.as_ref() {
                Some(s) if only.map_or(true, |id| id == s.id) => {}
                _ => return false,
            }
            let session = slot.take();
            self.state_tx.send_replace(ConnectionState::Disconnected);
            let _ = self.events.send(ClientEvent::Disconnected {
                reason: reason.clone(),
            });
            session
        };

        if let Some(session) = session {
            let _ = session.shutdown_tx.send(true);
            info!(session = session.id, %reason, "Disconnected");
        }
        if self.join.abandon() {
            let _ = self.events.send(ClientEvent::JoinFailed {
                reason: JoinFailure::Disconnected,
            });
        }
        true
    }
}

/// Reads frames until the stream fails or the session is shut down.
async fn receive_loop(
    inner: Arc<Inner>,
    session: u64,
    reader: OwnedReadHalf,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reader = BufReader::new(reader);
    loop {
        let result = tokio::select! {
            result = codec::read_message(&mut reader) => result,
            _ = shutdown.changed() => {
                debug!(session, "Receive loop stopped");
                return;
            }
        };

        match result {
            Ok(msg) => {
                inner.heartbeat.lock().record_received(Instant::now());
                inner.dispatcher.dispatch(msg, &inner.dispatch_context());
            }
            Err(e) => {
                let reason = match e {
                    CodecError::Closed => DisconnectReason::PeerClosed,
                    e if e.is_protocol_violation() => DisconnectReason::Protocol(e.to_string()),
                    e => DisconnectReason::Io(e.to_string()),
                };
                warn!(session, %reason, "Receive loop ended");
                inner.teardown(Some(session), reason);
                return;
            }
        }
    }
}

/// Sends heartbeats on schedule and drops the session on prolonged silence.
async fn heartbeat_loop(inner: Arc<Inner>, session: u64, mut shutdown: watch::Receiver<bool>) {
    loop {
        let deadline = inner.heartbeat.lock().next_deadline();
        tokio::select! {
            _ = sleep_until_some(deadline) => {}
            _ = shutdown.changed() => return,
        }

        let action = inner.heartbeat.lock().poll(Instant::now());
        match action {
            HeartbeatAction::Idle => {}
            HeartbeatAction::Send => {
                let msg = Message::heartbeat(inner.config.player_id);
                let send = inner.send(msg, Some(session));
                tokio::pin!(send);

                // A peer that stops reading can stall the write; keep
                // enforcing the silence limit while it is pending.
                let sent = loop {
                    let silent_at = inner.heartbeat.lock().silence_deadline();
                    tokio::select! {
                        sent = &mut send => break sent,
                        _ = sleep_until_some(silent_at) => {
                            if inner.heartbeat.lock().is_silent(Instant::now()) {
                                liveness_timeout(&inner, session);
                                return;
                            }
                        }
                    }
                };
                if !sent {
                    return;
                }
                trace!(session, "Heartbeat sent");
            }
            HeartbeatAction::TimedOut => {
                liveness_timeout(&inner, session);
                return;
            }
        }
    }
}

fn liveness_timeout(inner: &Inner, session: u64) {
    let silent_for = inner.heartbeat.lock().last_received().elapsed();
    warn!(session, ?silent_for, "Server silent past heartbeat grace");
    inner.teardown(Some(session), DisconnectReason::LivenessTimeout);
}

/// Resolves once the session is told to stop or its sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Sleeps until `deadline`; forever when there is none.
async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
