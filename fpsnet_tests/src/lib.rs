//! Shared helpers for the socket-level integration tests.
//!
//! [`ScriptedPeer`] stands in for the server when a test needs exact
//! control over what goes on the wire; [`fpsnet_server::DevServer`] covers
//! the rest.

use std::{net::SocketAddr, time::Duration};

use anyhow::{bail, Context};
use fpsnet_client::ClientEvent;
use fpsnet_shared::{
    codec::{self, CodecError},
    config::{ClientConfig, PlayerId},
    protocol::Message,
};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::broadcast,
    time,
};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Client settings pointed at `addr` with test-friendly timeouts.
pub fn client_config(addr: SocketAddr, player_id: PlayerId) -> ClientConfig {
    ClientConfig {
        server_host: addr.ip().to_string(),
        server_port: addr.port(),
        player_id,
        connect_timeout_secs: 2.0,
        ..ClientConfig::default()
    }
}

/// A port nothing is listening on.
pub async fn unused_addr() -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?)
}

/// Waits for the first event matching `pred`, skipping the rest.
pub async fn expect_event<F>(
    events: &mut broadcast::Receiver<ClientEvent>,
    mut pred: F,
) -> anyhow::Result<ClientEvent>
where
    F: FnMut(&ClientEvent) -> bool,
{
    let deadline = time::Instant::now() + WAIT;
    loop {
        let event = time::timeout_at(deadline, events.recv())
            .await
            .context("timed out waiting for client event")??;
        if pred(&event) {
            return Ok(event);
        }
    }
}

/// Polls `cond` until it holds or [`WAIT`] elapses.
pub async fn wait_until<F>(what: &str, mut cond: F) -> anyhow::Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = time::Instant::now() + WAIT;
    while !cond() {
        if time::Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// Raw listener playing the server side, frame by frame.
pub struct ScriptedPeer {
    listener: TcpListener,
}

impl ScriptedPeer {
    pub async fn bind() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind scripted peer")?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn accept(&self) -> anyhow::Result<PeerConn> {
        let (stream, _) = time::timeout(WAIT, self.listener.accept())
            .await
            .context("timed out waiting for client")??;
        Ok(PeerConn { stream })
    }
}

/// One accepted client connection.
pub struct PeerConn {
    stream: TcpStream,
}

impl PeerConn {
    pub async fn send(&mut self, msg: &Message) -> anyhow::Result<()> {
        codec::write_message(&mut self.stream, msg).await?;
        Ok(())
    }

    /// Writes raw bytes, bypassing the encoder.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> anyhow::Result<Message> {
        let msg = time::timeout(WAIT, codec::read_message(&mut self.stream))
            .await
            .context("timed out waiting for frame")??;
        Ok(msg)
    }

    /// Next message, or `None` if nothing arrives within `window`.
    pub async fn recv_within(&mut self, window: Duration) -> anyhow::Result<Option<Message>> {
        match time::timeout(window, codec::read_message(&mut self.stream)).await {
            Err(_) => Ok(None),
            Ok(result) => Ok(Some(result?)),
        }
    }

    /// True once the client has closed its side.
    pub async fn closed_by_client(&mut self) -> anyhow::Result<bool> {
        loop {
            match time::timeout(WAIT, codec::read_message(&mut self.stream)).await {
                Err(_) => return Ok(false),
                // A write abandoned mid-frame leaves a truncated tail.
                Ok(Err(
                    CodecError::Closed | CodecError::Io(_) | CodecError::Truncated { .. },
                )) => return Ok(true),
                Ok(Err(e)) => return Err(e.into()),
                // Drain frames sent before the close.
                Ok(Ok(_)) => continue,
            }
        }
    }

    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
