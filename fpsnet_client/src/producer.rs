//! Outbound state producer.
//!
//! Gameplay owns the local player and the send cadence; it exposes the
//! player through [`PlayerSampler`] and calls [`StateProducer::tick`] when a
//! sample should go out.

use fpsnet_shared::protocol::PlayerSnapshot;
use tracing::trace;

use crate::client::NetClient;

/// Read-only view of the local player.
pub trait PlayerSampler {
    /// Current transform, velocity, grounded flag and health.
    fn sample(&self) -> PlayerSnapshot;
}

impl<F> PlayerSampler for F
where
    F: Fn() -> PlayerSnapshot,
{
    fn sample(&self) -> PlayerSnapshot {
        self()
    }
}

/// Samples a player and pushes the result through a client.
pub struct StateProducer<S> {
    client: NetClient,
    sampler: S,
    sent: u64,
}

impl<S: PlayerSampler> StateProducer<S> {
    pub fn new(client: NetClient, sampler: S) -> Self {
        Self {
            client,
            sampler,
            sent: 0,
        }
    }

    /// Samples once and sends. Returns whether a frame was written; while
    /// disconnected nothing is sampled or sent.
    pub async fn tick(&mut self) -> bool {
        if !self.client.is_connected() {
            trace!("Skipping state sample while disconnected");
            return false;
        }
        let snapshot = self.sampler.sample();
        let sent = self.client.push_player_state(snapshot).await;
        if sent {
            self.sent += 1;
        }
        sent
    }

    /// Samples successfully sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    pub fn sampler_mut(&mut self) -> &mut S {
        &mut self.sampler
    }
}
