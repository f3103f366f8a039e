//! Authoritative state store.
//!
//! Holds the server's last word about the local player. It is written only
//! by the join-reply handler and read by gameplay once its world is ready.
//! A disconnect leaves the last values in place; callers decide when they
//! are stale.

use fpsnet_shared::{
    config::PlayerId,
    math::Vec3,
    protocol::PlayerState,
};
use parking_lot::RwLock;

/// Server-declared state of the local player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuthoritativeState {
    pub player_id: PlayerId,
    pub position: Vec3,
    /// Euler angles in degrees.
    pub rotation: Vec3,
    pub velocity: Vec3,
    pub grounded: bool,
    pub health: f32,
    pub max_health: f32,
    /// Set from the server's alive flag on the last accepted join reply.
    pub connected: bool,
}

impl AuthoritativeState {
    /// Full health at the origin, not connected.
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            velocity: Vec3::ZERO,
            grounded: false,
            health: 100.0,
            max_health: 100.0,
            connected: false,
        }
    }

    /// Builds the full replacement state from a join reply.
    pub fn from_join_reply(player_id: PlayerId, state: &PlayerState) -> Self {
        Self {
            player_id,
            position: state.position,
            rotation: state.rotation,
            velocity: state.velocity,
            grounded: state.grounded,
            health: state.attributes.health,
            max_health: state.attributes.max_health,
            connected: state.alive,
        }
    }
}

/// Single-slot store for [`AuthoritativeState`].
#[derive(Debug)]
pub struct AuthoritativeStateStore {
    slot: RwLock<Slot>,
}

#[derive(Debug)]
struct Slot {
    state: AuthoritativeState,
    revision: u64,
}

impl AuthoritativeStateStore {
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            slot: RwLock::new(Slot {
                state: AuthoritativeState::new(player_id),
                revision: 0,
            }),
        }
    }

    /// Copy of the current state.
    pub fn get(&self) -> AuthoritativeState {
        self.slot.read().state
    }

    /// Number of replacements so far; 0 means still at defaults.
    pub fn revision(&self) -> u64 {
        self.slot.read().revision
    }

    /// Replaces the whole state and returns the new revision.
    pub fn replace(&self, state: AuthoritativeState) -> u64 {
        let mut slot = self.slot.write();
        slot.state = state;
        slot.revision += 1;
        slot.revision
    }
}
