//! Application message model.
//!
//! A [`Message`] is what one frame carries: who sent it, when, and one
//! kind-specific [`Payload`]. The on-wire envelope lives in [`crate::codec`].

use serde::{Deserialize, Serialize};

use crate::{config::PlayerId, math::Vec3};

/// Wire protocol version. Bumped whenever the envelope or framing changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Player id used by the server when it speaks for itself.
pub const SERVER_PLAYER_ID: PlayerId = 0;

/// Known message kinds and their wire ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Liveness ping (client) or ack (server). No payload.
    Heartbeat,
    /// Client asks to join; carries only the sender id.
    PlayerJoinRequest,
    /// Server answers a join with the player's full state.
    PlayerJoinReply,
    /// Transform/velocity/health sample of one player.
    PlayerUpdate,
    /// Health and stat changes.
    PlayerAttributeUpdate,
    /// Full state of some player, outside the join handshake.
    PlayerState,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        MessageKind::Heartbeat,
        MessageKind::PlayerJoinRequest,
        MessageKind::PlayerJoinReply,
        MessageKind::PlayerUpdate,
        MessageKind::PlayerAttributeUpdate,
        MessageKind::PlayerState,
    ];

    pub const fn id(self) -> u32 {
        match self {
            MessageKind::Heartbeat => 1,
            MessageKind::PlayerJoinRequest => 2,
            MessageKind::PlayerJoinReply => 3,
            MessageKind::PlayerUpdate => 4,
            MessageKind::PlayerAttributeUpdate => 5,
            MessageKind::PlayerState => 6,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.id() == id)
    }
}

/// Outbound sample of the local player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PlayerSnapshot {
    pub position: Vec3,
    /// Euler angles in degrees.
    pub rotation: Vec3,
    pub velocity: Vec3,
    pub grounded: bool,
    pub health: f32,
}

/// Health and stats.
///
/// New stat fields must carry `#[serde(default)]` so older peers still decode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerAttributes {
    pub health: f32,
    pub max_health: f32,
}

impl Default for PlayerAttributes {
    fn default() -> Self {
        Self {
            health: 100.0,
            max_health: 100.0,
        }
    }
}

/// Full player state as announced by the server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PlayerState {
    pub position: Vec3,
    /// Euler angles in degrees.
    pub rotation: Vec3,
    #[serde(default)]
    pub velocity: Vec3,
    #[serde(default)]
    pub grounded: bool,
    pub attributes: PlayerAttributes,
    pub alive: bool,
}

/// Kind-specific message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Heartbeat,
    PlayerJoinRequest,
    PlayerJoinReply(PlayerState),
    PlayerUpdate(PlayerSnapshot),
    PlayerAttributeUpdate(PlayerAttributes),
    PlayerState(PlayerState),
    /// A kind id this build does not know. The body is discarded.
    Unknown { kind: u32 },
}

impl Payload {
    /// `None` for [`Payload::Unknown`].
    pub fn kind(&self) -> Option<MessageKind> {
        Some(match self {
            Payload::Heartbeat => MessageKind::Heartbeat,
            Payload::PlayerJoinRequest => MessageKind::PlayerJoinRequest,
            Payload::PlayerJoinReply(_) => MessageKind::PlayerJoinReply,
            Payload::PlayerUpdate(_) => MessageKind::PlayerUpdate,
            Payload::PlayerAttributeUpdate(_) => MessageKind::PlayerAttributeUpdate,
            Payload::PlayerState(_) => MessageKind::PlayerState,
            Payload::Unknown { .. } => return None,
        })
    }

    /// Numeric wire id, including unknown ones.
    pub fn kind_id(&self) -> u32 {
        match self {
            Payload::Unknown { kind } => *kind,
            known => known.kind().map(MessageKind::id).unwrap_or_default(),
        }
    }
}

/// Decoded application message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub player_id: PlayerId,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub payload: Payload,
}

impl Message {
    /// Builds a message stamped with the current time.
    pub fn now(player_id: PlayerId, payload: Payload) -> Self {
        Self {
            player_id,
            timestamp: unix_timestamp(),
            payload,
        }
    }

    pub fn heartbeat(player_id: PlayerId) -> Self {
        Self::now(player_id, Payload::Heartbeat)
    }

    pub fn join_request(player_id: PlayerId) -> Self {
        Self::now(player_id, Payload::PlayerJoinRequest)
    }

    pub fn join_reply(player_id: PlayerId, state: PlayerState) -> Self {
        Self::now(player_id, Payload::PlayerJoinReply(state))
    }

    pub fn player_update(player_id: PlayerId, snapshot: PlayerSnapshot) -> Self {
        Self::now(player_id, Payload::PlayerUpdate(snapshot))
    }

    pub fn attribute_update(player_id: PlayerId, attributes: PlayerAttributes) -> Self {
        Self::now(player_id, Payload::PlayerAttributeUpdate(attributes))
    }

    pub fn kind(&self) -> Option<MessageKind> {
        self.payload.kind()
    }
}

/// Current time as whole seconds since the Unix epoch.
pub fn unix_timestamp() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_ids_are_unique_and_reversible() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(MessageKind::from_id(0), None);
        assert_eq!(MessageKind::from_id(99), None);
    }

    #[test]
    fn unknown_payload_keeps_its_id() {
        let payload = Payload::Unknown { kind: 42 };
        assert_eq!(payload.kind(), None);
        assert_eq!(payload.kind_id(), 42);
        assert_eq!(Payload::Heartbeat.kind_id(), 1);
    }

    #[test]
    fn constructors_stamp_sender_and_time() {
        let msg = Message::join_request(5);
        assert_eq!(msg.player_id, 5);
        assert_eq!(msg.kind(), Some(MessageKind::PlayerJoinRequest));
        assert!(msg.timestamp > 1_600_000_000);
    }

    #[test]
    fn player_state_tolerates_missing_optional_fields() {
        let json = r#"{
            "position": {"x": 1.0, "y": 2.0, "z": 3.0},
            "rotation": {"x": 0.0, "y": 90.0, "z": 0.0},
            "attributes": {"health": 80.0, "max_health": 100.0},
            "alive": true
        }"#;
        let state: PlayerState = serde_json::from_str(json).unwrap();
        assert_eq!(state.velocity, Vec3::ZERO);
        assert!(!state.grounded);
        assert_eq!(state.attributes.health, 80.0);
    }
}
