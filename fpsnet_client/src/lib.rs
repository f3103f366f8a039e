//! `fpsnet_client`
//!
//! Client side of the game connection:
//! - Connection management (one persistent TCP session)
//! - Message dispatch into the authoritative state store
//! - Heartbeats and liveness
//! - Outbound player-state production
//! - Join handshake

pub mod client;
pub mod dispatch;
pub mod event;
pub mod heartbeat;
pub mod join;
pub mod producer;
pub mod state;

pub use client::{ClientError, ConnectionState, NetClient};
pub use dispatch::{DispatchOutcome, Dispatcher, MessageHandler};
pub use event::{ClientEvent, DisconnectReason, JoinFailure};
pub use join::JoinStatus;
pub use producer::{PlayerSampler, StateProducer};
pub use state::AuthoritativeState;
