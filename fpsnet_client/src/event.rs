//! Events the client reports to gameplay code.
//!
//! Delivered over a `tokio::sync::broadcast` channel; see
//! [`crate::NetClient::subscribe_events`]. Slow subscribers may observe
//! `RecvError::Lagged` and should re-read the client's current state.

use std::fmt;

use crate::state::AuthoritativeState;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    Requested,
    /// The server closed the stream between frames.
    PeerClosed,
    /// Framing rules were broken (oversized, truncated or malformed frame).
    Protocol(String),
    /// A read or write failed.
    Io(String),
    /// Nothing arrived for longer than the heartbeat grace window.
    LivenessTimeout,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => f.write_str("disconnect requested"),
            DisconnectReason::PeerClosed => f.write_str("server closed the connection"),
            DisconnectReason::Protocol(e) => write!(f, "protocol error: {e}"),
            DisconnectReason::Io(e) => write!(f, "i/o error: {e}"),
            DisconnectReason::LivenessTimeout => f.write_str("server went silent"),
        }
    }
}

/// Why a join attempt did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinFailure {
    /// No reply within the configured join timeout.
    Timeout,
    /// The connection dropped while the join was pending.
    Disconnected,
}

impl fmt::Display for JoinFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinFailure::Timeout => f.write_str("join reply timed out"),
            JoinFailure::Disconnected => f.write_str("disconnected before join reply"),
        }
    }
}

/// Something gameplay code may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected { reason: DisconnectReason },
    /// The server accepted the join; the store now holds this state.
    JoinAccepted(AuthoritativeState),
    JoinFailed { reason: JoinFailure },
}
