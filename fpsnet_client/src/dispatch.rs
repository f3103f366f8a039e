//! Message routing: dispatch decoded messages to kind-specific handlers.
//!
//! The [`Dispatcher`] maps [`MessageKind`] values to [`MessageHandler`]
//! implementations. New kinds are supported by registering a handler; the
//! routing itself never changes. Anything without a handler is logged and
//! dropped; the connection stays up.

use std::collections::HashMap;
use std::fmt;

use fpsnet_shared::{
    config::PlayerId,
    protocol::{Message, MessageKind, Payload},
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    event::ClientEvent,
    join::JoinTracker,
    state::{AuthoritativeState, AuthoritativeStateStore},
};

// ---------------------------------------------------------------------------
// Context and outcome
// ---------------------------------------------------------------------------

/// Client-side state a handler may touch.
pub struct DispatchContext<'a> {
    pub local_player: PlayerId,
    pub store: &'a AuthoritativeStateStore,
    pub join: &'a JoinTracker,
    pub events: &'a broadcast::Sender<ClientEvent>,
}

/// Why a message was not acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The kind id is not part of this protocol build.
    UnknownKind(u32),
    /// Known kind, but nothing registered for it.
    NoHandler(MessageKind),
    /// A join reply addressed to another player.
    ForeignPlayer { expected: PlayerId, got: PlayerId },
    /// The payload did not match what the handler expects.
    UnexpectedPayload(MessageKind),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::UnknownKind(id) => write!(f, "unknown message kind {id}"),
            DropReason::NoHandler(kind) => write!(f, "no handler for {kind:?}"),
            DropReason::ForeignPlayer { expected, got } => {
                write!(f, "reply for player {got}, local player is {expected}")
            }
            DropReason::UnexpectedPayload(kind) => write!(f, "unexpected payload for {kind:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    Dropped(DropReason),
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Processes one kind of message. Each message is handed over by value,
/// exactly once.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, msg: Message, ctx: &DispatchContext<'_>) -> DispatchOutcome;
}

/// Blanket implementation for closures and plain functions.
impl<F> MessageHandler for F
where
    F: Fn(Message, &DispatchContext<'_>) -> DispatchOutcome + Send + Sync,
{
    fn handle(&self, msg: Message, ctx: &DispatchContext<'_>) -> DispatchOutcome {
        self(msg, ctx)
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Routes messages to registered handlers by [`MessageKind`].
pub struct Dispatcher {
    handlers: HashMap<MessageKind, Box<dyn MessageHandler>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}

impl Dispatcher {
    /// A dispatcher with no handlers; every message is dropped.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The handler set the client runs with.
    pub fn with_default_handlers() -> Self {
        let mut d = Self::empty();
        d.register(MessageKind::Heartbeat, on_heartbeat_ack);
        d.register(MessageKind::PlayerUpdate, on_player_update);
        d.register(MessageKind::PlayerAttributeUpdate, on_player_attributes);
        d.register(MessageKind::PlayerState, on_player_state);
        d.register(MessageKind::PlayerJoinReply, on_join_reply);
        d
    }

    /// Registers (or replaces) the handler for `kind`.
    pub fn register<H: MessageHandler + 'static>(&mut self, kind: MessageKind, handler: H) {
        self.handlers.insert(kind, Box::new(handler));
    }

    /// Routes one message. Drops are logged here, never escalated.
    pub fn dispatch(&self, msg: Message, ctx: &DispatchContext<'_>) -> DispatchOutcome {
        let outcome = match msg.kind() {
            None => DispatchOutcome::Dropped(DropReason::UnknownKind(msg.payload.kind_id())),
            Some(kind) => match self.handlers.get(&kind) {
                Some(handler) => handler.handle(msg, ctx),
                None => DispatchOutcome::Dropped(DropReason::NoHandler(kind)),
            },
        };
        if let DispatchOutcome::Dropped(reason) = &outcome {
            warn!(%reason, "Dropping message");
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Default handlers
// ---------------------------------------------------------------------------

fn on_heartbeat_ack(msg: Message, _ctx: &DispatchContext<'_>) -> DispatchOutcome {
    debug!(timestamp = msg.timestamp, "Heartbeat ack");
    DispatchOutcome::Handled
}

fn on_player_update(msg: Message, _ctx: &DispatchContext<'_>) -> DispatchOutcome {
    match msg.payload {
        Payload::PlayerUpdate(s) => {
            debug!(
                player = msg.player_id,
                x = s.position.x,
                y = s.position.y,
                z = s.position.z,
                "Player update"
            );
            DispatchOutcome::Handled
        }
        _ => DispatchOutcome::Dropped(DropReason::UnexpectedPayload(MessageKind::PlayerUpdate)),
    }
}

fn on_player_attributes(msg: Message, _ctx: &DispatchContext<'_>) -> DispatchOutcome {
    match msg.payload {
        Payload::PlayerAttributeUpdate(a) => {
            debug!(
                player = msg.player_id,
                health = a.health,
                max_health = a.max_health,
                "Player attributes"
            );
            DispatchOutcome::Handled
        }
        _ => DispatchOutcome::Dropped(DropReason::UnexpectedPayload(
            MessageKind::PlayerAttributeUpdate,
        )),
    }
}

fn on_player_state(msg: Message, _ctx: &DispatchContext<'_>) -> DispatchOutcome {
    match msg.payload {
        Payload::PlayerState(s) => {
            debug!(player = msg.player_id, alive = s.alive, "Player state");
            DispatchOutcome::Handled
        }
        _ => DispatchOutcome::Dropped(DropReason::UnexpectedPayload(MessageKind::PlayerState)),
    }
}

/// Replaces the authoritative state when the reply is addressed to us.
fn on_join_reply(msg: Message, ctx: &DispatchContext<'_>) -> DispatchOutcome {
    if msg.player_id != ctx.local_player {
        return DispatchOutcome::Dropped(DropReason::ForeignPlayer {
            expected: ctx.local_player,
            got: msg.player_id,
        });
    }
    let Payload::PlayerJoinReply(reply) = msg.payload else {
        return DispatchOutcome::Dropped(DropReason::UnexpectedPayload(
            MessageKind::PlayerJoinReply,
        ));
    };

    let state = AuthoritativeState::from_join_reply(msg.player_id, &reply);
    let revision = ctx.store.replace(state);
    ctx.join.complete();
    info!(
        player = state.player_id,
        health = state.health,
        max_health = state.max_health,
        revision,
        "Join accepted, authoritative state updated"
    );
    // No subscribers is fine.
    let _ = ctx.events.send(ClientEvent::JoinAccepted(state));
    DispatchOutcome::Handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpsnet_shared::{
        math::Vec3,
        protocol::{PlayerAttributes, PlayerState},
    };
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use crate::join::JoinStatus;

    struct Fixture {
        store: AuthoritativeStateStore,
        join: JoinTracker,
        events: broadcast::Sender<ClientEvent>,
    }

    impl Fixture {
        fn new() -> Self {
            let (events, _) = broadcast::channel(8);
            Self {
                store: AuthoritativeStateStore::new(1),
                join: JoinTracker::new(),
                events,
            }
        }

        fn ctx(&self) -> DispatchContext<'_> {
            DispatchContext {
                local_player: 1,
                store: &self.store,
                join: &self.join,
                events: &self.events,
            }
        }
    }

    fn reply_state(health: f32, position: Vec3) -> PlayerState {
        PlayerState {
            position,
            rotation: Vec3::ZERO,
            velocity: Vec3::ZERO,
            grounded: true,
            attributes: PlayerAttributes {
                health,
                max_health: 100.0,
            },
            alive: true,
        }
    }

    #[test]
    fn join_reply_for_local_player_replaces_state() {
        let fx = Fixture::new();
        let mut events = fx.events.subscribe();
        fx.join.begin();

        let outcome = Dispatcher::default().dispatch(
            Message::join_reply(1, reply_state(80.0, Vec3::new(1.0, 2.0, 3.0))),
            &fx.ctx(),
        );

        assert_eq!(outcome, DispatchOutcome::Handled);
        let state = fx.store.get();
        assert_eq!(state.health, 80.0);
        assert_eq!(state.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(fx.join.status(), JoinStatus::Joined);
        assert_eq!(events.try_recv().unwrap(), ClientEvent::JoinAccepted(state));
    }

    #[test]
    fn join_reply_for_other_player_is_dropped() {
        let fx = Fixture::new();
        fx.join.begin();
        let before = fx.store.get();

        let outcome = Dispatcher::default().dispatch(
            Message::join_reply(2, reply_state(10.0, Vec3::new(9.0, 9.0, 9.0))),
            &fx.ctx(),
        );

        assert_eq!(
            outcome,
            DispatchOutcome::Dropped(DropReason::ForeignPlayer {
                expected: 1,
                got: 2
            })
        );
        assert_eq!(fx.store.get(), before);
        assert_eq!(fx.store.revision(), 0);
        assert_eq!(fx.join.status(), JoinStatus::Pending);
    }

    #[test]
    fn unknown_kind_is_dropped_quietly() {
        let fx = Fixture::new();
        let outcome = Dispatcher::default()
            .dispatch(Message::now(1, Payload::Unknown { kind: 250 }), &fx.ctx());
        assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::UnknownKind(250)));
    }

    #[test]
    fn other_kinds_never_touch_the_store() {
        let fx = Fixture::new();
        let d = Dispatcher::default();
        let ctx = fx.ctx();

        assert_eq!(d.dispatch(Message::heartbeat(0), &ctx), DispatchOutcome::Handled);
        assert_eq!(
            d.dispatch(
                Message::now(1, Payload::PlayerState(reply_state(5.0, Vec3::ZERO))),
                &ctx
            ),
            DispatchOutcome::Handled
        );
        assert_eq!(
            d.dispatch(
                Message::attribute_update(
                    1,
                    PlayerAttributes {
                        health: 1.0,
                        max_health: 1.0
                    }
                ),
                &ctx
            ),
            DispatchOutcome::Handled
        );
        assert_eq!(fx.store.revision(), 0);
    }

    #[test]
    fn join_request_has_no_client_handler() {
        let fx = Fixture::new();
        let outcome = Dispatcher::default().dispatch(Message::join_request(1), &fx.ctx());
        assert_eq!(
            outcome,
            DispatchOutcome::Dropped(DropReason::NoHandler(MessageKind::PlayerJoinRequest))
        );
    }

    struct Counter(Arc<AtomicUsize>);

    impl MessageHandler for Counter {
        fn handle(&self, _msg: Message, _ctx: &DispatchContext<'_>) -> DispatchOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            DispatchOutcome::Handled
        }
    }

    #[test]
    fn registered_handler_receives_each_message() {
        let fx = Fixture::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let mut d = Dispatcher::empty();
        d.register(MessageKind::Heartbeat, Counter(Arc::clone(&seen)));

        d.dispatch(Message::heartbeat(0), &fx.ctx());
        d.dispatch(Message::heartbeat(0), &fx.ctx());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
