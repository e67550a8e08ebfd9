//! Pure message dispatch for authenticated sessions.
//!
//! Each inbound client message maps to a set of room membership changes and
//! outgoing broadcasts. No sockets, no locks: the session loop feeds its own
//! view of the connection in and applies the result against the registry,
//! which keeps the fan-out rules testable in isolation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use board::protocol::{ClientMessage, ServerMessage, UserJoined, normalize_client_event};

/// The session-local view of one authenticated connection.
#[derive(Debug, Clone)]
pub struct SessionCtx {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    /// Board rooms this connection has joined, mirrored into the registry
    pub joined: HashSet<Uuid>,
}

impl SessionCtx {
    pub fn new(connection_id: Uuid, user_id: Uuid, organization_id: Uuid) -> Self {
        Self {
            connection_id,
            user_id,
            organization_id,
            joined: HashSet::new(),
        }
    }
}

/// Room membership change produced by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomChange {
    Join(Uuid),
    Leave(Uuid),
}

/// Where an outgoing message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every member of a board room, minus the excluded connection
    Board {
        board_id: Uuid,
        exclude: Option<Uuid>,
    },
}

/// One message to fan out.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub target: Target,
    pub message: ServerMessage,
}

/// Everything a message produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dispatch {
    pub room_changes: Vec<RoomChange>,
    pub outgoing: Vec<Outbound>,
}

impl Dispatch {
    fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.room_changes.is_empty() && self.outgoing.is_empty()
    }
}

/// Map one inbound message to room changes and broadcasts.
///
/// The sender is always excluded from broadcasts triggered by its own
/// messages. Change events from a connection that has not joined the named
/// board room are silently dropped: best-effort fan-out returns nothing to
/// the sender.
pub fn dispatch(ctx: &SessionCtx, msg: &ClientMessage, now: DateTime<Utc>) -> Dispatch {
    match msg {
        // Auth happens once, before the session loop starts.
        ClientMessage::Authenticate { .. } => Dispatch::empty(),

        ClientMessage::JoinBoard(join) => Dispatch {
            room_changes: vec![RoomChange::Join(join.board_id)],
            outgoing: vec![Outbound {
                target: Target::Board {
                    board_id: join.board_id,
                    exclude: Some(ctx.connection_id),
                },
                message: ServerMessage::UserJoined(UserJoined {
                    user_id: ctx.user_id,
                    board_id: join.board_id,
                    timestamp: now,
                }),
            }],
        },

        ClientMessage::LeaveBoard(leave) => Dispatch {
            room_changes: vec![RoomChange::Leave(leave.board_id)],
            outgoing: vec![],
        },

        ClientMessage::CardMoved(m) => change_event(ctx, msg, m.board_id, now),
        ClientMessage::CardCreated(m) => change_event(ctx, msg, m.board_id, now),
        ClientMessage::CardUpdated(m) => change_event(ctx, msg, m.board_id, now),
        ClientMessage::ListCreated(m) => change_event(ctx, msg, m.board_id, now),
        ClientMessage::ListReordered(m) => change_event(ctx, msg, m.board_id, now),
        ClientMessage::Typing(t) => change_event(ctx, msg, t.board_id, now),
    }
}

/// Normalize a change event into the board room, if the sender is a member.
fn change_event(
    ctx: &SessionCtx,
    msg: &ClientMessage,
    board_id: Uuid,
    now: DateTime<Utc>,
) -> Dispatch {
    if !ctx.joined.contains(&board_id) {
        tracing::debug!(
            connection_id = %ctx.connection_id,
            board_id = %board_id,
            "dropping change event from connection outside the board room"
        );
        return Dispatch::empty();
    }

    let Some(message) = normalize_client_event(msg, ctx.user_id, now) else {
        return Dispatch::empty();
    };

    Dispatch {
        room_changes: vec![],
        outgoing: vec![Outbound {
            target: Target::Board {
                board_id,
                exclude: Some(ctx.connection_id),
            },
            message,
        }],
    }
}
