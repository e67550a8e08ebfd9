//! Wire protocol for realtime board synchronization.
//!
//! One closed, tagged contract shared by the gateway and the client
//! subscriber. Event names and payload field casing are fixed: clients in
//! other languages already speak this shape.
//!
//! Client change events are re-emitted by the gateway as a single normalized
//! `card-updated` / `list-updated` envelope carrying the change kind, the
//! originating user and a server timestamp; [`normalize_client_event`] is
//! that mapping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Board, Card, ChangeKind, List, ListPosition};

/// Messages sent from a client to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    /// Handshake; must be the first frame on the socket
    #[serde(rename = "authenticate")]
    Authenticate { token: String },

    /// Enter a board room
    #[serde(rename = "join-board")]
    JoinBoard(JoinBoard),

    /// Leave a board room
    #[serde(rename = "leave-board")]
    LeaveBoard(LeaveBoard),

    /// A card was moved (same-list reorder or cross-list move)
    #[serde(rename = "card-moved")]
    CardMoved(CardMoved),

    /// A card was created
    #[serde(rename = "card-created")]
    CardCreated(CardCreated),

    /// A card's fields were updated
    #[serde(rename = "card-updated")]
    CardUpdated(CardUpdated),

    /// A list was created
    #[serde(rename = "list-created")]
    ListCreated(ListCreated),

    /// The board's lists were reordered
    #[serde(rename = "list-reordered")]
    ListReordered(ListReordered),

    /// Ephemeral typing indicator
    #[serde(rename = "typing")]
    Typing(Typing),
}

/// Messages sent from the gateway to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    /// Normalized card change envelope
    #[serde(rename = "card-updated")]
    CardUpdate(CardUpdate),

    /// Normalized list change envelope
    #[serde(rename = "list-updated")]
    ListUpdate(ListUpdate),

    /// Presence: somebody is typing on the board
    #[serde(rename = "user-typing")]
    UserTyping(UserTyping),

    /// Presence: somebody joined the board room
    #[serde(rename = "user-joined")]
    UserJoined(UserJoined),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinBoard {
    pub board_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveBoard {
    pub board_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardMoved {
    pub card_id: Uuid,
    pub board_id: Uuid,
    /// Destination list
    pub list_id: Uuid,
    pub position: i32,
    /// Set only for cross-list moves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_list_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardCreated {
    /// The canonical card returned by the authoritative create
    pub card: Card,
    pub board_id: Uuid,
    pub list_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardUpdated {
    pub card_id: Uuid,
    pub board_id: Uuid,
    pub updates: CardPatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCreated {
    /// The canonical list returned by the authoritative create
    pub list: List,
    pub board_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListReordered {
    pub board_id: Uuid,
    pub list_orders: Vec<ListPosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub board_id: Uuid,
    pub is_typing: bool,
}

/// Normalized card change broadcast to a board room.
///
/// Which optional fields are present depends on the change kind: `Moved`
/// carries ids and position, `Created` carries the full card, `Updated`
/// carries the patch, `Deleted` carries ids only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardUpdate {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<Card>,
    pub board_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<CardPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_list_id: Option<Uuid>,
    /// Originating user
    pub user_id: Uuid,
    /// Server-side timestamp
    pub timestamp: DateTime<Utc>,
}

/// Normalized list change broadcast to a board room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUpdate {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<List>,
    pub board_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_orders: Option<Vec<ListPosition>>,
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTyping {
    pub user_id: Uuid,
    pub board_id: Uuid,
    pub is_typing: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoined {
    pub user_id: Uuid,
    pub board_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// Partial card update. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<Uuid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<crate::model::Label>>,
}

/// Partial list update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Partial board update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
}

impl CardPatch {
    pub fn apply_to(&self, card: &mut Card) {
        if let Some(title) = &self.title {
            card.title = title.clone();
        }
        if let Some(description) = &self.description {
            card.description = Some(description.clone());
        }
        if let Some(due_date) = self.due_date {
            card.due_date = Some(due_date);
        }
        if let Some(members) = &self.members {
            card.members = members.clone();
        }
        if let Some(labels) = &self.labels {
            card.labels = labels.clone();
        }
    }
}

impl ListPatch {
    pub fn apply_to(&self, list: &mut List) {
        if let Some(title) = &self.title {
            list.title = title.clone();
        }
    }
}

impl BoardPatch {
    pub fn apply_to(&self, board: &mut Board) {
        if let Some(title) = &self.title {
            board.title = title.clone();
        }
        if let Some(background) = &self.background {
            board.background = Some(background.clone());
        }
        if let Some(pinned) = self.pinned {
            board.pinned = pinned;
        }
        if let Some(deleted) = self.deleted {
            board.deleted = deleted;
        }
    }
}

impl CardUpdate {
    fn bare(kind: ChangeKind, board_id: Uuid, user_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        CardUpdate {
            kind,
            card_id: None,
            card: None,
            board_id,
            list_id: None,
            position: None,
            updates: None,
            previous_list_id: None,
            user_id,
            timestamp,
        }
    }

    pub fn moved(msg: &CardMoved, user_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        CardUpdate {
            card_id: Some(msg.card_id),
            list_id: Some(msg.list_id),
            position: Some(msg.position),
            previous_list_id: msg.previous_list_id,
            ..Self::bare(ChangeKind::Moved, msg.board_id, user_id, timestamp)
        }
    }

    pub fn created(msg: &CardCreated, user_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        CardUpdate {
            card_id: Some(msg.card.id),
            card: Some(msg.card.clone()),
            list_id: Some(msg.list_id),
            ..Self::bare(ChangeKind::Created, msg.board_id, user_id, timestamp)
        }
    }

    pub fn updated(msg: &CardUpdated, user_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        CardUpdate {
            card_id: Some(msg.card_id),
            updates: Some(msg.updates.clone()),
            ..Self::bare(ChangeKind::Updated, msg.board_id, user_id, timestamp)
        }
    }

    /// Built by server-side collaborators (the REST layer broadcasting a
    /// delete); clients never send a delete over this socket.
    pub fn deleted(
        card_id: Uuid,
        board_id: Uuid,
        list_id: Uuid,
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Self {
        CardUpdate {
            card_id: Some(card_id),
            list_id: Some(list_id),
            ..Self::bare(ChangeKind::Deleted, board_id, user_id, timestamp)
        }
    }
}

impl ListUpdate {
    fn bare(kind: ChangeKind, board_id: Uuid, user_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        ListUpdate {
            kind,
            list: None,
            board_id,
            list_id: None,
            list_orders: None,
            user_id,
            timestamp,
        }
    }

    pub fn created(msg: &ListCreated, user_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        ListUpdate {
            list: Some(msg.list.clone()),
            list_id: Some(msg.list.id),
            ..Self::bare(ChangeKind::Created, msg.board_id, user_id, timestamp)
        }
    }

    pub fn reordered(msg: &ListReordered, user_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        ListUpdate {
            list_orders: Some(msg.list_orders.clone()),
            ..Self::bare(ChangeKind::Reordered, msg.board_id, user_id, timestamp)
        }
    }

    /// Built by server-side collaborators; clients never send these.
    pub fn deleted(list_id: Uuid, board_id: Uuid, user_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        ListUpdate {
            list_id: Some(list_id),
            ..Self::bare(ChangeKind::Deleted, board_id, user_id, timestamp)
        }
    }

    /// Built by server-side collaborators for list field updates.
    pub fn updated(list: List, user_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        let board_id = list.board_id;
        ListUpdate {
            list_id: Some(list.id),
            list: Some(list),
            ..Self::bare(ChangeKind::Updated, board_id, user_id, timestamp)
        }
    }
}

/// Map a client change event to the normalized envelope the gateway
/// re-emits to the rest of the board room.
///
/// Returns `None` for lifecycle messages (`authenticate`, `join-board`,
/// `leave-board`), which have dedicated handling and no broadcast of their
/// own shape.
pub fn normalize_client_event(
    msg: &ClientMessage,
    user_id: Uuid,
    timestamp: DateTime<Utc>,
) -> Option<ServerMessage> {
    let out = match msg {
        ClientMessage::CardMoved(m) => {
            ServerMessage::CardUpdate(CardUpdate::moved(m, user_id, timestamp))
        }
        ClientMessage::CardCreated(m) => {
            ServerMessage::CardUpdate(CardUpdate::created(m, user_id, timestamp))
        }
        ClientMessage::CardUpdated(m) => {
            ServerMessage::CardUpdate(CardUpdate::updated(m, user_id, timestamp))
        }
        ClientMessage::ListCreated(m) => {
            ServerMessage::ListUpdate(ListUpdate::created(m, user_id, timestamp))
        }
        ClientMessage::ListReordered(m) => {
            ServerMessage::ListUpdate(ListUpdate::reordered(m, user_id, timestamp))
        }
        ClientMessage::Typing(t) => ServerMessage::UserTyping(UserTyping {
            user_id,
            board_id: t.board_id,
            is_typing: t.is_typing,
            timestamp,
        }),
        ClientMessage::Authenticate { .. }
        | ClientMessage::JoinBoard(_)
        | ClientMessage::LeaveBoard(_) => return None,
    };
    Some(out)
}
