//! Board/list/card data model shared by the gateway and the client engine.
//!
//! The authoritative copy of all of these entities lives in the external
//! persistence service. Instances held by clients are projections: either
//! cache-backed (read path) or optimistically mutated (write path), and always
//! reconcilable by refetching.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of change carried by a normalized change envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Entity moved to a new position (possibly a new parent)
    Moved,
    /// Entity created
    Created,
    /// Entity fields updated
    Updated,
    /// Entity deleted
    Deleted,
    /// Sibling order rewritten
    Reordered,
}

/// Top-level container of lists, scoped to an organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    /// Background image url or color token
    pub background: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    /// Soft-delete flag; boards are never hard-removed by this subsystem
    #[serde(default)]
    pub deleted: bool,
    /// Member user ids, resolved against an external roster
    #[serde(default)]
    pub members: Vec<Uuid>,
    /// Lists in render order; positions are kept dense (0..n-1)
    #[serde(default)]
    pub lists: Vec<List>,
}

/// An ordered column of cards within a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    pub id: Uuid,
    /// Back-reference to the owning board (not ownership)
    pub board_id: Uuid,
    pub title: String,
    /// Lower sorts first; renumbered to dense 0..n-1 after every reorder
    pub position: i32,
    #[serde(default)]
    pub cards: Vec<Card>,
}

/// The atomic work item, owned by exactly one list at any authoritative
/// instant. A local optimistic copy may claim a different list for up to one
/// round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: Uuid,
    /// Current owner list
    pub list_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    /// Dense within the owning list
    pub position: i32,
    #[serde(default)]
    pub members: Vec<Uuid>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// Stored-object descriptor returned by the external file store. Opaque to
/// the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: Uuid,
    pub url: String,
    pub size: i64,
    pub mime_type: String,
}

/// Label attached to a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: Uuid,
    pub name: String,
    /// Hex color code (e.g., "#3b82f6")
    pub color: String,
}

/// One element of a dense list-order array (the `listOrders` wire shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPosition {
    pub id: Uuid,
    pub position: i32,
}

impl Board {
    /// Look up a list by id.
    pub fn list(&self, id: Uuid) -> Option<&List> {
        self.lists.iter().find(|l| l.id == id)
    }

    /// Look up a list by id, mutably.
    pub fn list_mut(&mut self, id: Uuid) -> Option<&mut List> {
        self.lists.iter_mut().find(|l| l.id == id)
    }

    /// Locate a card anywhere on the board, returning
    /// `(list_index, card_index)`.
    pub fn locate_card(&self, id: Uuid) -> Option<(usize, usize)> {
        self.lists.iter().enumerate().find_map(|(li, list)| {
            list.cards
                .iter()
                .position(|c| c.id == id)
                .map(|ci| (li, ci))
        })
    }

    /// Look up a card anywhere on the board.
    pub fn card(&self, id: Uuid) -> Option<&Card> {
        self.locate_card(id)
            .map(|(li, ci)| &self.lists[li].cards[ci])
    }
}
