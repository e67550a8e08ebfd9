//! Drag-and-drop controller for cards and lists.
//!
//! The controller owns no board; callers hand it a mutable projection for
//! the duration of a gesture. Hovers may preview cross-list placement, but
//! the drop always resolves against the pre-drag snapshot, and the returned
//! outcome is what the caller feeds to the mutation coordinator.

use board::{Board, ListPosition};
use uuid::Uuid;

/// Where a dragged item is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    /// On top of another card: insert before it.
    Card(Uuid),
    /// On a list's empty area below its cards: append.
    ListArea(Uuid),
    /// Between lists, for list drags. The slot is the final index.
    ListSlot(usize),
}

/// The resolved result of a completed gesture.
#[derive(Debug, Clone, PartialEq)]
pub enum DragOutcome {
    CardMoved {
        card_id: Uuid,
        board_id: Uuid,
        list_id: Uuid,
        position: i32,
        previous_list_id: Option<Uuid>,
    },
    ListReordered {
        board_id: Uuid,
        orders: Vec<ListPosition>,
    },
}

#[derive(Debug, Clone)]
enum Dragging {
    Card {
        card_id: Uuid,
        origin_list: Uuid,
        origin_index: usize,
    },
    List {
        list_id: Uuid,
        origin_index: usize,
    },
}

/// Tracks one gesture at a time.
#[derive(Debug, Default)]
pub struct DragController {
    dragging: Option<Dragging>,
    pre_drag: Option<Board>,
}

impl DragController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging.is_some()
    }

    /// Arm a card gesture. Ignored when the card is not on the board.
    pub fn begin_card_drag(&mut self, board: &Board, card_id: Uuid) {
        let Some((li, ci)) = board.locate_card(card_id) else {
            return;
        };
        self.dragging = Some(Dragging::Card {
            card_id,
            origin_list: board.lists[li].id,
            origin_index: ci,
        });
        self.pre_drag = Some(board.clone());
    }

    /// Arm a list gesture. Ignored when the list is not on the board.
    pub fn begin_list_drag(&mut self, board: &Board, list_id: Uuid) {
        let Some(origin_index) = board.lists.iter().position(|l| l.id == list_id) else {
            return;
        };
        self.dragging = Some(Dragging::List {
            list_id,
            origin_index,
        });
        self.pre_drag = Some(board.clone());
    }

    /// Preview a hover. Only cross-list card hovers mutate the projection;
    /// same-list shuffles wait for the drop.
    pub fn drag_over(&mut self, board: &mut Board, target: DropTarget) {
        let Some(Dragging::Card { card_id, .. }) = &self.dragging else {
            return;
        };
        let card_id = *card_id;
        let Some((dest_list, to_index)) = resolve_target(board, target) else {
            return;
        };
        let current_list = match board.card(card_id) {
            Some(card) => card.list_id,
            None => return,
        };
        if dest_list == current_list {
            return;
        }
        let _ = board.move_card(card_id, dest_list, to_index);
    }

    /// Complete the gesture. The projection is restored to its pre-drag
    /// state first; the outcome (if any) describes the single move the
    /// caller should submit.
    pub fn drop(&mut self, board: &mut Board, target: DropTarget) -> Option<DragOutcome> {
        let dragging = self.dragging.take()?;
        if let Some(pre) = self.pre_drag.take() {
            *board = pre;
        }

        match dragging {
            Dragging::List {
                list_id,
                origin_index,
            } => {
                let DropTarget::ListSlot(slot) = target else {
                    return None;
                };
                if board.lists.is_empty() {
                    return None;
                }
                let clamped = slot.min(board.lists.len() - 1);
                if clamped == origin_index {
                    return None;
                }
                let mut preview = board.clone();
                let orders = preview.move_list(list_id, slot).ok()?;
                Some(DragOutcome::ListReordered {
                    board_id: board.id,
                    orders,
                })
            }
            Dragging::Card {
                card_id,
                origin_list,
                origin_index,
            } => {
                let (dest_list, mut to_index) = resolve_target(board, target)?;
                if dest_list == origin_list {
                    // Removal shifts everything after the origin left by one.
                    if to_index > origin_index {
                        to_index -= 1;
                    }
                    if to_index == origin_index {
                        return None;
                    }
                }
                Some(DragOutcome::CardMoved {
                    card_id,
                    board_id: board.id,
                    list_id: dest_list,
                    position: to_index as i32,
                    previous_list_id: (dest_list != origin_list).then_some(origin_list),
                })
            }
        }
    }

    /// Abort the gesture and restore the projection.
    pub fn cancel(&mut self, board: &mut Board) {
        if let Some(pre) = self.pre_drag.take() {
            *board = pre;
        }
        self.dragging = None;
    }
}

/// Resolve a target to `(destination list, insertion index)` for card
/// gestures.
fn resolve_target(board: &Board, target: DropTarget) -> Option<(Uuid, usize)> {
    match target {
        DropTarget::Card(over_id) => {
            let (li, ci) = board.locate_card(over_id)?;
            Some((board.lists[li].id, ci))
        }
        DropTarget::ListArea(list_id) => {
            let list = board.list(list_id)?;
            Some((list.id, list.cards.len()))
        }
        DropTarget::ListSlot(_) => None,
    }
}
