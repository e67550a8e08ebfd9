//! Dense-position move and renumber operations for lists and cards.
//!
//! Positions are a total order with no required contiguity, but every reorder
//! operation renumbers the affected sibling set to a dense 0..n-1 sequence so
//! repeated local insertions never grow positions without bound. Same-list and
//! cross-list card moves share one code path.

use thiserror::Error;
use uuid::Uuid;

use crate::model::{Board, List, ListPosition};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderingError {
    #[error("unknown list: {0}")]
    UnknownList(Uuid),
    #[error("unknown card: {0}")]
    UnknownCard(Uuid),
}

/// Result of a card move: the card's new authoritative coordinates.
///
/// `previous_list_id` is set only when the card changed lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardPlacement {
    pub card_id: Uuid,
    pub list_id: Uuid,
    pub position: i32,
    pub previous_list_id: Option<Uuid>,
}

impl Board {
    /// Move a list to `to_index` (clamped to bounds after removal) and
    /// renumber all lists densely.
    ///
    /// Returns the complete dense order array, which is exactly the payload
    /// the authoritative reorder call carries.
    pub fn move_list(
        &mut self,
        list_id: Uuid,
        to_index: usize,
    ) -> Result<Vec<ListPosition>, OrderingError> {
        let from = self
            .lists
            .iter()
            .position(|l| l.id == list_id)
            .ok_or(OrderingError::UnknownList(list_id))?;

        let list = self.lists.remove(from);
        let to = to_index.min(self.lists.len());
        self.lists.insert(to, list);
        self.renumber_lists();

        Ok(self.list_order())
    }

    /// Reorder lists to match an explicit order array, then renumber densely.
    ///
    /// Lists absent from `orders` keep their relative order after the ordered
    /// ones. Fails on ids that are not on this board.
    pub fn apply_list_order(&mut self, orders: &[ListPosition]) -> Result<(), OrderingError> {
        for entry in orders {
            if self.list(entry.id).is_none() {
                return Err(OrderingError::UnknownList(entry.id));
            }
        }

        let rank = |id: Uuid| {
            orders
                .iter()
                .find(|o| o.id == id)
                .map(|o| (0, o.position as i64))
                .unwrap_or((1, 0))
        };
        self.lists.sort_by_key(|l| rank(l.id));
        self.renumber_lists();
        Ok(())
    }

    /// Move a card into `dest_list_id` at `to_index` (clamped to the
    /// destination's length after removal) and renumber the affected lists.
    ///
    /// Same-list reorders and cross-list moves go through this single path;
    /// moving into an empty list yields position 0, and any `to_index` past
    /// the end appends.
    pub fn move_card(
        &mut self,
        card_id: Uuid,
        dest_list_id: Uuid,
        to_index: usize,
    ) -> Result<CardPlacement, OrderingError> {
        let (src_index, card_index) = self
            .locate_card(card_id)
            .ok_or(OrderingError::UnknownCard(card_id))?;
        let dest_index = self
            .lists
            .iter()
            .position(|l| l.id == dest_list_id)
            .ok_or(OrderingError::UnknownList(dest_list_id))?;

        let src_list_id = self.lists[src_index].id;
        let mut card = self.lists[src_index].cards.remove(card_index);

        let dest_len = self.lists[dest_index].cards.len();
        let to = to_index.min(dest_len);
        card.list_id = dest_list_id;
        self.lists[dest_index].cards.insert(to, card);

        for li in [src_index, dest_index] {
            for (i, c) in self.lists[li].cards.iter_mut().enumerate() {
                c.position = i as i32;
            }
        }

        Ok(CardPlacement {
            card_id,
            list_id: dest_list_id,
            position: to as i32,
            previous_list_id: (src_list_id != dest_list_id).then_some(src_list_id),
        })
    }

    /// Remove a list (with its cards) and renumber the remaining lists
    /// densely. Returns the removed list.
    pub fn remove_list(&mut self, list_id: Uuid) -> Result<List, OrderingError> {
        let index = self
            .lists
            .iter()
            .position(|l| l.id == list_id)
            .ok_or(OrderingError::UnknownList(list_id))?;

        let removed = self.lists.remove(index);
        self.renumber_lists();
        Ok(removed)
    }

    /// Current dense list order as a wire-ready array.
    pub fn list_order(&self) -> Vec<ListPosition> {
        self.lists
            .iter()
            .map(|l| ListPosition {
                id: l.id,
                position: l.position,
            })
            .collect()
    }

    fn renumber_lists(&mut self) {
        for (i, list) in self.lists.iter_mut().enumerate() {
            list.position = i as i32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Card, List};

    fn card(list_id: Uuid, position: i32) -> Card {
        Card {
            id: Uuid::new_v4(),
            list_id,
            title: format!("card {position}"),
            description: None,
            due_date: None,
            position,
            members: vec![],
            attachments: vec![],
            labels: vec![],
        }
    }

    fn board_with_lists(cards_per_list: &[usize]) -> Board {
        let board_id = Uuid::new_v4();
        let lists = cards_per_list
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let list_id = Uuid::new_v4();
                List {
                    id: list_id,
                    board_id,
                    title: format!("list {i}"),
                    position: i as i32,
                    cards: (0..n).map(|p| card(list_id, p as i32)).collect(),
                }
            })
            .collect();
        Board {
            id: board_id,
            organization_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            title: "board".to_string(),
            background: None,
            pinned: false,
            deleted: false,
            members: vec![],
            lists,
        }
    }

    fn assert_dense(board: &Board) {
        for (i, list) in board.lists.iter().enumerate() {
            assert_eq!(list.position, i as i32, "list positions must be dense");
            for (j, c) in list.cards.iter().enumerate() {
                assert_eq!(c.position, j as i32, "card positions must be dense");
                assert_eq!(c.list_id, list.id);
            }
        }
    }

    #[test]
    fn test_cross_list_move_preserves_counts() {
        // L1=[c1,c2,c3], L2=[]; move c2 to L2 index 0.
        let mut board = board_with_lists(&[3, 0]);
        let c2 = board.lists[0].cards[1].id;
        let l2 = board.lists[1].id;

        let placement = board.move_card(c2, l2, 0).unwrap();

        assert_eq!(board.lists[0].cards.len(), 2);
        assert_eq!(board.lists[1].cards.len(), 1);
        assert_eq!(placement.list_id, l2);
        assert_eq!(placement.position, 0);
        assert_eq!(placement.previous_list_id, Some(board.lists[0].id));
        assert_eq!(board.card(c2).unwrap().list_id, l2);
        assert_dense(&board);
    }

    #[test]
    fn test_same_list_move_has_no_previous_list() {
        let mut board = board_with_lists(&[4]);
        let l1 = board.lists[0].id;
        let first = board.lists[0].cards[0].id;

        let placement = board.move_card(first, l1, 2).unwrap();

        assert_eq!(placement.previous_list_id, None);
        assert_eq!(placement.position, 2);
        assert_eq!(board.lists[0].cards[2].id, first);
        assert_dense(&board);
    }

    #[test]
    fn test_move_past_end_appends() {
        let mut board = board_with_lists(&[2, 3]);
        let moved = board.lists[0].cards[0].id;
        let dest = board.lists[1].id;

        let placement = board.move_card(moved, dest, 99).unwrap();

        // Destination held 3 cards, so appending lands at index 3.
        assert_eq!(placement.position, 3);
        assert_eq!(board.lists[1].cards.last().unwrap().id, moved);
        assert_dense(&board);
    }

    #[test]
    fn test_move_into_empty_list_yields_zero() {
        let mut board = board_with_lists(&[1, 0]);
        let moved = board.lists[0].cards[0].id;
        let dest = board.lists[1].id;

        let placement = board.move_card(moved, dest, 5).unwrap();

        assert_eq!(placement.position, 0);
        assert!(board.lists[0].cards.is_empty());
        assert_dense(&board);
    }

    #[test]
    fn test_positions_stay_dense_across_move_sequences() {
        let mut board = board_with_lists(&[5, 2, 0]);
        let l0 = board.lists[0].id;
        let l1 = board.lists[1].id;
        let l2 = board.lists[2].id;

        let a = board.lists[0].cards[4].id;
        let b = board.lists[0].cards[0].id;
        let c = board.lists[1].cards[1].id;

        board.move_card(a, l2, 0).unwrap();
        board.move_card(b, l1, 1).unwrap();
        board.move_card(c, l0, 3).unwrap();
        board.move_card(a, l0, 0).unwrap();

        assert_dense(&board);
        let total: usize = board.lists.iter().map(|l| l.cards.len()).sum();
        assert_eq!(total, 7);
    }

    #[test]
    fn test_move_list_to_front() {
        // [L1,L2,L3]; move L3 to index 0 -> [L3,L1,L2] positions [0,1,2].
        let mut board = board_with_lists(&[1, 1, 1]);
        let (l1, l2, l3) = (board.lists[0].id, board.lists[1].id, board.lists[2].id);

        let orders = board.move_list(l3, 0).unwrap();

        let ids: Vec<Uuid> = board.lists.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![l3, l1, l2]);
        assert_eq!(
            orders,
            vec![
                ListPosition { id: l3, position: 0 },
                ListPosition { id: l1, position: 1 },
                ListPosition { id: l2, position: 2 },
            ]
        );
    }

    #[test]
    fn test_apply_list_order_matches_move() {
        let mut a = board_with_lists(&[0, 0, 0]);
        let mut b = a.clone();
        let last = a.lists[2].id;

        let orders = a.move_list(last, 0).unwrap();
        b.apply_list_order(&orders).unwrap();

        assert_eq!(a.lists, b.lists);
    }

    #[test]
    fn test_remove_list_renumbers_remaining() {
        let mut board = board_with_lists(&[1, 2, 3]);
        let middle = board.lists[1].id;

        let removed = board.remove_list(middle).unwrap();

        assert_eq!(removed.id, middle);
        assert_eq!(removed.cards.len(), 2);
        assert_eq!(board.lists.len(), 2);
        assert_dense(&board);

        let missing = Uuid::new_v4();
        assert_eq!(
            board.remove_list(missing).unwrap_err(),
            OrderingError::UnknownList(missing)
        );
    }

    #[test]
    fn test_apply_list_order_rejects_foreign_id() {
        let mut board = board_with_lists(&[0, 0]);
        let stray = Uuid::new_v4();
        let err = board
            .apply_list_order(&[ListPosition {
                id: stray,
                position: 0,
            }])
            .unwrap_err();
        assert_eq!(err, OrderingError::UnknownList(stray));
    }

    #[test]
    fn test_unknown_ids() {
        let mut board = board_with_lists(&[1]);
        let l1 = board.lists[0].id;
        let c1 = board.lists[0].cards[0].id;

        let missing_card = Uuid::new_v4();
        assert_eq!(
            board.move_card(missing_card, l1, 0).unwrap_err(),
            OrderingError::UnknownCard(missing_card)
        );

        let missing_list = Uuid::new_v4();
        assert_eq!(
            board.move_card(c1, missing_list, 0).unwrap_err(),
            OrderingError::UnknownList(missing_list)
        );
        // A failed destination lookup must not have removed the card.
        assert_eq!(board.lists[0].cards.len(), 1);

        assert_eq!(
            board.move_list(missing_list, 0).unwrap_err(),
            OrderingError::UnknownList(missing_list)
        );
    }
}
