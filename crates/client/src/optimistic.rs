//! Optimistic mutation coordinator.
//!
//! Every mutation follows the same arc: apply to the local projection
//! immediately, confirm against the authoritative API, then reconcile.
//! Confirmation is server-wins (the canonical entity replaces the local
//! guess); rejection restores the pre-mutation snapshot and forces a single
//! refetch. A newer mutation on the same entity supersedes an older
//! in-flight one, whose late resolution is then discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use board::{
    Board, Card, List, ListPosition, OrderingError,
    protocol::{
        BoardPatch, CardCreated, CardMoved, CardPatch, CardUpdated, ClientMessage, ListCreated,
        ListPatch, ListReordered,
    },
};
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::api::{ApiError, BoardApi, MoveCardRequest};
use crate::cache::{self, TtlCache};

/// How long cached board reads stay fresh.
const CACHE_TTL: Duration = Duration::from_secs(300);

/// Errors surfaced by coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("no board loaded")]
    NoBoard,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Ordering(#[from] OrderingError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Values held by the read cache.
#[derive(Debug, Clone)]
pub enum Cached {
    Board(Board),
    Boards(Vec<Board>),
    Lists(Vec<List>),
}

#[derive(Default)]
struct SyncState {
    /// Local projection of the open board.
    board: Option<Board>,
    /// Per-entity mutation sequence numbers. The holder of the latest
    /// sequence owns that entity's resolution; older in-flight mutations
    /// resolve as superseded.
    sequences: HashMap<Uuid, u64>,
}

impl SyncState {
    fn bump(&mut self, entity: Uuid) -> u64 {
        let seq = self.sequences.entry(entity).or_insert(0);
        *seq += 1;
        *seq
    }

    fn current_seq(&self, entity: Uuid) -> u64 {
        self.sequences.get(&entity).copied().unwrap_or(0)
    }
}

/// Coordinates optimistic mutations against one open board.
///
/// The projection lock is held only while touching local state, never
/// across an API round trip, so mutations on different entities interleave
/// freely.
pub struct BoardSync {
    api: Arc<dyn BoardApi>,
    cache: TtlCache<Cached>,
    state: Mutex<SyncState>,
    publish_tx: mpsc::Sender<ClientMessage>,
}

impl BoardSync {
    pub fn new(api: Arc<dyn BoardApi>, publish_tx: mpsc::Sender<ClientMessage>) -> Self {
        Self {
            api,
            cache: TtlCache::new(),
            state: Mutex::new(SyncState::default()),
            publish_tx,
        }
    }

    pub fn cache(&self) -> &TtlCache<Cached> {
        &self.cache
    }

    /// Load a board, serving from cache when fresh, and make it the open
    /// projection.
    pub async fn board_snapshot(&self, board_id: Uuid) -> Result<Board, MutationError> {
        if let Some(Cached::Board(board)) = self.cache.get(&cache::board_key(board_id)) {
            let mut state = self.state.lock().await;
            state.board = Some(board.clone());
            return Ok(board);
        }

        let board = self.api.fetch_board(board_id).await?;
        self.prime(&board);
        let mut state = self.state.lock().await;
        state.board = Some(board.clone());
        Ok(board)
    }

    /// List the boards visible to a user, served from cache when fresh.
    pub async fn boards(&self, owner: Uuid) -> Result<Vec<Board>, MutationError> {
        let key = cache::user_boards_key(owner);
        if let Some(Cached::Boards(boards)) = self.cache.get(&key) {
            return Ok(boards);
        }

        let boards = self.api.list_boards(owner).await?;
        self.cache
            .set(key, Cached::Boards(boards.clone()), CACHE_TTL);
        Ok(boards)
    }

    /// The lists of a board, served from cache when fresh. A miss falls
    /// back to a full board fetch, which re-primes both keys.
    pub async fn board_lists(&self, board_id: Uuid) -> Result<Vec<List>, MutationError> {
        if let Some(Cached::Lists(lists)) = self.cache.get(&cache::board_lists_key(board_id)) {
            return Ok(lists);
        }

        let board = self.api.fetch_board(board_id).await?;
        self.prime(&board);
        Ok(board.lists)
    }

    /// The current local projection, if a board is open.
    pub async fn current(&self) -> Option<Board> {
        self.state.lock().await.board.clone()
    }

    /// Refetch the open board from the authoritative API, replacing the
    /// projection wholesale. A no-op when no board is open.
    pub async fn refetch_board(&self) -> Result<(), MutationError> {
        let board_id = {
            let state = self.state.lock().await;
            match &state.board {
                Some(board) => board.id,
                None => return Ok(()),
            }
        };

        let board = self.api.fetch_board(board_id).await?;
        self.prime(&board);
        let mut state = self.state.lock().await;
        state.board = Some(board);
        Ok(())
    }

    /// Create a list at the end of the open board.
    pub async fn create_list(&self, title: &str) -> Result<List, MutationError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(MutationError::Validation(
                "list title must not be empty".to_string(),
            ));
        }

        let placeholder_id = Uuid::new_v4();
        let (board_id, seq, snapshot) = {
            let mut state = self.state.lock().await;
            let board = state.board.as_mut().ok_or(MutationError::NoBoard)?;
            let snapshot = board.clone();
            let board_id = board.id;
            let position = board.lists.len() as i32;
            board.lists.push(List {
                id: placeholder_id,
                board_id,
                title: title.to_string(),
                position,
                cards: vec![],
            });
            let seq = state.bump(placeholder_id);
            (board_id, seq, snapshot)
        };

        match self.api.create_list(board_id, title).await {
            Ok(canonical) => {
                {
                    let mut state = self.state.lock().await;
                    if state.current_seq(placeholder_id) != seq {
                        tracing::debug!("create superseded, returning canonical list unmerged");
                        return Ok(canonical);
                    }
                    if let Some(board) = state.board.as_mut()
                        && let Some(list) = board.list_mut(placeholder_id)
                    {
                        *list = canonical.clone();
                    }
                    // Placeholder ids never recur.
                    state.sequences.remove(&placeholder_id);
                }
                self.invalidate(board_id);
                self.publish(ClientMessage::ListCreated(ListCreated {
                    list: canonical.clone(),
                    board_id,
                }))
                .await;
                Ok(canonical)
            }
            Err(e) => Err(self.fail(placeholder_id, seq, board_id, snapshot, e).await),
        }
    }

    /// Create a card at the end of a list on the open board.
    pub async fn create_card(&self, list_id: Uuid, title: &str) -> Result<Card, MutationError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(MutationError::Validation(
                "card title must not be empty".to_string(),
            ));
        }

        let placeholder_id = Uuid::new_v4();
        let (board_id, seq, snapshot) = {
            let mut state = self.state.lock().await;
            let board = state.board.as_mut().ok_or(MutationError::NoBoard)?;
            let snapshot = board.clone();
            let board_id = board.id;
            let list = board
                .list_mut(list_id)
                .ok_or(OrderingError::UnknownList(list_id))?;
            let position = list.cards.len() as i32;
            list.cards.push(Card {
                id: placeholder_id,
                list_id,
                title: title.to_string(),
                description: None,
                due_date: None,
                position,
                members: vec![],
                attachments: vec![],
                labels: vec![],
            });
            let seq = state.bump(placeholder_id);
            (board_id, seq, snapshot)
        };

        match self.api.create_card(list_id, title).await {
            Ok(canonical) => {
                {
                    let mut state = self.state.lock().await;
                    if state.current_seq(placeholder_id) != seq {
                        tracing::debug!("create superseded, returning canonical card unmerged");
                        return Ok(canonical);
                    }
                    if let Some(board) = state.board.as_mut()
                        && let Some((li, ci)) = board.locate_card(placeholder_id)
                    {
                        board.lists[li].cards[ci] = canonical.clone();
                    }
                    state.sequences.remove(&placeholder_id);
                }
                self.invalidate(board_id);
                self.publish(ClientMessage::CardCreated(CardCreated {
                    card: canonical.clone(),
                    board_id,
                    list_id,
                }))
                .await;
                Ok(canonical)
            }
            Err(e) => Err(self.fail(placeholder_id, seq, board_id, snapshot, e).await),
        }
    }

    /// Update list fields on the open board.
    pub async fn update_list(&self, list_id: Uuid, patch: ListPatch) -> Result<List, MutationError> {
        let (board_id, seq, snapshot) = {
            let mut state = self.state.lock().await;
            let board = state.board.as_mut().ok_or(MutationError::NoBoard)?;
            let snapshot = board.clone();
            let board_id = board.id;
            let list = board
                .list_mut(list_id)
                .ok_or(OrderingError::UnknownList(list_id))?;
            patch.apply_to(list);
            let seq = state.bump(list_id);
            (board_id, seq, snapshot)
        };

        match self.api.update_list(list_id, &patch).await {
            Ok(canonical) => {
                {
                    let mut state = self.state.lock().await;
                    if state.current_seq(list_id) != seq {
                        tracing::debug!(%list_id, "update superseded, returning canonical list unmerged");
                        return Ok(canonical);
                    }
                    if let Some(board) = state.board.as_mut() {
                        merge_canonical_list(board, &canonical);
                    }
                }
                self.invalidate(board_id);
                // List field updates reach collaborators through server
                // broadcasts, not a client publish.
                Ok(canonical)
            }
            Err(e) => Err(self.fail(list_id, seq, board_id, snapshot, e).await),
        }
    }

    /// Delete a list from the open board, closing the position gap.
    pub async fn delete_list(&self, list_id: Uuid) -> Result<(), MutationError> {
        let (board_id, seq, snapshot) = {
            let mut state = self.state.lock().await;
            let board = state.board.as_mut().ok_or(MutationError::NoBoard)?;
            let snapshot = board.clone();
            let board_id = board.id;
            board.remove_list(list_id)?;
            let seq = state.bump(list_id);
            (board_id, seq, snapshot)
        };

        match self.api.delete_list(list_id).await {
            Ok(()) => {
                {
                    let mut state = self.state.lock().await;
                    if state.current_seq(list_id) == seq {
                        state.sequences.remove(&list_id);
                    }
                }
                self.invalidate(board_id);
                Ok(())
            }
            Err(e) => Err(self.fail(list_id, seq, board_id, snapshot, e).await),
        }
    }

    /// Update card fields on the open board.
    pub async fn update_card(&self, card_id: Uuid, patch: CardPatch) -> Result<Card, MutationError> {
        let (board_id, seq, snapshot) = {
            let mut state = self.state.lock().await;
            let board = state.board.as_mut().ok_or(MutationError::NoBoard)?;
            let snapshot = board.clone();
            let board_id = board.id;
            let (li, ci) = board
                .locate_card(card_id)
                .ok_or(OrderingError::UnknownCard(card_id))?;
            patch.apply_to(&mut board.lists[li].cards[ci]);
            let seq = state.bump(card_id);
            (board_id, seq, snapshot)
        };

        match self.api.update_card(card_id, &patch).await {
            Ok(canonical) => {
                {
                    let mut state = self.state.lock().await;
                    if state.current_seq(card_id) != seq {
                        tracing::debug!(%card_id, "update superseded, returning canonical card unmerged");
                        return Ok(canonical);
                    }
                    if let Some(board) = state.board.as_mut()
                        && let Some((li, ci)) = board.locate_card(card_id)
                    {
                        board.lists[li].cards[ci] = canonical.clone();
                    }
                }
                self.invalidate(board_id);
                self.publish(ClientMessage::CardUpdated(CardUpdated {
                    card_id,
                    board_id,
                    updates: patch,
                }))
                .await;
                Ok(canonical)
            }
            Err(e) => Err(self.fail(card_id, seq, board_id, snapshot, e).await),
        }
    }

    /// Move a card to `to_index` within `dest_list_id`, or within its
    /// current list when no destination is given.
    pub async fn move_card(
        &self,
        card_id: Uuid,
        dest_list_id: Option<Uuid>,
        to_index: usize,
    ) -> Result<Card, MutationError> {
        let (board_id, seq, snapshot, placement) = {
            let mut state = self.state.lock().await;
            let board = state.board.as_mut().ok_or(MutationError::NoBoard)?;
            // Resolve the destination before mutating so a same-list move
            // keeps its list id even when the caller omits it.
            let dest = match dest_list_id {
                Some(id) => id,
                None => {
                    board
                        .card(card_id)
                        .ok_or(OrderingError::UnknownCard(card_id))?
                        .list_id
                }
            };
            let snapshot = board.clone();
            let board_id = board.id;
            let placement = board.move_card(card_id, dest, to_index)?;
            let seq = state.bump(card_id);
            (board_id, seq, snapshot, placement)
        };

        let request = MoveCardRequest {
            board_id,
            list_id: placement.list_id,
            position: placement.position,
            previous_list_id: placement.previous_list_id,
        };

        match self.api.move_card(card_id, &request).await {
            Ok(canonical) => {
                {
                    let mut state = self.state.lock().await;
                    if state.current_seq(card_id) != seq {
                        tracing::debug!(%card_id, "move superseded, returning canonical card unmerged");
                        return Ok(canonical);
                    }
                    if let Some(board) = state.board.as_mut()
                        && let Some((li, ci)) = board.locate_card(card_id)
                    {
                        board.lists[li].cards[ci] = canonical.clone();
                    }
                }
                self.invalidate(board_id);
                self.publish(ClientMessage::CardMoved(CardMoved {
                    card_id,
                    board_id,
                    list_id: placement.list_id,
                    position: placement.position,
                    previous_list_id: placement.previous_list_id,
                }))
                .await;
                Ok(canonical)
            }
            Err(e) => Err(self.fail(card_id, seq, board_id, snapshot, e).await),
        }
    }

    /// Rewrite the sibling order of the open board's lists.
    pub async fn reorder_lists(
        &self,
        orders: &[ListPosition],
    ) -> Result<Vec<ListPosition>, MutationError> {
        let (board_id, seq, snapshot) = {
            let mut state = self.state.lock().await;
            let board = state.board.as_mut().ok_or(MutationError::NoBoard)?;
            let snapshot = board.clone();
            let board_id = board.id;
            board.apply_list_order(orders)?;
            let seq = state.bump(board_id);
            (board_id, seq, snapshot)
        };

        match self.api.reorder_lists(board_id, orders).await {
            Ok(canonical) => {
                {
                    let mut state = self.state.lock().await;
                    if state.current_seq(board_id) != seq {
                        tracing::debug!(%board_id, "reorder superseded, discarding canonical order");
                        return Ok(canonical);
                    }
                    if let Some(board) = state.board.as_mut()
                        && let Err(error) = board.apply_list_order(&canonical)
                    {
                        tracing::warn!(?error, "canonical list order references unknown lists");
                    }
                }
                self.invalidate(board_id);
                self.publish(ClientMessage::ListReordered(ListReordered {
                    board_id,
                    list_orders: canonical.clone(),
                }))
                .await;
                Ok(canonical)
            }
            Err(e) => Err(self.fail(board_id, seq, board_id, snapshot, e).await),
        }
    }

    /// Update board fields (title, background, pinned, soft-delete).
    pub async fn update_board(&self, patch: BoardPatch) -> Result<Board, MutationError> {
        let (board_id, seq, snapshot) = {
            let mut state = self.state.lock().await;
            let board = state.board.as_mut().ok_or(MutationError::NoBoard)?;
            let snapshot = board.clone();
            let board_id = board.id;
            patch.apply_to(board);
            let seq = state.bump(board_id);
            (board_id, seq, snapshot)
        };

        match self.api.update_board(board_id, &patch).await {
            Ok(canonical) => {
                {
                    let mut state = self.state.lock().await;
                    if state.current_seq(board_id) != seq {
                        tracing::debug!(%board_id, "update superseded, returning canonical board unmerged");
                        return Ok(canonical);
                    }
                    if let Some(board) = state.board.as_mut() {
                        merge_canonical_board(board, &canonical);
                    }
                }
                self.invalidate(board_id);
                // Collaborators converge on board fields through server
                // broadcasts.
                Ok(canonical)
            }
            Err(e) => Err(self.fail(board_id, seq, board_id, snapshot, e).await),
        }
    }

    fn prime(&self, board: &Board) {
        self.cache.set(
            cache::board_key(board.id),
            Cached::Board(board.clone()),
            CACHE_TTL,
        );
        self.cache.set(
            cache::board_lists_key(board.id),
            Cached::Lists(board.lists.clone()),
            CACHE_TTL,
        );
    }

    /// Sweep every key derived from this board plus all user board lists.
    fn invalidate(&self, board_id: Uuid) {
        self.cache.invalidate_pattern(&cache::board_pattern(board_id));
        self.cache.invalidate_pattern(&cache::user_boards_pattern());
    }

    async fn publish(&self, message: ClientMessage) {
        if self.publish_tx.send(message).await.is_err() {
            tracing::debug!("publish channel closed, dropping realtime event");
        }
    }

    /// Resolve a rejected mutation: restore the snapshot (unless a newer
    /// mutation superseded this one), then force a single refetch.
    async fn fail(
        &self,
        entity: Uuid,
        seq: u64,
        board_id: Uuid,
        snapshot: Board,
        error: ApiError,
    ) -> MutationError {
        {
            let mut state = self.state.lock().await;
            if state.current_seq(entity) != seq {
                tracing::debug!(%entity, "mutation superseded, discarding failure");
                return error.into();
            }
            state.board = Some(snapshot);
        }

        self.invalidate(board_id);
        if let Err(refetch_error) = self.refetch_board().await {
            tracing::warn!(?refetch_error, "refetch after failed mutation also failed");
        }
        error.into()
    }
}

/// Replace a list with its canonical row. List endpoints return rows
/// without nested cards, so an empty canonical card set keeps the local
/// cards.
fn merge_canonical_list(board: &mut Board, canonical: &List) {
    if let Some(list) = board.list_mut(canonical.id) {
        let local_cards = std::mem::take(&mut list.cards);
        *list = canonical.clone();
        if list.cards.is_empty() {
            list.cards = local_cards;
        }
    }
}

/// Replace board fields with the canonical row, keeping local lists when
/// the canonical payload does not nest them.
fn merge_canonical_board(board: &mut Board, canonical: &Board) {
    let local_lists = std::mem::take(&mut board.lists);
    *board = canonical.clone();
    if board.lists.is_empty() {
        board.lists = local_lists;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AttachmentUpload;
    use board::Attachment;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    struct Gate {
        entered: Notify,
        release: Notify,
    }

    /// Fake authoritative API that applies mutations to its own copy of the
    /// board, so canonical responses reflect post-mutation server state.
    struct MockApi {
        server: StdMutex<Board>,
        fail: StdMutex<HashSet<&'static str>>,
        calls: StdMutex<Vec<String>>,
        gate: StdMutex<Option<Arc<Gate>>>,
    }

    impl MockApi {
        fn new(board: Board) -> Arc<Self> {
            Arc::new(Self {
                server: StdMutex::new(board),
                fail: StdMutex::new(HashSet::new()),
                calls: StdMutex::new(Vec::new()),
                gate: StdMutex::new(None),
            })
        }

        fn fail_on(&self, method: &'static str) {
            self.fail.lock().unwrap().insert(method);
        }

        /// Park the next API call until `release` is notified; `entered`
        /// fires once the call is parked.
        fn gate_next(&self) -> Arc<Gate> {
            let gate = Arc::new(Gate {
                entered: Notify::new(),
                release: Notify::new(),
            });
            *self.gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        fn count(&self, method: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|m| *m == method)
                .count()
        }

        async fn enter(&self, method: &'static str) -> Result<(), ApiError> {
            self.calls.lock().unwrap().push(method.to_string());
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
            if self.fail.lock().unwrap().contains(method) {
                return Err(ApiError::Validation("rejected".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl BoardApi for MockApi {
        async fn list_boards(&self, _owner: Uuid) -> Result<Vec<Board>, ApiError> {
            self.enter("list_boards").await?;
            Ok(vec![self.server.lock().unwrap().clone()])
        }

        async fn fetch_board(&self, _board_id: Uuid) -> Result<Board, ApiError> {
            self.enter("fetch_board").await?;
            Ok(self.server.lock().unwrap().clone())
        }

        async fn create_list(&self, board_id: Uuid, title: &str) -> Result<List, ApiError> {
            self.enter("create_list").await?;
            let mut server = self.server.lock().unwrap();
            let list = List {
                id: Uuid::new_v4(),
                board_id,
                title: title.to_string(),
                position: server.lists.len() as i32,
                cards: vec![],
            };
            server.lists.push(list.clone());
            Ok(list)
        }

        async fn update_list(&self, list_id: Uuid, patch: &ListPatch) -> Result<List, ApiError> {
            self.enter("update_list").await?;
            let mut server = self.server.lock().unwrap();
            let list = server.list_mut(list_id).ok_or(ApiError::NotFound)?;
            patch.apply_to(list);
            // Row endpoints do not nest cards.
            let mut row = list.clone();
            row.cards = vec![];
            Ok(row)
        }

        async fn delete_list(&self, list_id: Uuid) -> Result<(), ApiError> {
            self.enter("delete_list").await?;
            let mut server = self.server.lock().unwrap();
            server.remove_list(list_id).map_err(|_| ApiError::NotFound)?;
            Ok(())
        }

        async fn create_card(&self, list_id: Uuid, title: &str) -> Result<Card, ApiError> {
            self.enter("create_card").await?;
            let mut server = self.server.lock().unwrap();
            let list = server.list_mut(list_id).ok_or(ApiError::NotFound)?;
            let card = Card {
                id: Uuid::new_v4(),
                list_id,
                title: title.to_string(),
                description: None,
                due_date: None,
                position: list.cards.len() as i32,
                members: vec![],
                attachments: vec![],
                labels: vec![],
            };
            list.cards.push(card.clone());
            Ok(card)
        }

        async fn update_card(&self, card_id: Uuid, patch: &CardPatch) -> Result<Card, ApiError> {
            self.enter("update_card").await?;
            let mut server = self.server.lock().unwrap();
            let (li, ci) = server.locate_card(card_id).ok_or(ApiError::NotFound)?;
            patch.apply_to(&mut server.lists[li].cards[ci]);
            Ok(server.lists[li].cards[ci].clone())
        }

        async fn move_card(
            &self,
            card_id: Uuid,
            request: &MoveCardRequest,
        ) -> Result<Card, ApiError> {
            self.enter("move_card").await?;
            let mut server = self.server.lock().unwrap();
            server
                .move_card(card_id, request.list_id, request.position as usize)
                .map_err(|_| ApiError::NotFound)?;
            server.card(card_id).cloned().ok_or(ApiError::NotFound)
        }

        async fn reorder_lists(
            &self,
            _board_id: Uuid,
            orders: &[ListPosition],
        ) -> Result<Vec<ListPosition>, ApiError> {
            self.enter("reorder_lists").await?;
            let mut server = self.server.lock().unwrap();
            server.apply_list_order(orders).map_err(|_| ApiError::NotFound)?;
            Ok(server.list_order())
        }

        async fn update_board(&self, _board_id: Uuid, patch: &BoardPatch) -> Result<Board, ApiError> {
            self.enter("update_board").await?;
            let mut server = self.server.lock().unwrap();
            patch.apply_to(&mut server);
            // Row endpoints do not nest lists.
            let mut row = server.clone();
            row.lists = vec![];
            Ok(row)
        }

        async fn upload_attachment(
            &self,
            _card_id: Uuid,
            upload: &AttachmentUpload,
        ) -> Result<Attachment, ApiError> {
            self.enter("upload_attachment").await?;
            Ok(Attachment {
                id: Uuid::new_v4(),
                url: format!("https://files.example/{}", upload.file_name),
                size: 0,
                mime_type: upload.mime_type.clone(),
            })
        }
    }

    fn list_with_cards(board_id: Uuid, title: &str, cards: &[&str]) -> List {
        let list_id = Uuid::new_v4();
        List {
            id: list_id,
            board_id,
            title: title.to_string(),
            position: 0,
            cards: cards
                .iter()
                .enumerate()
                .map(|(i, t)| Card {
                    id: Uuid::new_v4(),
                    list_id,
                    title: t.to_string(),
                    description: None,
                    due_date: None,
                    position: i as i32,
                    members: vec![],
                    attachments: vec![],
                    labels: vec![],
                })
                .collect(),
        }
    }

    /// Two lists: "Todo" holding A, B, C and "Done" holding D.
    fn board_fixture() -> Board {
        let board_id = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let mut board = Board {
            id: board_id,
            organization_id: Uuid::new_v4(),
            owner_id: owner,
            title: "Sprint".to_string(),
            background: None,
            pinned: false,
            deleted: false,
            members: vec![owner],
            lists: vec![
                list_with_cards(board_id, "Todo", &["A", "B", "C"]),
                list_with_cards(board_id, "Done", &["D"]),
            ],
        };
        for (i, list) in board.lists.iter_mut().enumerate() {
            list.position = i as i32;
        }
        board
    }

    async fn sync_with(
        api: Arc<MockApi>,
        board: &Board,
    ) -> (BoardSync, mpsc::Receiver<ClientMessage>) {
        let (tx, rx) = mpsc::channel(16);
        let sync = BoardSync::new(api, tx);
        sync.board_snapshot(board.id).await.unwrap();
        (sync, rx)
    }

    #[tokio::test]
    async fn test_cross_list_move_confirms_and_publishes() {
        let board = board_fixture();
        let api = MockApi::new(board.clone());
        let (sync, mut rx) = sync_with(api.clone(), &board).await;

        let card_b = board.lists[0].cards[1].id;
        let todo = board.lists[0].id;
        let done = board.lists[1].id;

        let moved = sync.move_card(card_b, Some(done), 1).await.unwrap();
        assert_eq!(moved.list_id, done);
        assert_eq!(moved.position, 1);
        assert_eq!(api.count("move_card"), 1);

        let current = sync.current().await.unwrap();
        assert_eq!(current.list(todo).unwrap().cards.len(), 2);
        assert_eq!(current.list(done).unwrap().cards.len(), 2);

        match rx.try_recv().unwrap() {
            ClientMessage::CardMoved(payload) => {
                assert_eq!(payload.card_id, card_b);
                assert_eq!(payload.list_id, done);
                assert_eq!(payload.position, 1);
                assert_eq!(payload.previous_list_id, Some(todo));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_same_list_move_defaults_destination() {
        let board = board_fixture();
        let api = MockApi::new(board.clone());
        let (sync, mut rx) = sync_with(api.clone(), &board).await;

        let card_a = board.lists[0].cards[0].id;
        let todo = board.lists[0].id;

        let moved = sync.move_card(card_a, None, 2).await.unwrap();
        assert_eq!(moved.list_id, todo);
        assert_eq!(moved.position, 2);

        match rx.try_recv().unwrap() {
            ClientMessage::CardMoved(payload) => {
                assert_eq!(payload.previous_list_id, None);
                assert_eq!(payload.position, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_mutation_rolls_back_and_refetches_once() {
        let board = board_fixture();
        let api = MockApi::new(board.clone());
        let (sync, _rx) = sync_with(api.clone(), &board).await;
        api.fail_on("update_card");

        let card_a = board.lists[0].cards[0].id;
        let before = sync.current().await.unwrap();
        let patch = CardPatch {
            title: Some("renamed".to_string()),
            ..Default::default()
        };

        let err = sync.update_card(card_a, patch).await.unwrap_err();
        assert!(matches!(err, MutationError::Api(ApiError::Validation(_))));

        assert_eq!(sync.current().await.unwrap(), before);
        // The initial load plus exactly one forced refetch.
        assert_eq!(api.count("fetch_board"), 2);
    }

    #[tokio::test]
    async fn test_create_list_adopts_canonical_row() {
        let board = board_fixture();
        let api = MockApi::new(board.clone());
        let (sync, mut rx) = sync_with(api.clone(), &board).await;

        let created = sync.create_list("Review").await.unwrap();
        assert_eq!(created.position, 2);

        let current = sync.current().await.unwrap();
        assert_eq!(current.lists.len(), 3);
        assert!(current.list(created.id).is_some());

        match rx.try_recv().unwrap() {
            ClientMessage::ListCreated(payload) => assert_eq!(payload.list.id, created.id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reorder_lists_applies_canonical_order_and_publishes() {
        let board = board_fixture();
        let api = MockApi::new(board.clone());
        let (sync, mut rx) = sync_with(api.clone(), &board).await;

        let todo = board.lists[0].id;
        let done = board.lists[1].id;
        let orders = vec![
            ListPosition {
                id: done,
                position: 0,
            },
            ListPosition {
                id: todo,
                position: 1,
            },
        ];

        let canonical = sync.reorder_lists(&orders).await.unwrap();
        assert_eq!(canonical, orders);
        assert_eq!(api.count("reorder_lists"), 1);

        let current = sync.current().await.unwrap();
        assert_eq!(current.lists[0].id, done);
        assert_eq!(current.lists[1].id, todo);
        assert_eq!(current.lists[0].position, 0);
        assert_eq!(current.lists[1].position, 1);

        match rx.try_recv().unwrap() {
            ClientMessage::ListReordered(payload) => {
                assert_eq!(payload.board_id, board.id);
                assert_eq!(payload.list_orders, orders);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_titles_rejected_locally() {
        let board = board_fixture();
        let api = MockApi::new(board.clone());
        let (sync, _rx) = sync_with(api.clone(), &board).await;

        let err = sync.create_list("   ").await.unwrap_err();
        assert!(matches!(err, MutationError::Validation(_)));
        assert_eq!(api.count("create_list"), 0);

        let list_id = board.lists[0].id;
        let err = sync.create_card(list_id, "").await.unwrap_err();
        assert!(matches!(err, MutationError::Validation(_)));
        assert_eq!(api.count("create_card"), 0);
    }

    #[tokio::test]
    async fn test_update_board_invalidates_boards_cache() {
        let board = board_fixture();
        let api = MockApi::new(board.clone());
        let (sync, mut rx) = sync_with(api.clone(), &board).await;

        sync.boards(board.owner_id).await.unwrap();
        sync.boards(board.owner_id).await.unwrap();
        assert_eq!(api.count("list_boards"), 1);

        let patch = BoardPatch {
            title: Some("Renamed".to_string()),
            ..Default::default()
        };
        sync.update_board(patch).await.unwrap();
        assert!(!sync.cache().has(&cache::user_boards_key(board.owner_id)));

        // The canonical row carries no lists; the local ones survive the merge.
        let current = sync.current().await.unwrap();
        assert_eq!(current.title, "Renamed");
        assert_eq!(current.lists.len(), 2);

        sync.boards(board.owner_id).await.unwrap();
        assert_eq!(api.count("list_boards"), 2);

        // Board field updates are not republished by the client.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refetch_discards_entities_removed_upstream() {
        let board = board_fixture();
        let api = MockApi::new(board.clone());
        let (sync, _rx) = sync_with(api.clone(), &board).await;

        let card_d = board.lists[1].cards[0].id;
        {
            let mut server = api.server.lock().unwrap();
            let (li, ci) = server.locate_card(card_d).unwrap();
            server.lists[li].cards.remove(ci);
        }

        sync.refetch_board().await.unwrap();
        assert!(sync.current().await.unwrap().card(card_d).is_none());
    }

    #[tokio::test]
    async fn test_superseded_mutation_keeps_newest_local_state() {
        let board = board_fixture();
        let api = MockApi::new(board.clone());
        let (sync, _rx) = sync_with(api.clone(), &board).await;
        let sync = Arc::new(sync);

        let card_a = board.lists[0].cards[0].id;
        let gate = api.gate_next();

        let first = {
            let sync = sync.clone();
            tokio::spawn(async move {
                let patch = CardPatch {
                    title: Some("first".to_string()),
                    ..Default::default()
                };
                sync.update_card(card_a, patch).await
            })
        };
        gate.entered.notified().await;

        let patch = CardPatch {
            title: Some("second".to_string()),
            ..Default::default()
        };
        sync.update_card(card_a, patch).await.unwrap();

        gate.release.notify_one();
        let canonical = first.await.unwrap().unwrap();
        // The caller still gets its server result, but the projection keeps
        // the newer mutation.
        assert_eq!(canonical.title, "first");
        let current = sync.current().await.unwrap();
        assert_eq!(current.card(card_a).unwrap().title, "second");
        assert_eq!(api.count("fetch_board"), 1);
    }

    #[tokio::test]
    async fn test_board_lists_read_invalidated_by_mutations() {
        let board = board_fixture();
        let api = MockApi::new(board.clone());
        let (sync, _rx) = sync_with(api.clone(), &board).await;

        // The snapshot primed the lists key; this read costs no fetch.
        let lists = sync.board_lists(board.id).await.unwrap();
        assert_eq!(lists.len(), 2);
        assert_eq!(api.count("fetch_board"), 1);

        sync.create_list("Review").await.unwrap();

        // The mutation swept the board's keys, so the next read refetches.
        let lists = sync.board_lists(board.id).await.unwrap();
        assert_eq!(lists.len(), 3);
        assert_eq!(api.count("fetch_board"), 2);
    }

    #[tokio::test]
    async fn test_board_snapshot_serves_cached_reads() {
        let board = board_fixture();
        let api = MockApi::new(board.clone());
        let (tx, _rx) = mpsc::channel(16);
        let sync = BoardSync::new(api.clone(), tx);

        sync.board_snapshot(board.id).await.unwrap();
        sync.board_snapshot(board.id).await.unwrap();
        assert_eq!(api.count("fetch_board"), 1);
    }

    #[tokio::test]
    async fn test_list_updates_and_deletes_stay_quiet() {
        let board = board_fixture();
        let api = MockApi::new(board.clone());
        let (sync, mut rx) = sync_with(api.clone(), &board).await;

        let todo = board.lists[0].id;
        let done = board.lists[1].id;

        let patch = ListPatch {
            title: Some("Later".to_string()),
        };
        let updated = sync.update_list(todo, patch).await.unwrap();
        assert_eq!(updated.title, "Later");
        // The canonical row has no nested cards; the local ones survive.
        let current = sync.current().await.unwrap();
        assert_eq!(current.list(todo).unwrap().cards.len(), 3);

        sync.delete_list(done).await.unwrap();
        assert!(sync.current().await.unwrap().list(done).is_none());

        assert!(rx.try_recv().is_err());
    }
}
