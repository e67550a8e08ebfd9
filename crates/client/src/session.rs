//! A live board session: coordinator plus realtime subscription.
//!
//! Remote changes are handled by refetching the open board rather than
//! patching the projection in place; the broadcast is a notification, the
//! REST API stays the source of truth.

use std::sync::Arc;

use board::protocol::{ClientMessage, Typing};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::BoardApi;
use crate::optimistic::BoardSync;
use crate::subscriber::{BoardSubscriber, SubscriberConfig, SubscriberError, SyncEvent};

pub struct BoardSession {
    /// The mutation coordinator; share this with UI code.
    pub sync: Arc<BoardSync>,
    events: mpsc::Receiver<SyncEvent>,
    publish_tx: mpsc::Sender<ClientMessage>,
    board_id: Uuid,
    subscriber_task: JoinHandle<()>,
    pump_task: JoinHandle<()>,
}

impl BoardSession {
    /// Open a session: spawn the subscriber loop and the event pump, and
    /// wire the coordinator's publishes into the room.
    pub fn spawn(config: SubscriberConfig, api: Arc<dyn BoardApi>) -> Self {
        let board_id = config.board_id;
        let (subscriber, event_rx, publish_tx, publish_rx) = BoardSubscriber::new(config);
        let sync = Arc::new(BoardSync::new(api, publish_tx.clone()));

        let subscriber_task = tokio::spawn(subscriber.run(publish_rx));

        let (out_tx, out_rx) = mpsc::channel(64);
        let pump_task = tokio::spawn(pump_events(event_rx, out_tx, sync.clone()));

        Self {
            sync,
            events: out_rx,
            publish_tx,
            board_id,
            subscriber_task,
            pump_task,
        }
    }

    /// Receive the next sync event. Returns `None` once the session is
    /// shut down.
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        self.events.recv().await
    }

    /// Send a typing indicator for the session's board.
    pub async fn typing(&self, is_typing: bool) -> Result<(), SubscriberError> {
        self.publish_tx
            .send(ClientMessage::Typing(Typing {
                board_id: self.board_id,
                is_typing,
            }))
            .await
            .map_err(|_| SubscriberError::Send("channel closed".to_string()))
    }

    /// Tear the session down.
    pub fn shutdown(self) {
        self.subscriber_task.abort();
        self.pump_task.abort();
    }
}

/// Forward subscriber events to the session consumer, refetching the open
/// board whenever a collaborator changes it.
async fn pump_events(
    mut event_rx: mpsc::Receiver<SyncEvent>,
    out_tx: mpsc::Sender<SyncEvent>,
    sync: Arc<BoardSync>,
) {
    while let Some(event) = event_rx.recv().await {
        if let SyncEvent::RemoteChange(change) = &event {
            tracing::debug!(board_id = %change.board_id(), "remote change, refetching board");
            if let Err(error) = sync.refetch_board().await {
                tracing::warn!(?error, "refetch after remote change failed");
            }
        }
        if out_tx.send(event).await.is_err() {
            break;
        }
    }
}
