//! Realtime subscriber for board rooms.
//!
//! Connects a client to the sync gateway over WebSocket, authenticates,
//! joins one board room, and surfaces room broadcasts as [`SyncEvent`]s.
//! The connection loop reconnects forever with exponential backoff; a
//! rejected handshake shows up as a server-side close and lands in the
//! same path.

use std::{sync::Arc, time::Duration};

use board::protocol::{
    CardUpdate, ClientMessage, JoinBoard, ListUpdate, ServerMessage, Typing, UserJoined, UserTyping,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;
use uuid::Uuid;

/// Reconnection delay on connection failure.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Maximum reconnection delay (for exponential backoff).
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Configuration for the board subscriber.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Gateway URL (e.g., "wss://sync.example.com")
    pub gateway_url: String,
    /// Token presented in the socket handshake
    pub token: String,
    /// Board room to join after authenticating
    pub board_id: Uuid,
}

/// A change made by another collaborator, carried by a room broadcast.
#[derive(Debug, Clone)]
pub enum RemoteChange {
    Card(CardUpdate),
    List(ListUpdate),
}

impl RemoteChange {
    pub fn board_id(&self) -> Uuid {
        match self {
            RemoteChange::Card(update) => update.board_id,
            RemoteChange::List(update) => update.board_id,
        }
    }
}

/// Events emitted by the subscriber.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Connected to the gateway and joined the board room
    Connected,
    /// Disconnected from the gateway
    Disconnected { reason: String },
    /// Another collaborator changed the board
    RemoteChange(RemoteChange),
    /// Presence: a collaborator is typing
    UserTyping(UserTyping),
    /// Presence: a collaborator joined the room
    UserJoined(UserJoined),
}

/// State of the gateway connection.
#[derive(Debug, Clone, Default)]
struct ConnectionState {
    connected: bool,
}

/// Client for one board's realtime room.
pub struct BoardSubscriber {
    config: SubscriberConfig,
    state: Arc<RwLock<ConnectionState>>,
    event_tx: mpsc::Sender<SyncEvent>,
    publish_tx: mpsc::Sender<ClientMessage>,
}

impl BoardSubscriber {
    /// Create a new board subscriber.
    ///
    /// Returns:
    /// - The subscriber itself
    /// - A receiver for sync events
    /// - A sender for outgoing client messages
    /// - A receiver for outgoing messages (pass this to `run()`)
    pub fn new(
        config: SubscriberConfig,
    ) -> (
        Self,
        mpsc::Receiver<SyncEvent>,
        mpsc::Sender<ClientMessage>,
        mpsc::Receiver<ClientMessage>,
    ) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (publish_tx, publish_rx) = mpsc::channel(64);

        let subscriber = Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::default())),
            event_tx,
            publish_tx: publish_tx.clone(),
        };

        (subscriber, event_rx, publish_tx, publish_rx)
    }

    /// Start the connection loop (call this in a spawned task).
    pub async fn run(self, mut publish_rx: mpsc::Receiver<ClientMessage>) {
        let mut reconnect_delay = RECONNECT_DELAY;

        loop {
            match self.connect_and_run(&mut publish_rx).await {
                Ok(()) => {
                    // Clean disconnect
                    tracing::info!("gateway connection closed cleanly");
                    reconnect_delay = RECONNECT_DELAY;
                    let _ = self
                        .event_tx
                        .send(SyncEvent::Disconnected {
                            reason: "connection closed".to_string(),
                        })
                        .await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "gateway connection error");
                    let _ = self
                        .event_tx
                        .send(SyncEvent::Disconnected {
                            reason: e.to_string(),
                        })
                        .await;
                }
            }

            // Update state
            {
                let mut state = self.state.write().await;
                state.connected = false;
            }

            // Wait before reconnecting with exponential backoff
            tracing::info!(
                delay_secs = reconnect_delay.as_secs(),
                "reconnecting to gateway"
            );
            tokio::time::sleep(reconnect_delay).await;
            reconnect_delay = std::cmp::min(reconnect_delay * 2, MAX_RECONNECT_DELAY);
        }
    }

    /// Connect to the gateway, join the board room, and run the message
    /// loop.
    async fn connect_and_run(
        &self,
        publish_rx: &mut mpsc::Receiver<ClientMessage>,
    ) -> Result<(), SubscriberError> {
        let ws_url = self.build_ws_url()?;
        tracing::info!(url = %ws_url, "connecting to gateway");

        let (ws_stream, _response) = connect_async(&ws_url)
            .await
            .map_err(|e| SubscriberError::Connection(e.to_string()))?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // Authenticate, then join the board room. The gateway answers a
        // bad token by closing the socket without a payload, so a rejected
        // handshake surfaces as a disconnect.
        let auth = ClientMessage::Authenticate {
            token: self.config.token.clone(),
        };
        let json =
            serde_json::to_string(&auth).map_err(|e| SubscriberError::Serde(e.to_string()))?;
        ws_sender
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| SubscriberError::Send(e.to_string()))?;

        let join = ClientMessage::JoinBoard(JoinBoard {
            board_id: self.config.board_id,
        });
        let json =
            serde_json::to_string(&join).map_err(|e| SubscriberError::Serde(e.to_string()))?;
        ws_sender
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| SubscriberError::Send(e.to_string()))?;

        // Update state
        {
            let mut state = self.state.write().await;
            state.connected = true;
        }

        let _ = self.event_tx.send(SyncEvent::Connected).await;
        tracing::info!(board_id = %self.config.board_id, "joined board room");

        // Message loop
        loop {
            tokio::select! {
                // Handle broadcasts from the gateway
                maybe_message = ws_receiver.next() => {
                    match maybe_message {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_server_message(&text).await {
                                tracing::debug!(error = %e, "ignoring unparseable gateway message");
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::debug!("gateway sent close frame");
                            return Ok(());
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                                return Err(SubscriberError::Send(e.to_string()));
                            }
                        }
                        Some(Ok(_)) => {
                            // Ignore other message types
                        }
                        Some(Err(e)) => {
                            return Err(SubscriberError::Connection(e.to_string()));
                        }
                        None => {
                            return Err(SubscriberError::Connection("connection closed".to_string()));
                        }
                    }
                }

                // Forward the application's own changes to the room
                Some(message) = publish_rx.recv() => {
                    let json = serde_json::to_string(&message)
                        .map_err(|e| SubscriberError::Serde(e.to_string()))?;
                    ws_sender.send(Message::Text(json.into())).await
                        .map_err(|e| SubscriberError::Send(e.to_string()))?;
                }
            }
        }
    }

    /// Build the WebSocket URL for connecting to the gateway.
    fn build_ws_url(&self) -> Result<Url, SubscriberError> {
        let mut url = Url::parse(&self.config.gateway_url)
            .map_err(|e| SubscriberError::Url(e.to_string()))?;

        // Convert http(s) to ws(s) if needed
        match url.scheme() {
            "http" => url
                .set_scheme("ws")
                .map_err(|()| SubscriberError::Url("failed to set scheme".to_string()))?,
            "https" => url
                .set_scheme("wss")
                .map_err(|()| SubscriberError::Url("failed to set scheme".to_string()))?,
            "ws" | "wss" => {}
            other => {
                return Err(SubscriberError::Url(format!("unsupported scheme: {other}")));
            }
        }

        url.set_path("/ws");

        Ok(url)
    }

    /// Handle a broadcast from the gateway.
    async fn handle_server_message(&self, text: &str) -> Result<(), SubscriberError> {
        let message: ServerMessage =
            serde_json::from_str(text).map_err(|e| SubscriberError::Serde(e.to_string()))?;

        match message {
            ServerMessage::CardUpdate(update) => {
                tracing::debug!(
                    board_id = %update.board_id,
                    kind = ?update.kind,
                    "remote card change"
                );
                let _ = self
                    .event_tx
                    .send(SyncEvent::RemoteChange(RemoteChange::Card(update)))
                    .await;
            }
            ServerMessage::ListUpdate(update) => {
                tracing::debug!(
                    board_id = %update.board_id,
                    kind = ?update.kind,
                    "remote list change"
                );
                let _ = self
                    .event_tx
                    .send(SyncEvent::RemoteChange(RemoteChange::List(update)))
                    .await;
            }
            ServerMessage::UserTyping(typing) => {
                let _ = self.event_tx.send(SyncEvent::UserTyping(typing)).await;
            }
            ServerMessage::UserJoined(joined) => {
                let _ = self.event_tx.send(SyncEvent::UserJoined(joined)).await;
            }
        }

        Ok(())
    }

    /// Check if connected to the gateway.
    pub async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }

    /// Send a typing indicator for the joined board.
    pub async fn typing(&self, is_typing: bool) -> Result<(), SubscriberError> {
        self.publish_tx
            .send(ClientMessage::Typing(Typing {
                board_id: self.config.board_id,
                is_typing,
            }))
            .await
            .map_err(|_| SubscriberError::Send("channel closed".to_string()))
    }
}

/// Errors from the board subscriber.
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("url error: {0}")]
    Url(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("send error: {0}")]
    Send(String),
}
