//! WebSocket session lifecycle for client connections.
//!
//! Each socket must authenticate with its first frame, then enters the main
//! loop: outbound messages drain from the registry channel, inbound frames
//! are parsed and dispatched. A failed handshake closes the socket without a
//! payload.

use std::{sync::Arc, time::Duration};

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{Span, instrument};
use uuid::Uuid;

use board::protocol::{ClientMessage, ServerMessage};

use crate::{
    auth::{AuthContext, CredentialVerifier},
    dispatch::{Dispatch, RoomChange, SessionCtx, Target, dispatch},
    registry::ConnectionRegistry,
};

/// Time allowed for the authenticate frame.
const AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Channel buffer size for outgoing messages.
const OUTGOING_BUFFER_SIZE: usize = 64;

/// Handle a new client WebSocket connection.
#[instrument(
    name = "gateway.session",
    skip(socket, registry, verifier),
    fields(
        connection_id = tracing::field::Empty,
        user_id = tracing::field::Empty,
        org_id = tracing::field::Empty
    )
)]
pub async fn handle(
    socket: WebSocket,
    registry: ConnectionRegistry,
    verifier: Arc<dyn CredentialVerifier>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTGOING_BUFFER_SIZE);

    let auth = match wait_for_auth(&mut ws_receiver, verifier.as_ref()).await {
        Ok(ctx) => ctx,
        Err(error) => {
            // Close without a payload; the client learns nothing beyond the
            // disconnect itself.
            tracing::info!(?error, "connection authentication failed");
            return;
        }
    };

    let connection_id = Uuid::new_v4();
    Span::current().record("connection_id", format_args!("{connection_id}"));
    Span::current().record("user_id", format_args!("{}", auth.user_id));
    Span::current().record("org_id", format_args!("{}", auth.organization_id));

    registry.register(connection_id, auth, tx).await;
    let mut ctx = SessionCtx::new(connection_id, auth.user_id, auth.organization_id);

    tracing::info!(
        connection_id = %connection_id,
        user_id = %auth.user_id,
        "session started"
    );

    loop {
        tokio::select! {
            // Outgoing messages fanned in from other sessions
            Some(msg) = rx.recv() => {
                if send_message(&mut ws_sender, &msg).await.is_err() {
                    break;
                }
            }

            // Incoming frames from the client
            maybe_message = ws_receiver.next() => {
                match maybe_message {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Authenticate { .. }) => {
                                tracing::warn!(
                                    connection_id = %connection_id,
                                    "received unexpected authenticate message"
                                );
                            }
                            Ok(msg) => {
                                let result = dispatch(&ctx, &msg, Utc::now());
                                apply(&mut ctx, &registry, result).await;
                            }
                            Err(error) => {
                                tracing::debug!(?error, "invalid client message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::debug!("client sent close frame");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {
                        // Ignore other message types
                    }
                    Some(Err(error)) => {
                        tracing::debug!(?error, "websocket receive error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    registry.unregister(connection_id).await;

    tracing::info!(connection_id = %connection_id, "session ended");
}

/// Handshake error.
#[derive(Debug, thiserror::Error)]
enum HandshakeError {
    #[error("timeout waiting for authenticate message")]
    Timeout,
    #[error("connection closed before authenticate")]
    ConnectionClosed,
    #[error("invalid handshake message: {0}")]
    InvalidMessage(String),
    #[error("credential rejected: {0}")]
    Rejected(#[from] crate::auth::AuthError),
}

/// Wait for and verify the authenticate frame.
async fn wait_for_auth(
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    verifier: &dyn CredentialVerifier,
) -> Result<AuthContext, HandshakeError> {
    let message = tokio::time::timeout(AUTH_TIMEOUT, receiver.next())
        .await
        .map_err(|_| HandshakeError::Timeout)?
        .ok_or(HandshakeError::ConnectionClosed)?
        .map_err(|e| HandshakeError::InvalidMessage(e.to_string()))?;

    let text = match message {
        Message::Text(text) => text,
        _ => {
            return Err(HandshakeError::InvalidMessage(
                "expected text message".to_string(),
            ));
        }
    };

    let client_msg: ClientMessage =
        serde_json::from_str(&text).map_err(|e| HandshakeError::InvalidMessage(e.to_string()))?;

    let token = match client_msg {
        ClientMessage::Authenticate { token } => token,
        _ => {
            return Err(HandshakeError::InvalidMessage(
                "expected authenticate message".to_string(),
            ));
        }
    };

    Ok(verifier.verify(&token).await?)
}

/// Apply a dispatch result: mirror room changes into the registry and fan
/// out broadcasts.
async fn apply(ctx: &mut SessionCtx, registry: &ConnectionRegistry, result: Dispatch) {
    for change in result.room_changes {
        match change {
            RoomChange::Join(board_id) => {
                if ctx.joined.insert(board_id) {
                    registry.join_board(ctx.connection_id, board_id).await;
                }
            }
            RoomChange::Leave(board_id) => {
                if ctx.joined.remove(&board_id) {
                    registry.leave_board(ctx.connection_id, board_id).await;
                }
            }
        }
    }

    for outbound in result.outgoing {
        match outbound.target {
            Target::Board { board_id, exclude } => {
                let failed = registry
                    .broadcast_to_board(board_id, exclude, outbound.message)
                    .await;
                if !failed.is_empty() {
                    tracing::warn!(
                        board_id = %board_id,
                        failed_count = failed.len(),
                        "failed to deliver broadcast to some connections"
                    );
                }
            }
        }
    }
}

/// Send a message to the WebSocket.
async fn send_message(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), ()> {
    match serde_json::to_string(msg) {
        Ok(json) => sender
            .send(Message::Text(json.into()))
            .await
            .map_err(|error| {
                tracing::debug!(?error, "failed to send websocket message");
            }),
        Err(error) => {
            tracing::error!(?error, "failed to serialize message");
            Err(())
        }
    }
}
