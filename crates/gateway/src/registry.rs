//! Connection registry for the realtime gateway.
//!
//! Central record of every authenticated socket: which organization room it
//! sits in, which board rooms it has joined, and the userId directory used
//! for targeted sends. Injected into sessions and into server-side
//! collaborators (the REST layer broadcasting deletes), and swappable for a
//! distributed backing store if fan-out ever leaves this process.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use board::protocol::ServerMessage;

use crate::auth::AuthContext;

/// Handle for sending messages to one authenticated connection.
#[derive(Debug, Clone)]
pub struct Connection {
    /// User behind the socket
    pub user_id: Uuid,
    /// Organization room the connection was placed in at registration
    pub organization_id: Uuid,
    /// Channel draining into the socket's send half
    pub sender: mpsc::Sender<ServerMessage>,
    /// When the connection was registered
    pub connected_at: DateTime<Utc>,
    /// Board rooms this connection has joined
    pub boards: HashSet<Uuid>,
}

/// Registry of all live connections.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// Map of connection_id -> connection
    connections: HashMap<Uuid, Connection>,
    /// Map of organization_id -> connection ids
    org_rooms: HashMap<Uuid, Vec<Uuid>>,
    /// Map of board_id -> connection ids
    board_rooms: HashMap<Uuid, Vec<Uuid>>,
    /// Map of user_id -> connection ids (one user may hold several sockets)
    users: HashMap<Uuid, Vec<Uuid>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
        }
    }

    /// Register an authenticated connection, placing it in its organization
    /// room and the user directory.
    pub async fn register(
        &self,
        connection_id: Uuid,
        ctx: AuthContext,
        sender: mpsc::Sender<ServerMessage>,
    ) {
        let mut inner = self.inner.write().await;

        let connection = Connection {
            user_id: ctx.user_id,
            organization_id: ctx.organization_id,
            sender,
            connected_at: Utc::now(),
            boards: HashSet::new(),
        };

        inner.connections.insert(connection_id, connection);
        inner
            .org_rooms
            .entry(ctx.organization_id)
            .or_default()
            .push(connection_id);
        inner
            .users
            .entry(ctx.user_id)
            .or_default()
            .push(connection_id);

        tracing::info!(
            connection_id = %connection_id,
            user_id = %ctx.user_id,
            organization_id = %ctx.organization_id,
            "connection registered"
        );
    }

    /// Unregister a connection, removing it from every room and the user
    /// directory.
    pub async fn unregister(&self, connection_id: Uuid) {
        let mut inner = self.inner.write().await;

        if let Some(conn) = inner.connections.remove(&connection_id) {
            if let Some(members) = inner.org_rooms.get_mut(&conn.organization_id) {
                members.retain(|id| *id != connection_id);
                if members.is_empty() {
                    inner.org_rooms.remove(&conn.organization_id);
                }
            }
            for board_id in &conn.boards {
                if let Some(members) = inner.board_rooms.get_mut(board_id) {
                    members.retain(|id| *id != connection_id);
                    if members.is_empty() {
                        inner.board_rooms.remove(board_id);
                    }
                }
            }
            if let Some(conns) = inner.users.get_mut(&conn.user_id) {
                conns.retain(|id| *id != connection_id);
                if conns.is_empty() {
                    inner.users.remove(&conn.user_id);
                }
            }

            tracing::info!(
                connection_id = %connection_id,
                user_id = %conn.user_id,
                organization_id = %conn.organization_id,
                "connection unregistered"
            );
        }
    }

    /// Add a connection to a board room.
    pub async fn join_board(&self, connection_id: Uuid, board_id: Uuid) {
        let mut inner = self.inner.write().await;

        let Some(conn) = inner.connections.get_mut(&connection_id) else {
            return;
        };
        if !conn.boards.insert(board_id) {
            return; // already a member
        }
        inner
            .board_rooms
            .entry(board_id)
            .or_default()
            .push(connection_id);

        tracing::debug!(
            connection_id = %connection_id,
            board_id = %board_id,
            "joined board room"
        );
    }

    /// Remove a connection from a board room.
    pub async fn leave_board(&self, connection_id: Uuid, board_id: Uuid) {
        let mut inner = self.inner.write().await;

        let Some(conn) = inner.connections.get_mut(&connection_id) else {
            return;
        };
        if !conn.boards.remove(&board_id) {
            return;
        }
        if let Some(members) = inner.board_rooms.get_mut(&board_id) {
            members.retain(|id| *id != connection_id);
            if members.is_empty() {
                inner.board_rooms.remove(&board_id);
            }
        }

        tracing::debug!(
            connection_id = %connection_id,
            board_id = %board_id,
            "left board room"
        );
    }

    /// Look up all connection ids for a user.
    pub async fn resolve(&self, user_id: Uuid) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        inner.users.get(&user_id).cloned().unwrap_or_default()
    }

    /// Send a message to every member of a board room, optionally excluding
    /// one connection (the originator).
    ///
    /// Delivery is best-effort: a full or closed channel marks the member
    /// failed and the message is dropped for it, never retried.
    pub async fn broadcast_to_board(
        &self,
        board_id: Uuid,
        exclude: Option<Uuid>,
        message: ServerMessage,
    ) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        let mut failed = Vec::new();

        if let Some(members) = inner.board_rooms.get(&board_id) {
            for connection_id in members {
                if Some(*connection_id) == exclude {
                    continue;
                }
                if let Some(conn) = inner.connections.get(connection_id)
                    && conn.sender.try_send(message.clone()).is_err()
                {
                    failed.push(*connection_id);
                }
            }
        }

        failed
    }

    /// Send a message to every connection in an organization room.
    pub async fn broadcast_to_organization(
        &self,
        organization_id: Uuid,
        message: ServerMessage,
    ) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        let mut failed = Vec::new();

        if let Some(members) = inner.org_rooms.get(&organization_id) {
            for connection_id in members {
                if let Some(conn) = inner.connections.get(connection_id)
                    && conn.sender.try_send(message.clone()).is_err()
                {
                    failed.push(*connection_id);
                }
            }
        }

        failed
    }

    /// Send a message to every connection a user currently holds.
    pub async fn send_to_user(
        &self,
        user_id: Uuid,
        message: ServerMessage,
    ) -> Result<(), SendError> {
        let inner = self.inner.read().await;

        let connection_ids = inner.users.get(&user_id).ok_or(SendError::NotConnected)?;

        let mut delivered = 0usize;
        for connection_id in connection_ids {
            if let Some(conn) = inner.connections.get(connection_id)
                && conn.sender.try_send(message.clone()).is_ok()
            {
                delivered += 1;
            }
        }

        if delivered == 0 {
            return Err(SendError::ChannelClosed);
        }
        Ok(())
    }

    /// Connection ids currently in a board room.
    pub async fn board_members(&self, board_id: Uuid) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        inner.board_rooms.get(&board_id).cloned().unwrap_or_default()
    }

    /// Whether a connection is registered.
    pub async fn is_connected(&self, connection_id: Uuid) -> bool {
        let inner = self.inner.read().await;
        inner.connections.contains_key(&connection_id)
    }

    /// Total number of registered connections.
    pub async fn connection_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.connections.len()
    }
}

/// Error when sending to a specific user.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("user not connected")]
    NotConnected,
    #[error("channel closed")]
    ChannelClosed,
}
