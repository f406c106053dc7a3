//! In-memory registry of live chat connections.
//!
//! Maps each authenticated user to at most one connection. The registry lives
//! in this process only: a recipient connected to another server process is
//! invisible here and will only see the message on its next history pull.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use community_shared::UserId;

use crate::realtime::OutboundFrame;

/// Identifies one WebSocket connection.
pub type ConnectionId = Uuid;

/// A live connection's outbound half.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    frame_tx: mpsc::Sender<OutboundFrame>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, user_id: UserId, frame_tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id,
            user_id,
            frame_tx,
        }
    }

    /// Queue a frame for this connection without waiting.
    ///
    /// Returns `false` if the queue is full or the connection is gone; the
    /// frame is dropped in that case.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        match self.frame_tx.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                debug!(
                    connection = %self.id,
                    user = %self.user_id,
                    error = %e,
                    "Dropping frame for connection"
                );
                false
            }
        }
    }
}

/// Shared registry of authenticated connections, one per user.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<UserId, Arc<ConnectionHandle>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `handle.user_id`.
    ///
    /// A previous connection for the same user is superseded for routing and
    /// returned; it is not closed.
    pub async fn register(&self, handle: ConnectionHandle) -> Option<Arc<ConnectionHandle>> {
        let user_id = handle.user_id;
        let connection = handle.id;
        let (previous, online) = {
            let mut connections = self.connections.write().await;
            let previous = connections.insert(user_id, Arc::new(handle));
            (previous, connections.len())
        };

        match &previous {
            Some(old) => info!(
                user = %user_id,
                connection = %connection,
                superseded = %old.id,
                online,
                "Connection registered, replacing previous"
            ),
            None => info!(
                user = %user_id,
                connection = %connection,
                online,
                "Connection registered"
            ),
        }
        previous
    }

    /// Remove the entry for `user_id` only if it still belongs to
    /// `connection`. Returns `true` if an entry was removed.
    pub async fn unregister_if_current(&self, user_id: UserId, connection: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(&user_id) {
            Some(current) if current.id == connection => {
                connections.remove(&user_id);
                info!(user = %user_id, connection = %connection, "Connection unregistered");
                true
            }
            Some(current) => {
                debug!(
                    user = %user_id,
                    connection = %connection,
                    current = %current.id,
                    "Superseded connection closed, keeping newer entry"
                );
                false
            }
            None => false,
        }
    }

    pub async fn get(&self, user_id: UserId) -> Option<Arc<ConnectionHandle>> {
        self.connections.read().await.get(&user_id).cloned()
    }

    #[cfg(test)]
    pub async fn is_connected(&self, user_id: UserId) -> bool {
        self.connections.read().await.contains_key(&user_id)
    }

    #[cfg(test)]
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
