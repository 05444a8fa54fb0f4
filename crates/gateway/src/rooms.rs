//! Connection registry and per-draw rooms.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use common::{ConnectionId, DrawId};
use inventory::NumberCell;
use tokio::sync::{RwLock, mpsc};

use crate::messages::{CellSummary, PushMessage};

struct Session {
    tx: mpsc::UnboundedSender<PushMessage>,
    draws: HashSet<DrawId>,
}

/// Tracks which connections are subscribed to which draws.
///
/// The registry only holds each connection's outbound channel. Delivery is
/// fire-and-forget: a closed channel means the socket is gone, and the
/// connection is dropped from the registry on the next send.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    sessions: Arc<RwLock<HashMap<ConnectionId, Session>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection and returns its outbound stream.
    pub async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<PushMessage>) {
        let connection_id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.write().await.insert(
            connection_id,
            Session {
                tx,
                draws: HashSet::new(),
            },
        );
        tracing::info!(%connection_id, "client connected");
        (connection_id, rx)
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) {
        if self.sessions.write().await.remove(&connection_id).is_some() {
            tracing::info!(%connection_id, "client disconnected");
        }
    }

    /// Adds the connection to the draw's room. Returns false for an unknown connection.
    pub async fn join(&self, connection_id: ConnectionId, draw_id: DrawId) -> bool {
        match self.sessions.write().await.get_mut(&connection_id) {
            Some(session) => {
                session.draws.insert(draw_id);
                tracing::info!(%connection_id, %draw_id, "joined draw");
                true
            }
            None => false,
        }
    }

    pub async fn leave(&self, connection_id: ConnectionId, draw_id: DrawId) -> bool {
        match self.sessions.write().await.get_mut(&connection_id) {
            Some(session) => {
                session.draws.remove(&draw_id);
                tracing::info!(%connection_id, %draw_id, "left draw");
                true
            }
            None => false,
        }
    }

    pub async fn is_member(&self, connection_id: ConnectionId, draw_id: DrawId) -> bool {
        self.sessions
            .read()
            .await
            .get(&connection_id)
            .is_some_and(|s| s.draws.contains(&draw_id))
    }

    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Sends to one connection. Returns false if it is unknown or closed.
    pub async fn send_to(&self, connection_id: ConnectionId, message: PushMessage) -> bool {
        let delivered = match self.sessions.read().await.get(&connection_id) {
            Some(session) => session.tx.send(message).is_ok(),
            None => return false,
        };
        if !delivered {
            self.disconnect(connection_id).await;
        }
        delivered
    }

    /// Sends to every connection in the draw's room. Returns the number reached.
    pub async fn broadcast(&self, draw_id: DrawId, message: PushMessage) -> usize {
        let mut closed = Vec::new();
        let mut reached = 0;
        {
            let sessions = self.sessions.read().await;
            for (connection_id, session) in sessions.iter() {
                if !session.draws.contains(&draw_id) {
                    continue;
                }
                if session.tx.send(message.clone()).is_ok() {
                    reached += 1;
                } else {
                    closed.push(*connection_id);
                }
            }
        }
        for connection_id in closed {
            self.disconnect(connection_id).await;
        }
        reached
    }
}

/// Fan-out of inventory changes to the rooms watching a draw.
#[async_trait]
pub trait DrawNotifier: Send + Sync {
    async fn numbers_released(&self, draw_id: DrawId, cells: &[NumberCell]);

    async fn numbers_sold(&self, draw_id: DrawId, cells: &[NumberCell]);
}

#[async_trait]
impl DrawNotifier for RoomRegistry {
    async fn numbers_released(&self, draw_id: DrawId, cells: &[NumberCell]) {
        if cells.is_empty() {
            return;
        }
        let cells: Vec<CellSummary> = cells.iter().map(CellSummary::from).collect();
        let count = cells.len();
        let reached = self
            .broadcast(draw_id, PushMessage::NumbersReleased { draw_id, cells })
            .await;
        tracing::info!(%draw_id, count, reached, "broadcast numbers released");
    }

    async fn numbers_sold(&self, draw_id: DrawId, cells: &[NumberCell]) {
        if cells.is_empty() {
            return;
        }
        let cells: Vec<CellSummary> = cells.iter().map(CellSummary::from).collect();
        let count = cells.len();
        let reached = self
            .broadcast(draw_id, PushMessage::NumbersSold { draw_id, cells })
            .await;
        tracing::info!(%draw_id, count, reached, "broadcast numbers sold");
    }
}
