//! Room router — membership and fan-out.
//!
//! DESIGN
//! ======
//! Rooms are created lazily on first join and evicted when the last member
//! leaves; there is no retained history. All mutation of the room table
//! lives here, behind `join`/`leave`, so the rest of the crate only ever
//! takes read locks.
//!
//! Fan-out comes in two delivery classes. Reliable events (content,
//! membership) await channel capacity and lean on the transport's own
//! ordering; droppable events (cursor traffic) are discarded when a
//! receiver's buffer is full, because a stale cursor is worse than a
//! missing one.

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::event::{JoinRejected, PresenceMember, ServerEvent};
use crate::services::identity::Identity;
use crate::services::presence;
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("boardId must be a non-empty string")]
    InvalidBoardId,
}

impl RoomError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidBoardId => "E_INVALID_BOARD_ID",
        }
    }
}

impl From<&RoomError> for JoinRejected {
    fn from(err: &RoomError) -> Self {
        Self { code: err.code().to_string(), message: err.to_string() }
    }
}

/// Result of a successful join: the canonical room key plus a presence
/// snapshot of everyone already there.
#[derive(Debug)]
pub struct Joined {
    pub board_id: String,
    pub others: Vec<PresenceMember>,
}

/// How hard a broadcast tries to reach a lagging receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Await channel capacity; no application-level retry beyond that.
    Reliable,
    /// Drop for receivers whose outbound buffer is full.
    Droppable,
}

// =============================================================================
// JOIN / LEAVE
// =============================================================================

/// Add a connection to a room, creating the room if needed.
///
/// Returns the snapshot of members *excluding* the joiner, for the joiner
/// to render locally. The caller is responsible for leaving any previous
/// room first and for broadcasting `member-joined` to the rest.
///
/// # Errors
///
/// `RoomError::InvalidBoardId` if the board id is empty after trimming;
/// no state changes in that case.
pub async fn join(
    state: &AppState,
    board_id: &str,
    connection_id: Uuid,
    identity: &Identity,
    tx: mpsc::Sender<ServerEvent>,
) -> Result<Joined, RoomError> {
    let board_id = board_id.trim();
    if board_id.is_empty() {
        return Err(RoomError::InvalidBoardId);
    }

    let mut rooms = state.rooms.write().await;
    let room = rooms.entry(board_id.to_string()).or_default();

    let others: Vec<PresenceMember> = room
        .members
        .iter()
        .filter(|(member_id, _)| **member_id != connection_id)
        .map(|(member_id, member)| presence::member_of(*member_id, member))
        .collect();

    room.clients.insert(connection_id, tx);
    room.members.insert(connection_id, identity.clone());

    info!(%board_id, %connection_id, members = room.members.len(), "connection joined room");
    Ok(Joined { board_id: board_id.to_string(), others })
}

/// Remove a connection from a room. Evicts the room when it empties.
/// Returns whether the connection was actually a member — the disconnect
/// path broadcasts `member-left` only when true.
pub async fn leave(state: &AppState, board_id: &str, connection_id: Uuid) -> bool {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(board_id) else {
        return false;
    };

    let was_member = room.clients.remove(&connection_id).is_some();
    room.members.remove(&connection_id);
    if was_member {
        info!(%board_id, %connection_id, remaining = room.members.len(), "connection left room");
    }

    if room.clients.is_empty() {
        rooms.remove(board_id);
        info!(%board_id, "evicted empty room");
    }
    was_member
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Fan an event out to every member of a room except `exclude`.
/// Unknown rooms are a no-op. Send failures (closed or, for droppable
/// delivery, full channels) are ignored; the receiver's own lifecycle
/// handles cleanup.
pub async fn broadcast(
    state: &AppState,
    board_id: &str,
    event: &ServerEvent,
    exclude: Option<Uuid>,
    delivery: Delivery,
) {
    match delivery {
        Delivery::Droppable => {
            let rooms = state.rooms.read().await;
            let Some(room) = rooms.get(board_id) else {
                return;
            };
            for (client_id, tx) in &room.clients {
                if exclude == Some(*client_id) {
                    continue;
                }
                let _ = tx.try_send(event.clone());
            }
        }
        Delivery::Reliable => {
            // Clone senders out of the lock so a slow receiver cannot
            // stall room mutation while we await capacity.
            let targets: Vec<mpsc::Sender<ServerEvent>> = {
                let rooms = state.rooms.read().await;
                let Some(room) = rooms.get(board_id) else {
                    return;
                };
                room.clients
                    .iter()
                    .filter(|(client_id, _)| exclude != Some(**client_id))
                    .map(|(_, tx)| tx.clone())
                    .collect()
            };
            for tx in targets {
                let _ = tx.send(event.clone()).await;
            }
        }
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
