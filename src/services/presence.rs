//! Presence registry — read-only projections of room membership.
//!
//! DESIGN
//! ======
//! Presence is derived, never stored independently: snapshots and member
//! projections are recomputed from the room table on demand, so they can
//! never drift from actual membership. Colors are a pure function of
//! `user_id`, which keeps a user's cursor color stable across reconnects
//! without any coordination.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::event::PresenceMember;
use crate::services::identity::Identity;
use crate::state::AppState;

/// Deterministic display color for a user: hash-derived hue at fixed
/// saturation/lightness. Collisions between users are cosmetic only.
#[must_use]
pub fn color_for(user_id: &str) -> String {
    let digest = Sha256::digest(user_id.as_bytes());
    let hue = (u16::from(digest[0]) << 8 | u16::from(digest[1])) % 360;
    format!("hsl({hue}, 70%, 55%)")
}

/// Project a connection's identity into its broadcastable presence form.
#[must_use]
pub fn member_of(connection_id: Uuid, identity: &Identity) -> PresenceMember {
    PresenceMember {
        connection_id,
        user_id: identity.user_id.clone(),
        display_name: identity.display_name.clone(),
        color: identity.color.clone(),
    }
}

/// Current members of a room, optionally excluding one connection.
/// Returns an empty list for unknown rooms. No ordering guarantee.
pub async fn snapshot(state: &AppState, board_id: &str, exclude: Option<Uuid>) -> Vec<PresenceMember> {
    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(board_id) else {
        return Vec::new();
    };
    room.members
        .iter()
        .filter(|(connection_id, _)| exclude != Some(**connection_id))
        .map(|(connection_id, identity)| member_of(*connection_id, identity))
        .collect()
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
