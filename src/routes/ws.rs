//! WebSocket handler — connection lifecycle and event relay.
//!
//! DESIGN
//! ======
//! On upgrade, resolves an identity (guest fallback, never rejects) and
//! enters a `select!` loop:
//! - Inbound client events → parse + dispatch by event tag
//! - Broadcast events from room peers → forward to this client
//!
//! Handler functions are pure business logic — they validate, mutate room
//! state, and return an `Outcome`. The dispatch layer owns all outbound
//! concerns: reply to the sender and fan-out to peers. Broadcasts never
//! echo back to the sender.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → resolve identity → send `connected`
//! 2. Client sends `join-board` → room membership + `presence-snapshot`
//! 3. Content/cursor events relay to the rest of the current room
//! 4. Close → `member-left` broadcast, then cleanup
//!
//! ERROR HANDLING
//! ==============
//! Only invalid join input is surfaced (as `join-error`, to the requester
//! alone). Undecodable frames, malformed content events, and events with
//! no resolvable room are dropped silently: this channel favors
//! availability and latency over validation feedback.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event::{
    ClientEvent, ConnectedInfo, CursorBroadcast, CursorHidden, CursorHide, CursorMove, Envelope,
    JoinBoard, MemberLeft, ObjectDelete, ObjectUpsert, ServerEvent, effective_timestamp,
};
use crate::services::identity::{self, Handshake, Identity};
use crate::services::presence;
use crate::services::room::{self, Delivery, RoomError};
use crate::state::{AppState, CLIENT_CHANNEL_CAPACITY};

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what — handlers never send events directly.
enum Outcome {
    /// Fan out to every room member except the sender.
    Broadcast { board_id: String, event: ServerEvent, delivery: Delivery },
    /// Reply to the sender, and fan a different event out to the rest.
    ReplyAndBroadcast { board_id: String, reply: ServerEvent, broadcast: ServerEvent },
    /// Send to the sender only.
    Reply(ServerEvent),
    /// Drop silently: malformed, unroutable, or premature input.
    Ignore,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let handshake = Handshake::from_query(&params);
    ws.on_upgrade(move |socket| run_ws(socket, state, handshake))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, handshake: Handshake) {
    let connection_id = Uuid::new_v4();

    // The only suspension point before the event loop: bounded by
    // `verify_timeout`, and failure just means a guest identity.
    let mut identity =
        identity::resolve(state.verifier.as_deref(), state.verify_timeout, &handshake, connection_id).await;

    // Per-connection channel for events broadcast by room peers.
    let (client_tx, mut client_rx) = mpsc::channel::<ServerEvent>(CLIENT_CHANNEL_CAPACITY);

    let welcome = ServerEvent::Connected(ConnectedInfo {
        connection_id,
        user_id: identity.user_id.clone(),
        display_name: identity.display_name.clone(),
        email: identity.email.clone(),
        avatar_url: identity.avatar_url.clone(),
        color: identity.color.clone(),
        is_guest: identity.is_guest,
    });
    if send_event(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%connection_id, user_id = %identity.user_id, is_guest = identity.is_guest, "ws: connection identified");

    // The room this connection has joined, if any. At most one at a time.
    let mut current_room: Option<String> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_client_event(
                            &state, &mut current_room, connection_id, &mut identity, &client_tx, &text,
                        )
                        .await;
                        for event in replies {
                            let _ = send_event(&mut socket, &event).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(event) = client_rx.recv() => {
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    // The leave broadcast must complete before this task returns, so
    // remaining members never observe a member that no longer exists.
    disconnect(&state, current_room.take(), connection_id, &identity).await;
    info!(%connection_id, "ws: connection closed");
}

/// Disconnect-triggered leave: remove membership, then tell the room.
/// This is the only path that broadcasts `member-left`; room switches
/// leave the old room silently.
async fn disconnect(
    state: &AppState,
    current_room: Option<String>,
    connection_id: Uuid,
    identity: &Identity,
) {
    let Some(board_id) = current_room else {
        return;
    };
    if room::leave(state, &board_id, connection_id).await {
        let event = ServerEvent::MemberLeft(MemberLeft {
            connection_id,
            user_id: identity.user_id.clone(),
        });
        room::broadcast(state, &board_id, &event, None, Delivery::Reliable).await;
    }
}

// =============================================================================
// EVENT DISPATCH
// =============================================================================

/// Parse and process one inbound text message; returns events for the
/// sender. Broadcasts to peers happen in here.
///
/// Kept free of transport concerns so tests can exercise the full relay
/// semantics with in-memory channels.
async fn process_client_event(
    state: &AppState,
    current_room: &mut Option<String>,
    connection_id: Uuid,
    identity: &mut Identity,
    client_tx: &mpsc::Sender<ServerEvent>,
    text: &str,
) -> Vec<ServerEvent> {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            // Malformed input on a best-effort channel is noise, not an error.
            debug!(%connection_id, error = %e, "ws: dropping undecodable event");
            return Vec::new();
        }
    };

    let outcome = match event {
        ClientEvent::JoinBoard(join) => {
            handle_join(state, current_room, connection_id, identity, client_tx, join).await
        }
        ClientEvent::CursorMove(cursor) => {
            handle_cursor_move(current_room.as_deref(), connection_id, identity, cursor)
        }
        ClientEvent::CursorHide(cursor) => {
            handle_cursor_hide(current_room.as_deref(), connection_id, identity, &cursor)
        }
        ClientEvent::BoardChanged(envelope) => {
            handle_board_changed(current_room.as_deref(), envelope)
        }
        ClientEvent::ObjectCreate(upsert) => {
            handle_object_upsert(current_room.as_deref(), upsert, ServerEvent::ObjectCreate)
        }
        ClientEvent::ObjectUpdate(upsert) => {
            handle_object_upsert(current_room.as_deref(), upsert, ServerEvent::ObjectUpdate)
        }
        ClientEvent::ObjectDelete(delete) => {
            handle_object_delete(current_room.as_deref(), delete)
        }
    };

    // Apply outcome — the dispatch layer owns all outbound logic.
    match outcome {
        Outcome::Broadcast { board_id, event, delivery } => {
            room::broadcast(state, &board_id, &event, Some(connection_id), delivery).await;
            Vec::new()
        }
        Outcome::ReplyAndBroadcast { board_id, reply, broadcast } => {
            room::broadcast(state, &board_id, &broadcast, Some(connection_id), Delivery::Reliable).await;
            vec![reply]
        }
        Outcome::Reply(event) => vec![event],
        Outcome::Ignore => Vec::new(),
    }
}

// =============================================================================
// JOIN HANDLER
// =============================================================================

async fn handle_join(
    state: &AppState,
    current_room: &mut Option<String>,
    connection_id: Uuid,
    identity: &mut Identity,
    client_tx: &mpsc::Sender<ServerEvent>,
    join: JoinBoard,
) -> Outcome {
    let raw = join.board_id.unwrap_or_default();

    // Validate before touching any membership: an invalid join must leave
    // the connection exactly where it was.
    if raw.trim().is_empty() {
        return Outcome::Reply(ServerEvent::JoinError((&RoomError::InvalidBoardId).into()));
    }

    // Presence overrides from the join request. `user_id` never changes.
    let mut effective = identity.clone();
    if let Some(user) = join.user {
        if let Some(name) = user.display_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            effective.display_name = name.to_string();
        }
        if let Some(color) = user.color.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            effective.color = color.to_string();
        }
    }

    // Room switch: the old room is left silently — only disconnects
    // broadcast `member-left`.
    if let Some(old_board) = current_room.take() {
        room::leave(state, &old_board, connection_id).await;
    }

    match room::join(state, &raw, connection_id, &effective, client_tx.clone()).await {
        Ok(joined) => {
            *identity = effective;
            *current_room = Some(joined.board_id.clone());
            Outcome::ReplyAndBroadcast {
                broadcast: ServerEvent::MemberJoined(presence::member_of(connection_id, identity)),
                reply: ServerEvent::PresenceSnapshot(joined.others),
                board_id: joined.board_id,
            }
        }
        Err(e) => Outcome::Reply(ServerEvent::JoinError((&e).into())),
    }
}

// =============================================================================
// CURSOR HANDLERS
// =============================================================================

fn handle_cursor_move(
    current_room: Option<&str>,
    connection_id: Uuid,
    identity: &Identity,
    cursor: CursorMove,
) -> Outcome {
    if !cursor.is_valid() {
        return Outcome::Ignore;
    }
    // Cursor events carry no board scope; they only make sense in the
    // sender's current room.
    let Some(board_id) = current_room else {
        return Outcome::Ignore;
    };
    Outcome::Broadcast {
        board_id: board_id.to_string(),
        event: ServerEvent::CursorMove(CursorBroadcast {
            x: cursor.x,
            y: cursor.y,
            connection_id,
            user_id: identity.user_id.clone(),
            display_name: identity.display_name.clone(),
            color: identity.color.clone(),
            timestamp: effective_timestamp(cursor.timestamp),
        }),
        delivery: Delivery::Droppable,
    }
}

fn handle_cursor_hide(
    current_room: Option<&str>,
    connection_id: Uuid,
    identity: &Identity,
    cursor: &CursorHide,
) -> Outcome {
    let Some(board_id) = current_room else {
        return Outcome::Ignore;
    };
    Outcome::Broadcast {
        board_id: board_id.to_string(),
        event: ServerEvent::CursorHide(CursorHidden {
            connection_id,
            user_id: identity.user_id.clone(),
            timestamp: effective_timestamp(cursor.timestamp),
        }),
        delivery: Delivery::Droppable,
    }
}

// =============================================================================
// CONTENT HANDLERS
// =============================================================================

/// Effective room for a content event: explicit envelope scope wins,
/// otherwise the sender's current room.
fn resolve_room(explicit: Option<&str>, current_room: Option<&str>) -> Option<String> {
    explicit.or(current_room).map(str::to_string)
}

fn handle_board_changed(current_room: Option<&str>, envelope: Envelope) -> Outcome {
    let Some(board_id) = resolve_room(envelope.board_id(), current_room) else {
        return Outcome::Ignore;
    };
    let stamped = Envelope { board_id: Some(board_id.clone()), ..envelope }.stamped();
    Outcome::Broadcast {
        board_id,
        event: ServerEvent::BoardChanged(stamped),
        delivery: Delivery::Reliable,
    }
}

fn handle_object_upsert(
    current_room: Option<&str>,
    upsert: ObjectUpsert,
    wrap: fn(ObjectUpsert) -> ServerEvent,
) -> Outcome {
    if !upsert.is_valid() {
        return Outcome::Ignore;
    }
    let Some(board_id) = resolve_room(upsert.envelope.board_id(), current_room) else {
        return Outcome::Ignore;
    };
    let envelope = Envelope { board_id: Some(board_id.clone()), ..upsert.envelope }.stamped();
    Outcome::Broadcast {
        board_id,
        event: wrap(ObjectUpsert { envelope, object: upsert.object }),
        delivery: Delivery::Reliable,
    }
}

fn handle_object_delete(current_room: Option<&str>, delete: ObjectDelete) -> Outcome {
    if !delete.is_valid() {
        return Outcome::Ignore;
    }
    let Some(board_id) = resolve_room(delete.envelope.board_id(), current_room) else {
        return Outcome::Ignore;
    };
    let envelope = Envelope { board_id: Some(board_id.clone()), ..delete.envelope }.stamped();
    Outcome::Broadcast {
        board_id,
        event: ServerEvent::ObjectDelete(ObjectDelete { envelope, object_id: delete.object_id }),
        delivery: Delivery::Reliable,
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize event");
            return Err(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
