//! Event — the typed wire protocol for the relay.
//!
//! ARCHITECTURE
//! ============
//! Every websocket message is a JSON object `{"event": <name>, "data": {..}}`.
//! Inbound messages parse into `ClientEvent`, outbound messages serialize
//! from `ServerEvent`; both are adjacently-tagged sum types so the dispatch
//! layer matches on variants instead of probing loose maps.
//!
//! DESIGN
//! ======
//! - Content events flatten a shared `Envelope`: board scope, timestamp,
//!   and opaque pass-through metadata (`txId`, `source`, `actorUserId`).
//! - Parsing is strict for payload shape (a malformed event fails to parse
//!   and is dropped by the caller) but lenient for metadata: a bad
//!   `timestamp` or `source` degrades to `None` rather than rejecting the
//!   whole event, because the relay replaces or drops those fields anyway.
//! - The relay never inspects `object` beyond its `id` — it is a conduit,
//!   not a document model.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// =============================================================================
// TIME
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> f64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0.0;
    };
    // Precise enough: ms-since-epoch stays far below 2^53.
    dur.as_millis() as f64
}

/// A client-supplied timestamp if finite, else the server clock.
/// The relay's clock is authoritative in every rebroadcast.
#[must_use]
pub fn effective_timestamp(client: Option<f64>) -> f64 {
    client.filter(|t| t.is_finite()).unwrap_or_else(now_ms)
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// Origin tag a client may attach to a content event. Opaque to the relay
/// beyond the type check; anything outside this set is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    User,
    Ai,
}

/// Shared wrapper carried by every content-bearing event.
///
/// `txId`, `source`, and `actorUserId` exist for the receiving client's own
/// deduplication and undo bookkeeping; the relay passes them through
/// unchanged apart from the `source` type check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_source", skip_serializing_if = "Option::is_none")]
    pub source: Option<EventSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_user_id: Option<String>,
}

impl Envelope {
    /// Explicit board scope, if the client supplied a usable one.
    #[must_use]
    pub fn board_id(&self) -> Option<&str> {
        self.board_id.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Replace a missing or non-finite client timestamp with the server
    /// clock. The relay's timestamp is authoritative in every rebroadcast.
    #[must_use]
    pub fn stamped(mut self) -> Self {
        self.timestamp = Some(effective_timestamp(self.timestamp));
        self
    }
}

/// Accept any JSON value for a numeric field; non-numbers become `None`.
fn lenient_f64<'de, D: Deserializer<'de>>(de: D) -> Result<Option<f64>, D::Error> {
    let value = serde_json::Value::deserialize(de)?;
    Ok(value.as_f64())
}

/// Accept any JSON value for `source`; unknown values become `None`.
fn lenient_source<'de, D: Deserializer<'de>>(de: D) -> Result<Option<EventSource>, D::Error> {
    let value = serde_json::Value::deserialize(de)?;
    Ok(serde_json::from_value(value).ok())
}

// =============================================================================
// CLIENT → RELAY
// =============================================================================

/// Presence attribute overrides a client may send with `join-board`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPresence {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinBoard {
    #[serde(default)]
    pub board_id: Option<String>,
    #[serde(default)]
    pub user: Option<JoinPresence>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorMove {
    pub x: f64,
    pub y: f64,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl CursorMove {
    /// Both coordinates must be finite; a stale cursor is better dropped
    /// than rendered at infinity.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorHide {
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

/// `object-create` / `object-update` payload. The object body is opaque;
/// only a non-empty string `id` is required.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectUpsert {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<serde_json::Value>,
}

impl ObjectUpsert {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.object
            .as_ref()
            .and_then(|o| o.get("id"))
            .and_then(serde_json::Value::as_str)
            .is_some_and(|id| !id.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDelete {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
}

impl ObjectDelete {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.object_id.as_deref().is_some_and(|id| !id.trim().is_empty())
    }
}

/// Everything a client may send after the handshake.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinBoard(JoinBoard),
    CursorMove(CursorMove),
    CursorHide(CursorHide),
    BoardChanged(Envelope),
    ObjectCreate(ObjectUpsert),
    ObjectUpdate(ObjectUpsert),
    ObjectDelete(ObjectDelete),
}

// =============================================================================
// RELAY → CLIENT
// =============================================================================

/// Read-only presence projection of a connection, safe to broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMember {
    pub connection_id: Uuid,
    pub user_id: String,
    pub display_name: String,
    pub color: String,
}

/// Sent once to each connection after its identity is resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedInfo {
    pub connection_id: Uuid,
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub color: String,
    pub is_guest: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberLeft {
    pub connection_id: Uuid,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRejected {
    pub code: String,
    pub message: String,
}

/// Cursor position enriched with the sender's presence identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorBroadcast {
    pub x: f64,
    pub y: f64,
    pub connection_id: Uuid,
    pub user_id: String,
    pub display_name: String,
    pub color: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorHidden {
    pub connection_id: Uuid,
    pub user_id: String,
    pub timestamp: f64,
}

/// Everything the relay may send to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Connected(ConnectedInfo),
    PresenceSnapshot(Vec<PresenceMember>),
    MemberJoined(PresenceMember),
    MemberLeft(MemberLeft),
    JoinError(JoinRejected),
    CursorMove(CursorBroadcast),
    CursorHide(CursorHidden),
    BoardChanged(Envelope),
    ObjectCreate(ObjectUpsert),
    ObjectUpdate(ObjectUpsert),
    ObjectDelete(ObjectDelete),
}

// =============================================================================
// TESTS
// =============================================================================
