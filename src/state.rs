//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It owns the live room table: per board id, the connected clients'
//! outbound channels plus a presence copy of each member's identity.
//! There are no process-wide singletons, so tests can run many isolated
//! instances side by side.
//!
//! Mutation of the room table goes exclusively through
//! `services::room::{join, leave}`; everything else takes read locks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::event::ServerEvent;
use crate::services::identity::{Identity, VerifyIdentity};

/// Outbound channel capacity per connection. Content events await space;
/// cursor events are dropped when the buffer is full.
pub const CLIENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// ROOM STATE
// =============================================================================

/// Per-board live state. Exists only while at least one member is joined.
pub struct RoomState {
    /// Connected clients: `connection_id` -> sender for outgoing events.
    pub clients: HashMap<Uuid, mpsc::Sender<ServerEvent>>,
    /// Presence attributes per connection, for snapshots and enrichment.
    pub members: HashMap<Uuid, Identity>,
}

impl RoomState {
    #[must_use]
    pub fn new() -> Self {
        Self { clients: HashMap::new(), members: HashMap::new() }
    }
}

impl Default for RoomState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum — all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    /// Live rooms keyed by board id. Created on first join, removed when
    /// the last member leaves.
    pub rooms: Arc<RwLock<HashMap<String, RoomState>>>,
    /// Optional credential verifier. `None` means every connection is a
    /// guest (identity service not configured).
    pub verifier: Option<Arc<dyn VerifyIdentity>>,
    /// Upper bound on one identity-verification call.
    pub verify_timeout: Duration,
}

impl AppState {
    #[must_use]
    pub fn new(verifier: Option<Arc<dyn VerifyIdentity>>, verify_timeout: Duration) -> Self {
        Self { rooms: Arc::new(RwLock::new(HashMap::new())), verifier, verify_timeout }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
