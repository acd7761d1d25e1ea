//! Domain services used by the websocket route.
//!
//! ARCHITECTURE
//! ============
//! Service modules own identity resolution, presence derivation, and room
//! membership so the route layer can stay focused on transport plumbing
//! and event dispatch.

pub mod identity;
pub mod presence;
pub mod room;
