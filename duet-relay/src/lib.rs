//! Duet signaling relay library.
//!
//! Exposes the relay server for use in tests and embedding. The relay
//! accepts WebSocket connections from browser peers, pairs them two at a
//! time in rooms, and forwards opaque session negotiation payloads between
//! the members of each pair.

pub mod config;
pub mod reconciler;
pub mod registry;
pub mod relay;
pub mod rooms;
pub mod router;
