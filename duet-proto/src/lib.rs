//! Shared protocol definitions for the Duet signaling wire format.

pub mod codec;
pub mod ids;
pub mod signal;

pub use ids::{ConnectionId, RoomId};
pub use signal::{ClientMessage, ServerMessage};
