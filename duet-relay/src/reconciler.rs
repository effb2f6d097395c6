//! Disconnect reconciliation.
//!
//! Runs once when a connection's transport closes: the connection leaves
//! every room it was in, each peer left behind is told, and the connection
//! is dropped from the registry. Departure notices are queued while the
//! room store's lock is held, the same lock a join queues its `peer-joined`
//! frames under, so a peer never hears about a pairing after hearing that
//! its partner left.

use duet_proto::{ConnectionId, ServerMessage};

use crate::registry::ConnectionRegistry;
use crate::rooms::RoomStore;

/// Cleans up after a closed connection.
///
/// Returns the number of peers notified with `peer-disconnected`. A second
/// call for the same connection finds nothing to do and returns zero.
pub fn reconcile_disconnect(
    registry: &ConnectionRegistry,
    rooms: &RoomStore,
    conn_id: ConnectionId,
) -> usize {
    let mut notified = 0;
    let departures = rooms.leave_with(conn_id, |departure| {
        let Some(peer) = departure.remaining else {
            return;
        };
        let msg = ServerMessage::PeerDisconnected {
            room_id: departure.room_id.clone(),
        };
        if !registry.send(peer, &msg) {
            tracing::debug!(peer = %peer, "remaining member unreachable");
        }
        notified += 1;
    });

    for departure in &departures {
        match departure.remaining {
            Some(peer) => tracing::info!(
                conn_id = %conn_id,
                room_id = %departure.room_id,
                peer = %peer,
                "peer left room, remaining member notified"
            ),
            None => tracing::info!(
                conn_id = %conn_id,
                room_id = %departure.room_id,
                "room emptied and deleted"
            ),
        }
    }

    registry.unregister(conn_id);
    notified
}
