//! Signaling router: forwards negotiation and chat messages between peers.
//!
//! Routing is stateless. Offer, answer and candidate messages go straight to
//! the connection the sender names, tagged with the sender's identifier, and
//! never touch the room store. Chat fans out to the other members of a room.
//!
//! Delivery is best-effort. A target with no live connection is dropped
//! silently (logged at debug) and the sender is never told. The remaining
//! side of a pairing learns about departures through `peer-disconnected`.

use duet_proto::{ConnectionId, RoomId, ServerMessage};
use serde_json::Value;

use crate::registry::ConnectionRegistry;
use crate::rooms::RoomStore;

/// Outcome of a single routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the target's outbound channel.
    Delivered,
    /// The target has no live connection; the message was dropped.
    TargetUnreachable,
}

fn route(registry: &ConnectionRegistry, target: ConnectionId, msg: &ServerMessage) -> Delivery {
    if registry.send(target, msg) {
        Delivery::Delivered
    } else {
        tracing::debug!(target = %target, "target unreachable, dropping message");
        Delivery::TargetUnreachable
    }
}

/// Forwards a session offer from `sender` to `target`.
pub fn route_offer(
    registry: &ConnectionRegistry,
    sender: ConnectionId,
    target: ConnectionId,
    offer: Value,
) -> Delivery {
    tracing::debug!(from = %sender, to = %target, "routing offer");
    let msg = ServerMessage::Offer {
        sender_id: sender,
        offer,
    };
    route(registry, target, &msg)
}

/// Forwards a session answer from `sender` to `target`.
pub fn route_answer(
    registry: &ConnectionRegistry,
    sender: ConnectionId,
    target: ConnectionId,
    answer: Value,
) -> Delivery {
    tracing::debug!(from = %sender, to = %target, "routing answer");
    let msg = ServerMessage::Answer {
        sender_id: sender,
        answer,
    };
    route(registry, target, &msg)
}

/// Forwards a reachability candidate from `sender` to `target`.
pub fn route_candidate(
    registry: &ConnectionRegistry,
    sender: ConnectionId,
    target: ConnectionId,
    candidate: Value,
) -> Delivery {
    tracing::debug!(from = %sender, to = %target, "routing ice candidate");
    let msg = ServerMessage::IceCandidate {
        sender_id: sender,
        candidate,
    };
    route(registry, target, &msg)
}

/// Sends chat text to every member of `room_id` except `sender`.
///
/// Returns how many members it was delivered to. An unknown room delivers
/// to nobody.
pub fn route_chat_message(
    registry: &ConnectionRegistry,
    rooms: &RoomStore,
    sender: ConnectionId,
    room_id: &RoomId,
    message: String,
    sender_label: String,
) -> usize {
    let Some(recipients) = rooms.others(room_id, sender) else {
        tracing::debug!(from = %sender, room_id = %room_id, "chat for unknown room dropped");
        return 0;
    };

    let msg = ServerMessage::ChatMessage {
        message,
        sender: sender_label,
    };
    let mut delivered = 0;
    for recipient in recipients {
        if route(registry, recipient, &msg) == Delivery::Delivered {
            delivered += 1;
        }
    }
    tracing::debug!(from = %sender, room_id = %room_id, delivered, "routed chat message");
    delivered
}

/// Tells both members of a newly paired room about each other.
///
/// Called from inside the room store's join critical section, so both
/// frames are queued before any departure notice for the same room.
pub fn announce_pairing(
    registry: &ConnectionRegistry,
    room_id: &RoomId,
    creator: ConnectionId,
    joiner: ConnectionId,
) {
    let to_creator = ServerMessage::PeerJoined {
        peer_id: joiner,
        room_id: room_id.clone(),
    };
    route(registry, creator, &to_creator);

    let to_joiner = ServerMessage::PeerJoined {
        peer_id: creator,
        room_id: room_id.clone(),
    };
    route(registry, joiner, &to_joiner);
}
