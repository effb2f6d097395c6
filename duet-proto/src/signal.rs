//! Signaling wire types exchanged between browser peers and the relay.
//!
//! Every WebSocket frame carries one JSON object tagged by `"type"`, with
//! kebab-case message names (`create-room`, `ice-candidate`, ...) and
//! camelCase field names (`roomId`, `targetId`, ...). Negotiation payloads
//! (`offer`, `answer`, `candidate`) are arbitrary JSON the relay forwards
//! without looking inside.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ConnectionId, RoomId};

/// Human-readable reason sent to a joiner whose join was refused.
pub const JOIN_REFUSED_REASON: &str = "Room is full or does not exist";

/// Messages sent from a browser peer to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Create a room with the sender as its only member.
    CreateRoom {
        /// Identifier chosen by the creator.
        room_id: RoomId,
    },

    /// Join a room that currently has exactly one member.
    JoinRoom {
        /// Room to join.
        room_id: RoomId,
    },

    /// Session offer for the paired peer.
    Offer {
        /// Connection that should receive the offer.
        target_id: ConnectionId,
        /// Opaque session description.
        offer: Value,
    },

    /// Session answer for the paired peer.
    Answer {
        /// Connection that should receive the answer.
        target_id: ConnectionId,
        /// Opaque session description.
        answer: Value,
    },

    /// Reachability candidate for the paired peer. Sent many times per call.
    IceCandidate {
        /// Connection that should receive the candidate.
        target_id: ConnectionId,
        /// Opaque candidate.
        candidate: Value,
    },

    /// Text chat for everyone else in the room.
    ChatMessage {
        /// Room to broadcast into.
        room_id: RoomId,
        /// Chat text.
        message: String,
        /// Free-form label shown as the author.
        sender: String,
    },
}

/// Messages sent from the relay to a browser peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// First frame on every connection: the identifier the relay assigned.
    Connected {
        /// This connection's identifier.
        connection_id: ConnectionId,
    },

    /// The sender's `create-room` succeeded.
    RoomCreated {
        /// The room that now exists with the sender as creator.
        room_id: RoomId,
    },

    /// A room became paired. Sent to both members, each naming the other.
    PeerJoined {
        /// The other member's connection identifier.
        peer_id: ConnectionId,
        /// The room that was paired.
        room_id: RoomId,
    },

    /// Forwarded session offer.
    Offer {
        /// Connection that sent the offer.
        sender_id: ConnectionId,
        /// Opaque session description, untouched.
        offer: Value,
    },

    /// Forwarded session answer.
    Answer {
        /// Connection that sent the answer.
        sender_id: ConnectionId,
        /// Opaque session description, untouched.
        answer: Value,
    },

    /// Forwarded reachability candidate.
    IceCandidate {
        /// Connection that sent the candidate.
        sender_id: ConnectionId,
        /// Opaque candidate, untouched.
        candidate: Value,
    },

    /// Chat text from the other room member.
    ChatMessage {
        /// Chat text.
        message: String,
        /// Author label as supplied by the sender.
        sender: String,
    },

    /// The other member of a room went away.
    PeerDisconnected {
        /// Room the departed peer belonged to.
        room_id: RoomId,
    },

    /// A room operation (create or join) was refused.
    RoomError {
        /// Human-readable reason.
        reason: String,
    },

    /// A frame could not be processed (malformed or oversized).
    Error {
        /// Human-readable reason.
        reason: String,
    },
}
