//! Integration tests for room creation, pairing and signaling relay.
//!
//! Drives a real relay over WebSocket the way two browser tabs would:
//! create a room, join it, exchange offer/answer/candidates and chat.
//!
//! Verification command: `cargo test --test pairing`

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite;

use duet_proto::signal::JOIN_REFUSED_REASON;
use duet_proto::{ConnectionId, RoomId, ServerMessage, codec};
use duet_relay::relay::start_server;

// =============================================================================
// Helpers
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// How long to wait before concluding that no message is coming.
const QUIET_PERIOD: Duration = Duration::from_millis(200);

async fn start_relay() -> std::net::SocketAddr {
    let (addr, _handle) = start_server("127.0.0.1:0")
        .await
        .expect("failed to start test relay");
    addr
}

/// Connects a client and reads the `connected` greeting.
async fn connect(addr: std::net::SocketAddr) -> (WsStream, ConnectionId) {
    let url = format!("ws://{addr}/ws");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    match recv(&mut ws).await {
        ServerMessage::Connected { connection_id } => (ws, connection_id),
        other => panic!("expected Connected, got {other:?}"),
    }
}

async fn send(ws: &mut WsStream, value: Value) {
    ws.send(tungstenite::Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

async fn recv(ws: &mut WsStream) -> ServerMessage {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for message")
        .unwrap()
        .unwrap();
    codec::decode(msg.to_text().unwrap().as_bytes()).unwrap()
}

async fn assert_quiet(ws: &mut WsStream) {
    if let Ok(Some(Ok(msg))) = tokio::time::timeout(QUIET_PERIOD, ws.next()).await {
        panic!("expected no message, got {msg:?}");
    }
}

/// Creates room `room` with `creator` and pairs `joiner` into it, consuming
/// the confirmation and both `peer-joined` notifications.
async fn pair(creator: &mut WsStream, joiner: &mut WsStream, room: &str) {
    send(creator, json!({"type": "create-room", "roomId": room})).await;
    assert!(matches!(recv(creator).await, ServerMessage::RoomCreated { .. }));
    send(joiner, json!({"type": "join-room", "roomId": room})).await;
    assert!(matches!(recv(creator).await, ServerMessage::PeerJoined { .. }));
    assert!(matches!(recv(joiner).await, ServerMessage::PeerJoined { .. }));
}

// =============================================================================
// Room lifecycle
// =============================================================================

#[tokio::test]
async fn create_then_join_exchanges_identifiers() {
    let addr = start_relay().await;
    let (mut ws_a, a) = connect(addr).await;
    let (mut ws_b, b) = connect(addr).await;

    send(&mut ws_a, json!({"type": "create-room", "roomId": "call-1"})).await;
    assert_eq!(
        recv(&mut ws_a).await,
        ServerMessage::RoomCreated {
            room_id: RoomId::from("call-1")
        }
    );

    send(&mut ws_b, json!({"type": "join-room", "roomId": "call-1"})).await;
    assert_eq!(
        recv(&mut ws_a).await,
        ServerMessage::PeerJoined {
            peer_id: b,
            room_id: RoomId::from("call-1"),
        }
    );
    assert_eq!(
        recv(&mut ws_b).await,
        ServerMessage::PeerJoined {
            peer_id: a,
            room_id: RoomId::from("call-1"),
        }
    );
}

#[tokio::test]
async fn duplicate_create_is_refused() {
    let addr = start_relay().await;
    let (mut ws_a, _a) = connect(addr).await;
    let (mut ws_b, _b) = connect(addr).await;
    let (mut ws_c, c) = connect(addr).await;

    send(&mut ws_a, json!({"type": "create-room", "roomId": "x"})).await;
    let _created = recv(&mut ws_a).await;

    send(&mut ws_b, json!({"type": "create-room", "roomId": "x"})).await;
    assert!(matches!(recv(&mut ws_b).await, ServerMessage::RoomError { .. }));

    // The original creator still owns the room: a third peer pairs with it.
    send(&mut ws_c, json!({"type": "join-room", "roomId": "x"})).await;
    assert_eq!(
        recv(&mut ws_a).await,
        ServerMessage::PeerJoined {
            peer_id: c,
            room_id: RoomId::from("x"),
        }
    );
    assert_quiet(&mut ws_b).await;
}

#[tokio::test]
async fn join_unknown_room_reports_error() {
    let addr = start_relay().await;
    let (mut ws_b, _b) = connect(addr).await;

    send(&mut ws_b, json!({"type": "join-room", "roomId": "nowhere"})).await;
    assert_eq!(
        recv(&mut ws_b).await,
        ServerMessage::RoomError {
            reason: JOIN_REFUSED_REASON.to_string()
        }
    );
}

#[tokio::test]
async fn third_joiner_is_refused() {
    let addr = start_relay().await;
    let (mut ws_a, _a) = connect(addr).await;
    let (mut ws_b, _b) = connect(addr).await;
    let (mut ws_c, _c) = connect(addr).await;
    pair(&mut ws_a, &mut ws_b, "duo").await;

    send(&mut ws_c, json!({"type": "join-room", "roomId": "duo"})).await;
    assert_eq!(
        recv(&mut ws_c).await,
        ServerMessage::RoomError {
            reason: JOIN_REFUSED_REASON.to_string()
        }
    );
    assert_quiet(&mut ws_a).await;
    assert_quiet(&mut ws_b).await;
}

#[tokio::test]
async fn racing_joiners_admit_exactly_one() {
    let addr = start_relay().await;
    let (mut ws_a, _a) = connect(addr).await;
    let (mut ws_b, _b) = connect(addr).await;
    let (mut ws_c, _c) = connect(addr).await;

    send(&mut ws_a, json!({"type": "create-room", "roomId": "race"})).await;
    let _created = recv(&mut ws_a).await;

    let join = json!({"type": "join-room", "roomId": "race"});
    tokio::join!(send(&mut ws_b, join.clone()), send(&mut ws_c, join));

    let (rb, rc) = tokio::join!(recv(&mut ws_b), recv(&mut ws_c));
    let joined = [&rb, &rc]
        .iter()
        .filter(|m| matches!(m, ServerMessage::PeerJoined { .. }))
        .count();
    let refused = [&rb, &rc]
        .iter()
        .filter(|m| matches!(m, ServerMessage::RoomError { .. }))
        .count();
    assert_eq!(joined, 1);
    assert_eq!(refused, 1);

    // The creator hears about exactly one joiner.
    assert!(matches!(recv(&mut ws_a).await, ServerMessage::PeerJoined { .. }));
    assert_quiet(&mut ws_a).await;
}

// =============================================================================
// Negotiation relay
// =============================================================================

#[tokio::test]
async fn offer_answer_and_candidates_flow_between_peers() {
    let addr = start_relay().await;
    let (mut ws_a, a) = connect(addr).await;
    let (mut ws_b, b) = connect(addr).await;
    pair(&mut ws_a, &mut ws_b, "nego").await;

    let offer = json!({"type": "offer", "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n"});
    send(
        &mut ws_a,
        json!({"type": "offer", "targetId": b.to_string(), "offer": offer.clone()}),
    )
    .await;
    assert_eq!(
        recv(&mut ws_b).await,
        ServerMessage::Offer {
            sender_id: a,
            offer,
        }
    );

    let answer = json!({"type": "answer", "sdp": "v=0\r\n"});
    send(
        &mut ws_b,
        json!({"type": "answer", "targetId": a.to_string(), "answer": answer.clone()}),
    )
    .await;
    assert_eq!(
        recv(&mut ws_a).await,
        ServerMessage::Answer {
            sender_id: b,
            answer,
        }
    );

    for i in 0..5 {
        let candidate = json!({"candidate": format!("candidate:{i} 1 udp 1 192.0.2.{i} 9 typ host"), "sdpMid": "0"});
        send(
            &mut ws_a,
            json!({"type": "ice-candidate", "targetId": b.to_string(), "candidate": candidate}),
        )
        .await;
    }
    for i in 0..5 {
        match recv(&mut ws_b).await {
            ServerMessage::IceCandidate {
                sender_id,
                candidate,
            } => {
                assert_eq!(sender_id, a);
                assert_eq!(
                    candidate["candidate"],
                    format!("candidate:{i} 1 udp 1 192.0.2.{i} 9 typ host")
                );
            }
            other => panic!("expected IceCandidate, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn offer_to_unknown_target_is_dropped_silently() {
    let addr = start_relay().await;
    let (mut ws_a, _a) = connect(addr).await;
    let ghost = ConnectionId::new();

    send(
        &mut ws_a,
        json!({"type": "offer", "targetId": ghost.to_string(), "offer": {"sdp": "v=0"}}),
    )
    .await;
    assert_quiet(&mut ws_a).await;
}

// =============================================================================
// Chat
// =============================================================================

#[tokio::test]
async fn chat_reaches_peer_once_without_echo() {
    let addr = start_relay().await;
    let (mut ws_a, _a) = connect(addr).await;
    let (mut ws_b, _b) = connect(addr).await;
    pair(&mut ws_a, &mut ws_b, "x").await;

    send(
        &mut ws_a,
        json!({"type": "chat-message", "roomId": "x", "message": "hi", "sender": "Peer"}),
    )
    .await;

    assert_eq!(
        recv(&mut ws_b).await,
        ServerMessage::ChatMessage {
            message: "hi".to_string(),
            sender: "Peer".to_string(),
        }
    );
    assert_quiet(&mut ws_b).await;
    assert_quiet(&mut ws_a).await;
}

#[tokio::test]
async fn chat_to_unknown_room_is_ignored() {
    let addr = start_relay().await;
    let (mut ws_a, _a) = connect(addr).await;

    send(
        &mut ws_a,
        json!({"type": "chat-message", "roomId": "void", "message": "anyone?", "sender": "Peer"}),
    )
    .await;
    assert_quiet(&mut ws_a).await;
}

// =============================================================================
// Protocol errors
// =============================================================================

#[tokio::test]
async fn malformed_frame_keeps_connection_open() {
    let addr = start_relay().await;
    let (mut ws_a, _a) = connect(addr).await;

    ws_a.send(tungstenite::Message::Text("definitely not json".to_string().into()))
        .await
        .unwrap();
    assert!(matches!(recv(&mut ws_a).await, ServerMessage::Error { .. }));

    send(&mut ws_a, json!({"type": "create-room", "roomId": "still-here"})).await;
    assert_eq!(
        recv(&mut ws_a).await,
        ServerMessage::RoomCreated {
            room_id: RoomId::from("still-here")
        }
    );
}
