use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::*;
use crate::crypto::RoomKey;
use crate::protocol::{Pointer, PointerButton};
use crate::state::test_helpers::{MemoryRelay, rect};

fn portal(relay: &MemoryRelay) -> Portal {
    Portal::new(Arc::new(relay.clone()), CollabConfig::default())
}

async fn next(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

/// Skip events until one matches.
async fn until(
    rx: &mut mpsc::Receiver<TransportEvent>,
    pred: impl Fn(&TransportEventKind) -> bool,
) -> TransportEvent {
    loop {
        let event = next(rx).await;
        if pred(&event.kind) {
            return event;
        }
    }
}

fn is_joined(kind: &TransportEventKind) -> bool {
    matches!(kind, TransportEventKind::Joined { .. })
}

#[tokio::test(start_paused = true)]
async fn open_joins_room_and_reports_connected() {
    let relay = MemoryRelay::new();
    let portal = portal(&relay);
    let (tx, mut rx) = mpsc::channel(64);

    let generation = portal.open(Room::for_board("b1"), tx);

    let kinds: Vec<_> = [next(&mut rx).await, next(&mut rx).await, next(&mut rx).await]
        .into_iter()
        .inspect(|e| assert_eq!(e.generation, generation))
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            TransportEventKind::Status(ConnectionStatus::Connecting),
            TransportEventKind::Status(ConnectionStatus::Connected),
            TransportEventKind::Joined { socket_id: "sock-1".into(), peers: vec!["sock-1".into()], first_in_room: true },
        ]
    );
    assert!(portal.is_connected());
    assert_eq!(portal.room_id().as_deref(), Some("b1"));
    assert_eq!(relay.count(frames::ROOM_JOIN), 1);
}

#[tokio::test(start_paused = true)]
async fn sends_are_dropped_while_not_connected() {
    let relay = MemoryRelay::new();
    let portal = portal(&relay);
    let scene = ReplicatedScene::new();

    assert!(!portal.broadcast_full_state(&scene), "no session yet");

    relay.refuse(true);
    let (tx, mut rx) = mpsc::channel(64);
    portal.open(Room::for_board("b1"), tx);
    until(&mut rx, |k| *k == TransportEventKind::Status(ConnectionStatus::Disconnected)).await;

    assert!(!portal.broadcast_full_state(&scene));
    assert_eq!(relay.count(frames::ROOM_BROADCAST), 0);
}

#[tokio::test(start_paused = true)]
async fn broadcast_reaches_peer_and_is_decrypted() {
    let relay = MemoryRelay::new();
    let room = Room::ad_hoc();
    let alice = portal(&relay);
    let bob = portal(&relay);
    let (a_tx, mut a_rx) = mpsc::channel(64);
    let (b_tx, mut b_rx) = mpsc::channel(64);

    alice.open(room.clone(), a_tx);
    until(&mut a_rx, is_joined).await;
    bob.open(room.clone(), b_tx);
    let joined = until(&mut b_rx, is_joined).await;
    assert!(matches!(joined.kind, TransportEventKind::Joined { first_in_room: false, .. }));

    let peers = until(&mut a_rx, |k| matches!(k, TransportEventKind::Peers(_))).await;
    let TransportEventKind::Peers(mut peers) = peers.kind else { unreachable!() };
    peers.sort();
    assert_eq!(peers, vec!["sock-1".to_owned(), "sock-2".to_owned()]);

    let mut scene = ReplicatedScene::new();
    assert!(alice.broadcast_scene(&mut scene, &[rect("r1")], &HashSet::new()));
    assert_eq!(alice.last_synced("r1"), Some(1));

    let event = until(&mut b_rx, |k| matches!(k, TransportEventKind::Message { .. })).await;
    let TransportEventKind::Message { from, message: SocketMessage::SceneUpdate { update } } = event.kind else {
        panic!("expected scene update, got {:?}", event.kind);
    };
    assert_eq!(from.as_deref(), Some("sock-1"));
    let mut replica = ReplicatedScene::new();
    replica.apply_remote(&update).unwrap();
    assert_eq!(replica.get("r1").map(|e| e.version), Some(1));
}

#[tokio::test(start_paused = true)]
async fn presence_goes_over_the_volatile_channel() {
    let relay = MemoryRelay::new();
    let portal = portal(&relay);
    let (tx, mut rx) = mpsc::channel(64);
    portal.open(Room::for_board("b1"), tx);
    until(&mut rx, is_joined).await;

    let pointer = SocketMessage::PointerUpdate {
        socket_id: "sock-1".into(),
        username: "ada".into(),
        pointer: Pointer { x: 1.0, y: 2.0 },
        button: PointerButton::Up,
        selected_element_ids: vec![],
    };
    assert!(portal.broadcast_presence(&pointer));
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(relay.count(frames::ROOM_VOLATILE), 1);
    assert_eq!(relay.count(frames::ROOM_BROADCAST), 0);
}

#[tokio::test(start_paused = true)]
async fn wrong_room_key_reports_key_mismatch() {
    let relay = MemoryRelay::new();
    let room = Room::ad_hoc();
    let impostor = Room { room_id: room.room_id.clone(), room_key: RoomKey::generate() };
    let alice = portal(&relay);
    let bob = portal(&relay);
    let (a_tx, mut a_rx) = mpsc::channel(64);
    let (b_tx, mut b_rx) = mpsc::channel(64);

    alice.open(room, a_tx);
    until(&mut a_rx, is_joined).await;
    bob.open(impostor, b_tx);
    until(&mut b_rx, is_joined).await;

    assert!(alice.broadcast_full_state(&ReplicatedScene::new()));
    until(&mut b_rx, |k| *k == TransportEventKind::KeyMismatch).await;
}

#[tokio::test(start_paused = true)]
async fn reconnects_after_link_loss() {
    let relay = MemoryRelay::new();
    let portal = portal(&relay);
    let (tx, mut rx) = mpsc::channel(64);
    portal.open(Room::for_board("b1"), tx);
    until(&mut rx, is_joined).await;

    relay.drop_all();
    until(&mut rx, |k| *k == TransportEventKind::Status(ConnectionStatus::Disconnected)).await;
    assert!(!portal.is_connected());

    until(&mut rx, is_joined).await;
    assert!(portal.is_connected());
    assert_eq!(relay.connects(), 2);
    assert_eq!(relay.count(frames::ROOM_JOIN), 2);
}

#[tokio::test(start_paused = true)]
async fn reconnect_backoff_doubles_up_to_the_cap() {
    let relay = MemoryRelay::new();
    relay.refuse(true);
    let portal = portal(&relay);
    let (tx, mut rx) = mpsc::channel(64);
    portal.open(Room::for_board("b1"), tx);

    let connecting = |k: &TransportEventKind| *k == TransportEventKind::Status(ConnectionStatus::Connecting);
    until(&mut rx, connecting).await;
    let mut at = Instant::now();
    let mut gaps = Vec::new();
    for _ in 0..6 {
        until(&mut rx, connecting).await;
        gaps.push(at.elapsed().as_secs());
        at = Instant::now();
    }
    assert_eq!(gaps, vec![1, 2, 4, 8, 10, 10]);
}

#[tokio::test(start_paused = true)]
async fn close_is_idempotent_and_clears_the_store() {
    let relay = MemoryRelay::new();
    let portal = portal(&relay);
    let (tx, mut rx) = mpsc::channel(64);
    let generation = portal.open(Room::for_board("b1"), tx);
    until(&mut rx, is_joined).await;

    let mut scene = ReplicatedScene::new();
    assert!(portal.broadcast_scene(&mut scene, &[rect("r1")], &HashSet::new()));
    assert_eq!(portal.last_synced("r1"), Some(1));

    portal.close();
    portal.close();

    assert_eq!(portal.generation(), generation + 1);
    assert_eq!(portal.last_synced("r1"), None);
    assert!(!portal.is_connected());
    assert!(portal.room_id().is_none());
    assert!(!portal.broadcast_full_state(&scene));
}

#[tokio::test(start_paused = true)]
async fn reopen_tags_events_with_the_new_generation() {
    let relay = MemoryRelay::new();
    let portal = portal(&relay);
    let (tx, mut rx) = mpsc::channel(64);

    let first = portal.open(Room::for_board("b1"), tx.clone());
    let second = portal.open(Room::for_board("b2"), tx);
    assert!(second > first);
    assert_eq!(portal.generation(), second);
    assert_eq!(portal.room_id().as_deref(), Some("b2"));

    let joined = until(&mut rx, is_joined).await;
    assert_eq!(joined.generation, second);
}
