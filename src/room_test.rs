use super::*;

#[test]
fn board_room_is_deterministic() {
    let a = Room::for_board("b-42");
    let b = Room::for_board("b-42");
    assert_eq!(a, b);
    assert_eq!(a.room_id, "b-42");
}

#[test]
fn ad_hoc_rooms_are_unique_hex() {
    let a = Room::ad_hoc();
    let b = Room::ad_hoc();
    assert_ne!(a.room_id, b.room_id);
    assert_eq!(a.room_id.len(), 20);
    assert!(a.room_id.bytes().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn share_link_parses_back() {
    let room = Room::ad_hoc();
    let link = room.share_link("https://boards.example/b/1#old");
    assert!(link.starts_with("https://boards.example/b/1#room="));
    assert_eq!(Room::from_link(&link).unwrap(), room);
}

#[test]
fn board_room_link_parses_back() {
    let room = Room::for_board("board-7");
    assert_eq!(Room::from_link(&room.share_link("https://x")).unwrap(), room);
}

#[test]
fn missing_fragment_is_rejected() {
    assert!(matches!(
        Room::from_link("https://boards.example/b/1"),
        Err(RoomError::MissingFragment)
    ));
}

#[test]
fn malformed_fragment_is_rejected() {
    assert!(matches!(Room::from_link("x#room=abc"), Err(RoomError::Malformed(_))));
    assert!(matches!(Room::from_link("x#room=a/b,key"), Err(RoomError::Malformed(_))));
    assert!(matches!(Room::from_link("x#room=ab,short"), Err(RoomError::Key(_))));
}
