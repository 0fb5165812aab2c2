use super::*;
use serde_json::json;

#[test]
fn pointer_message_uses_tagged_camel_case() {
    let msg = SocketMessage::PointerUpdate {
        socket_id: "s1".into(),
        username: "ana".into(),
        pointer: Pointer { x: 1.0, y: 2.0 },
        button: PointerButton::Down,
        selected_element_ids: vec!["e1".into()],
    };
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["type"], "presence:pointer");
    assert_eq!(value["socketId"], "s1");
    assert_eq!(value["button"], "down");
    assert_eq!(value["selectedElementIds"], json!(["e1"]));
    assert!(msg.is_volatile());
}

#[test]
fn scene_messages_are_reliable() {
    let msg = SocketMessage::SceneUpdate { update: vec![1, 2, 3] };
    assert!(!msg.is_volatile());
    let bytes = msg.to_bytes().unwrap();
    assert_eq!(SocketMessage::from_bytes(&bytes).unwrap(), msg);
}

#[test]
fn idle_message_parses_from_json() {
    let msg = SocketMessage::from_bytes(
        br#"{"type":"presence:idle","socketId":"s2","username":"bo","userState":"away"}"#,
    )
    .unwrap();
    assert_eq!(
        msg,
        SocketMessage::IdleStatus {
            socket_id: "s2".into(),
            username: "bo".into(),
            user_state: UserIdleState::Away,
        }
    );
}

#[test]
fn unknown_type_is_rejected() {
    assert!(SocketMessage::from_bytes(br#"{"type":"scene:nope"}"#).is_err());
}
