use super::*;

fn sample_frame() -> Frame {
    Frame {
        id: "id-1".to_owned(),
        parent_id: Some("parent-1".to_owned()),
        ts: 42,
        room_id: Some("room-1".to_owned()),
        from: Some("socket-1".to_owned()),
        syscall: ROOM_BROADCAST.to_owned(),
        status: Status::Request,
        data: serde_json::json!({"peers": ["a", "b"]}),
        payload: vec![7, 0, 255, 3],
    }
}

#[test]
fn status_numeric_mapping_matches_wire_enum() {
    assert_eq!(Status::Request.as_i32(), 0);
    assert_eq!(Status::Done.as_i32(), 1);
    assert_eq!(Status::Error.as_i32(), 2);
}

#[test]
fn status_from_wire_rejects_out_of_range_value() {
    let err = Status::from_i32(99).expect_err("status should be invalid");
    assert!(matches!(err, CodecError::InvalidStatus(99)));
}

#[test]
fn decode_preserves_sealed_payload_and_routing() {
    let frame = sample_frame();
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode should succeed");
    assert_eq!(decoded, frame);
}

#[test]
fn decode_rejects_garbage_bytes() {
    let err = decode_frame(&[0xff, 0xff, 0xff]).expect_err("garbage should fail");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn empty_data_decodes_as_empty_object() {
    let wire = WireFrame {
        id: "x".into(),
        parent_id: None,
        ts: 0,
        room_id: None,
        from: None,
        syscall: ROOM_JOIN.into(),
        status: 0,
        data_json: String::new(),
        payload: Vec::new(),
    };
    let decoded = decode_frame(&wire.encode_to_vec()).expect("decode");
    assert_eq!(decoded.data, serde_json::json!({}));
}

#[test]
fn invalid_data_json_is_reported() {
    let wire = WireFrame {
        id: "x".into(),
        parent_id: None,
        ts: 0,
        room_id: None,
        from: None,
        syscall: ROOM_JOIN.into(),
        status: 0,
        data_json: "{not json".into(),
        payload: Vec::new(),
    };
    let err = decode_frame(&wire.encode_to_vec()).expect_err("bad json");
    assert!(matches!(err, CodecError::InvalidData(_)));
}

#[test]
fn replies_inherit_room_and_correlate_to_request() {
    let req = Frame::request(ROOM_JOIN).with_room("r1");
    let done = req.done_with(serde_json::json!({"socket_id": "s1"}));
    assert_eq!(done.parent_id.as_deref(), Some(req.id.as_str()));
    assert_eq!(done.room_id.as_deref(), Some("r1"));
    assert_eq!(done.status, Status::Done);

    let err = req.error("E_ROOM", "nope");
    assert_eq!(err.status, Status::Error);
    assert_eq!(err.data["code"], "E_ROOM");
}

#[test]
fn frame_ids_are_unique() {
    let a = Frame::request(ROOM_JOIN);
    let b = Frame::request(ROOM_JOIN);
    assert_ne!(a.id, b.id);
}

#[test]
fn prefix_splits_on_first_colon() {
    assert_eq!(Frame::request(ROOM_VOLATILE).prefix(), "room");
    assert_eq!(Frame::request("plain").prefix(), "plain");
}
