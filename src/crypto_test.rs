use super::*;

#[test]
fn open_recovers_sealed_plaintext() {
    let key = RoomKey::generate();
    let sealed = key.seal(b"scene bytes").unwrap();
    assert_ne!(&sealed[NONCE_LEN..], b"scene bytes");
    assert_eq!(key.open(&sealed).unwrap(), b"scene bytes");
}

#[test]
fn each_seal_uses_a_fresh_nonce() {
    let key = RoomKey::generate();
    let a = key.seal(b"same").unwrap();
    let b = key.seal(b"same").unwrap();
    assert_ne!(a, b);
}

#[test]
fn wrong_key_is_a_fatal_mismatch() {
    let sealed = RoomKey::generate().seal(b"secret").unwrap();
    let err = RoomKey::generate().open(&sealed).unwrap_err();
    assert!(matches!(err, CryptoError::KeyMismatch));
    assert!(err.fatal());
    assert_eq!(err.error_code(), "E_KEY_MISMATCH");
}

#[test]
fn tampered_ciphertext_is_rejected() {
    let key = RoomKey::generate();
    let mut sealed = key.seal(b"secret").unwrap();
    let last = sealed.len() - 1;
    sealed[last] ^= 0x01;
    assert!(matches!(key.open(&sealed), Err(CryptoError::KeyMismatch)));
}

#[test]
fn truncated_payload_is_rejected() {
    let key = RoomKey::generate();
    assert!(matches!(key.open(&[1, 2, 3]), Err(CryptoError::Truncated(3))));
}

#[test]
fn board_derivation_is_deterministic_and_board_scoped() {
    assert_eq!(RoomKey::derive_for_board("board-1"), RoomKey::derive_for_board("board-1"));
    assert_ne!(RoomKey::derive_for_board("board-1"), RoomKey::derive_for_board("board-2"));
}

#[test]
fn text_form_parses_back() {
    let key = RoomKey::generate();
    let text = key.encode();
    assert_eq!(text.len(), 43);
    assert_eq!(RoomKey::parse(&text).unwrap(), key);
}

#[test]
fn parse_rejects_wrong_length_and_bad_base64() {
    assert!(matches!(RoomKey::parse("AAAA"), Err(CryptoError::InvalidKey(_))));
    assert!(matches!(RoomKey::parse("!!!not base64!!!"), Err(CryptoError::InvalidKey(_))));
}

#[test]
fn debug_does_not_leak_key_material() {
    let key = RoomKey::generate();
    assert_eq!(format!("{key:?}"), "RoomKey(..)");
}
