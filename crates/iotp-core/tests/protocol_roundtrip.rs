//! Integration tests for the iotp-core hex line codec.
//!
//! Every message either state machine can legally produce must survive
//! `decode_line(encode_line(m)) == m` with keycode and payload intact.

use iotp_core::{
    auth::{build_user_response, generate_challenge},
    decode_line,
    devices::{DeviceAction, HomeGenerator},
    encode_line,
    protocol::{from_bytes, to_bytes, Keycode},
    Message, PROTOCOL_VERSION,
};

/// Encodes a message and then decodes it, asserting the line shape on the way.
fn roundtrip(msg: &Message) -> Message {
    let line = encode_line(msg).expect("encode must succeed");
    assert!(line.ends_with('\n'), "line must be newline-terminated");
    assert_eq!(line.matches('\n').count(), 1, "exactly one terminator");
    decode_line(&line).expect("decode must succeed")
}

fn producible_messages() -> Vec<Message> {
    let challenge = generate_challenge();
    let home = HomeGenerator::default().generate();
    let action = DeviceAction::new(200, 3, 1, 2, vec![55]);
    vec![
        Message::ping(),
        Message::version(PROTOCOL_VERSION),
        Message::error_general(),
        Message::error_ping(),
        Message::error_version(),
        Message::error_auth(),
        Message::challenge(&challenge),
        Message::response(build_user_response("abhi", "abhi1234", &challenge)),
        Message::initial(home.snapshot_bytes()),
        Message::action(&action),
        Message::confirm(200, true),
        Message::confirm(0, false),
        Message::update(&action),
        Message::terminate(),
    ]
}

#[test]
fn test_roundtrip_every_producible_message() {
    for msg in producible_messages() {
        assert_eq!(roundtrip(&msg), msg, "{msg}");
    }
}

#[test]
fn test_first_wire_byte_is_always_the_keycode() {
    for msg in producible_messages() {
        let bytes = to_bytes(&msg).unwrap();
        assert_eq!(Some(bytes[0]), msg.keycode().wire_byte());
        assert_eq!(&bytes[1..], msg.payload());
        assert_eq!(from_bytes(&bytes).unwrap(), msg);
    }
}

#[test]
fn test_roundtrip_preserves_parsed_action() {
    // Arrange
    let action = DeviceAction::new(9, 0, 2, 2, vec![80]);

    // Act
    let decoded = roundtrip(&Message::action(&action));

    // Assert
    assert_eq!(decoded.parse_action().unwrap(), action);
    assert_eq!(decoded.keycode(), Keycode::Action);
}

#[test]
fn test_roundtrip_preserves_snapshot() {
    let home = HomeGenerator::new(21, 3).generate();
    let decoded = roundtrip(&Message::initial(home.snapshot_bytes()));
    assert_eq!(
        iotp_core::Home::from_snapshot_bytes(decoded.payload()).unwrap(),
        home
    );
}
