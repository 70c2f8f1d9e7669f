//! Integration tests pairing a `ClientDfa` with `ServerDfa`s in memory.
//!
//! Messages are passed through the real line codec between the two machines,
//! so these tests exercise the codec, authentication, device registry and
//! both roles of the state machine together without any sockets.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use iotp_core::{
    decode_line,
    devices::{DeviceAction, DeviceType, HomeGenerator},
    dfa::{Credentials, SessionId},
    encode_line, Authenticator, Broadcaster, ClientDfa, Keycode, Message, ProtocolDfa,
    ProtocolState, ServerDfa, SharedHome, StaticCredentials, PROTOCOL_VERSION,
};

const TURN_ON: u8 = 0;
const TURN_OFF: u8 = 1;

/// Records every broadcast as `(origin, update)` and the set of sessions
/// currently subscribed.
#[derive(Default)]
struct RecordingBroadcaster {
    sent: Mutex<Vec<(SessionId, Message)>>,
    subscribed: Mutex<BTreeSet<SessionId>>,
}

impl RecordingBroadcaster {
    fn subscribed(&self) -> Vec<SessionId> {
        self.subscribed.lock().unwrap().iter().copied().collect()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&self, update: &Message, origin: SessionId) {
        self.sent.lock().unwrap().push((origin, update.clone()));
    }

    fn subscribe(&self, session: SessionId) {
        self.subscribed.lock().unwrap().insert(session);
    }

    fn unsubscribe(&self, session: SessionId) {
        self.subscribed.lock().unwrap().remove(&session);
    }
}

struct Fixture {
    home: Arc<SharedHome>,
    broadcaster: Arc<RecordingBroadcaster>,
    authenticator: Authenticator,
}

impl Fixture {
    fn new() -> Self {
        let store = StaticCredentials::from_passwords([("abhi", "abhi1234"), ("alex", "alex1234")]);
        Self {
            home: Arc::new(SharedHome::new(HomeGenerator::default().generate())),
            broadcaster: Arc::new(RecordingBroadcaster::default()),
            authenticator: Authenticator::new(Arc::new(store)),
        }
    }

    fn server(&self, id: SessionId) -> ServerDfa {
        ServerDfa::new(
            id,
            PROTOCOL_VERSION,
            self.authenticator.clone(),
            Arc::clone(&self.home),
            self.broadcaster.clone(),
        )
    }
}

/// Sends one message across the "wire" to `dfa`.
fn deliver(dfa: &mut dyn ProtocolDfa, msg: &Message) -> Option<Message> {
    let line = encode_line(msg).expect("only wire messages are delivered");
    dfa.process(decode_line(&line).expect("codec is total for DFA output"))
}

/// Runs the conversation until the client asks for user input or a side
/// produces nothing.  Returns the last message the server sent.
fn converse(client: &mut ClientDfa, server: &mut ServerDfa) -> Option<Message> {
    let mut to_server = client.process(Message::internal());
    let mut last_from_server = None;
    while let Some(msg) = to_server.take() {
        if msg.is(Keycode::WaitUserInput) {
            break;
        }
        let reply = deliver(server, &msg)?;
        last_from_server = Some(reply.clone());
        if reply.is(Keycode::Error) || reply.is(Keycode::Terminate) {
            deliver(client, &reply);
            break;
        }
        to_server = deliver(client, &reply);
    }
    last_from_server
}

#[test]
fn test_full_handshake_reaches_action_state_on_both_sides() {
    // Arrange
    let fixture = Fixture::new();
    let mut server = fixture.server(1);
    let mut client = ClientDfa::new(PROTOCOL_VERSION, Credentials::new("abhi", "abhi1234"));

    // Act
    let last = converse(&mut client, &mut server).unwrap();

    // Assert
    assert!(last.is(Keycode::Initial));
    assert_eq!(server.state(), ProtocolState::ServerAwaitsAction);
    assert_eq!(client.state(), ProtocolState::ServerAwaitsAction);
    assert_eq!(
        client.home().unwrap().device_count(),
        fixture.home.device_count()
    );
}

#[test]
fn test_wrong_password_ends_in_auth_error_and_idle() {
    // Arrange
    let fixture = Fixture::new();
    let mut server = fixture.server(1);
    let mut client = ClientDfa::new(PROTOCOL_VERSION, Credentials::new("abhi", "guess"));

    // Act
    let last = converse(&mut client, &mut server);

    // Assert
    assert_eq!(last, Some(Message::error_auth()));
    assert_eq!(server.state(), ProtocolState::Idle);
    assert_eq!(client.state(), ProtocolState::Idle);
    assert!(client.home().is_none());
}

#[test]
fn test_confirmed_action_updates_every_other_session_only() {
    // Arrange – two authenticated sessions sharing one home
    let fixture = Fixture::new();
    let mut server_a = fixture.server(1);
    let mut server_b = fixture.server(2);
    let mut client_a = ClientDfa::new(PROTOCOL_VERSION, Credentials::new("abhi", "abhi1234"));
    let mut client_b = ClientDfa::new(PROTOCOL_VERSION, Credentials::new("alex", "alex1234"));
    converse(&mut client_a, &mut server_a);
    converse(&mut client_b, &mut server_b);

    // Pick an opcode that is legal for the generated light's current state.
    let light = fixture.home.snapshot().device(DeviceType::Light, 0).unwrap().clone();
    let opcode = if light.state_name() == "ON" { TURN_OFF } else { TURN_ON };
    let action = DeviceAction::new(0, DeviceType::Light.code(), 0, opcode, Vec::new());

    // Act
    let forwarded = client_a.process(Message::action(&action)).unwrap();
    let confirm = deliver(&mut server_a, &forwarded).unwrap();
    let after_confirm = deliver(&mut client_a, &confirm);

    // Assert – origin gets CONFIRM(true) and is excluded from the broadcast
    assert_eq!(confirm, Message::confirm(0, true));
    assert_eq!(after_confirm, Some(Message::wait_user_input()));
    let sent = fixture.broadcaster.sent.lock().unwrap().clone();
    assert_eq!(sent, vec![(1, Message::update(&action))]);

    // The other client mirrors the update and ends up agreeing with the server.
    let (_, update) = &sent[0];
    assert_eq!(deliver(&mut client_b, update), Some(Message::wait_user_input()));
    let expected = fixture.home.snapshot();
    assert_eq!(client_a.home(), Some(&expected));
    assert_eq!(client_b.home(), Some(&expected));
}

#[test]
fn test_illegal_opcode_is_denied_and_registry_unchanged() {
    // Arrange
    let fixture = Fixture::new();
    let mut server = fixture.server(1);
    let mut client = ClientDfa::new(PROTOCOL_VERSION, Credentials::new("abhi", "abhi1234"));
    converse(&mut client, &mut server);
    let before = fixture.home.snapshot_bytes();
    let illegal = DeviceAction::new(3, DeviceType::Thermo.code(), 0, 77, Vec::new());

    // Act
    let forwarded = client.process(Message::action(&illegal)).unwrap();
    let confirm = deliver(&mut server, &forwarded).unwrap();

    // Assert
    assert_eq!(confirm, Message::confirm(3, false));
    assert_eq!(fixture.home.snapshot_bytes(), before);
    assert!(fixture.broadcaster.sent.lock().unwrap().is_empty());
    assert_eq!(deliver(&mut client, &confirm), Some(Message::wait_user_input()));
}

#[test]
fn test_client_terminate_is_echoed_by_server() {
    let fixture = Fixture::new();
    let mut server = fixture.server(1);
    let mut client = ClientDfa::new(PROTOCOL_VERSION, Credentials::new("abhi", "abhi1234"));
    converse(&mut client, &mut server);

    let terminate = client.process(Message::terminate()).unwrap();
    assert_eq!(deliver(&mut server, &terminate), Some(Message::terminate()));
}

#[test]
fn test_sessions_receive_updates_only_between_initial_and_reset() {
    // Arrange
    let fixture = Fixture::new();
    let mut server_a = fixture.server(1);
    let mut server_b = fixture.server(2);
    let mut client_a = ClientDfa::new(PROTOCOL_VERSION, Credentials::new("abhi", "abhi1234"));
    let mut client_b = ClientDfa::new(PROTOCOL_VERSION, Credentials::new("alex", "wrong"));

    // Act
    converse(&mut client_a, &mut server_a);
    converse(&mut client_b, &mut server_b);

    // Assert – only the session that received INITIAL is subscribed
    assert_eq!(fixture.broadcaster.subscribed(), vec![1]);

    // Act – a TERMINATE ends the subscription
    deliver(&mut server_a, &Message::terminate());

    // Assert
    assert!(fixture.broadcaster.subscribed().is_empty());
}
