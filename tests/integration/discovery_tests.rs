//! Hosting, discovery, and join scenarios.

use heapless::Vec as HVec;
use wavelink::proto::broadcast::{pack_advertisement, MAX_SERVERS};
use wavelink::proto::codec::Command;
use wavelink::proto::STILL_CONNECTING;
use wavelink::{LinkConfig, LinkDriver, LinkError, LinkState, ServerInfo};

use crate::mock_hw::MockAdapter;

fn authenticated() -> (MockAdapter, LinkDriver) {
    let mut hw = MockAdapter::new();
    hw.script_activation();
    let mut driver = LinkDriver::new(LinkConfig::default());
    assert!(driver.activate(&mut hw));
    (hw, driver)
}

// ── Hosting ───────────────────────────────────────────────────

#[test]
fn serve_broadcasts_and_starts_hosting() {
    let (mut hw, mut driver) = authenticated();
    hw.script_command(Command::Broadcast, 6, &[]);
    hw.script_command(Command::StartHost, 0, &[]);

    let mark = hw.sent.len();
    assert!(driver.serve(&mut hw, "TEST", "U"));
    assert_eq!(driver.state(), LinkState::Serving);

    // The advertisement went out verbatim after the command word.
    let sent = hw.sent_since(mark);
    assert_eq!(sent[0], 0x9966_0616);
    assert_eq!(&sent[1..7], &pack_advertisement("TEST", "U"));
}

#[test]
fn serve_rejects_wrong_state_and_long_names() {
    let (mut hw, mut driver) = authenticated();

    assert!(!driver.serve(&mut hw, "FIFTEEN CHARS!!", "U"));
    assert_eq!(driver.last_error(), Some(LinkError::GameNameTooLong));

    assert!(!driver.serve(&mut hw, "GAME", "NINE CHARS"));
    assert_eq!(driver.last_error(), Some(LinkError::UserNameTooLong));

    // Still authenticated: user errors never reset the session.
    assert_eq!(driver.state(), LinkState::Authenticated);

    hw.script_command(Command::Broadcast, 6, &[]);
    hw.script_command(Command::StartHost, 0, &[]);
    assert!(driver.serve(&mut hw, "GAME", "USER"));
    assert!(!driver.serve(&mut hw, "GAME", "USER"));
    assert_eq!(driver.last_error(), Some(LinkError::WrongState));
}

// ── Discovery ─────────────────────────────────────────────────

#[test]
fn get_servers_decodes_poll_groups() {
    let (mut hw, mut driver) = authenticated();

    let advert_a = pack_advertisement("LinkedWorld", "Alice");
    let advert_b = pack_advertisement("PUZZLE", "Bob");
    let mut poll = vec![0x0001];
    poll.extend_from_slice(&advert_a);
    poll.push(0x0002);
    poll.extend_from_slice(&advert_b);

    hw.script_command(Command::BroadcastReadStart, 0, &[]);
    hw.script_command(Command::BroadcastReadPoll, 0, &poll);
    hw.script_command(Command::BroadcastReadEnd, 0, &[]);

    let mut vblanks = 0u32;
    let mut servers: HVec<ServerInfo, MAX_SERVERS> = HVec::new();
    assert!(driver.get_servers_with(&mut hw, &mut servers, || vblanks += 1));

    assert_eq!(driver.state(), LinkState::Authenticated);
    assert_eq!(vblanks, 60);
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0].id, 1);
    assert_eq!(servers[0].game_name.as_str(), "LinkedWorld");
    assert_eq!(servers[0].user_name.as_str(), "Alice");
    assert_eq!(servers[1].id, 2);
    assert_eq!(servers[1].game_name.as_str(), "PUZZLE");
}

#[test]
fn ragged_poll_response_resets() {
    let (mut hw, mut driver) = authenticated();
    hw.script_command(Command::BroadcastReadStart, 0, &[]);
    // 5 words is not a whole 7-word group.
    hw.script_command(Command::BroadcastReadPoll, 0, &[1, 2, 3, 4, 5]);

    let mut servers: HVec<ServerInfo, MAX_SERVERS> = HVec::new();
    assert!(!driver.get_servers(&mut hw, &mut servers));
    assert_eq!(driver.last_error(), Some(LinkError::CommandFailed));
    assert_eq!(driver.state(), LinkState::NeedsReset);
}

// ── Joining ───────────────────────────────────────────────────

#[test]
fn connect_then_keep_connecting_until_joined() {
    let (mut hw, mut driver) = authenticated();

    hw.script_command(Command::Connect, 1, &[]);
    assert!(driver.connect(&mut hw, 0xBEEF));
    assert_eq!(driver.state(), LinkState::Connecting);

    // First poll: adapter still negotiating.
    hw.script_command(Command::IsFinishedConnect, 0, &[STILL_CONNECTING]);
    assert!(driver.keep_connecting(&mut hw));
    assert_eq!(driver.state(), LinkState::Connecting);

    // Second poll: slot 1 (player 2), client id 0x1234; the finish
    // command echoes the client id back.
    hw.script_command(Command::IsFinishedConnect, 0, &[(1 << 16) | 0x1234]);
    hw.script_command(Command::FinishConnection, 0, &[0x1234]);
    assert!(driver.keep_connecting(&mut hw));
    assert_eq!(driver.state(), LinkState::Connected);

    // The snapshot picks the assigned id up at the next interrupt.
    driver.on_vblank();
    assert_eq!(driver.current_player_id(), 2);
    assert_eq!(driver.last_error(), None);
}

#[test]
fn join_rejects_out_of_range_player_slot() {
    let (mut hw, mut driver) = authenticated();
    hw.script_command(Command::Connect, 1, &[]);
    assert!(driver.connect(&mut hw, 1));

    // Slot 9 would be player 10.
    hw.script_command(Command::IsFinishedConnect, 0, &[(9 << 16) | 0x0042]);
    assert!(!driver.keep_connecting(&mut hw));
    assert_eq!(driver.last_error(), Some(LinkError::WeirdPlayerId));
    assert_eq!(driver.state(), LinkState::NeedsReset);
}

#[test]
fn join_rejects_mismatched_finish_echo() {
    let (mut hw, mut driver) = authenticated();
    hw.script_command(Command::Connect, 1, &[]);
    assert!(driver.connect(&mut hw, 1));

    hw.script_command(Command::IsFinishedConnect, 0, &[(0 << 16) | 0x0042]);
    hw.script_command(Command::FinishConnection, 0, &[0x0099]);
    assert!(!driver.keep_connecting(&mut hw));
    assert_eq!(driver.last_error(), Some(LinkError::CommandFailed));
    assert_eq!(driver.state(), LinkState::NeedsReset);
}
