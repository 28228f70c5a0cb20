//! Session state: messages, retransmission bookkeeping, and the
//! double-buffered peer-visible snapshot.
//!
//! Two copies of the peer-visible state exist: the interrupt handlers
//! write the *back* copy and, at the end of each handler, swap the
//! inbound list into the *front* copy under the ready/consumed flag
//! protocol. The foreground only ever reads the front copy, so it
//! always observes a self-consistent snapshot without locks.
//!
//! The internal state is written from interrupt context and, briefly,
//! by `send` on the foreground; the `adding`/`resetting` flag pair in
//! the driver serialises those touches.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::proto::{self, INCOMING_QUEUE_CAP, MAX_PLAYERS, OUTGOING_QUEUE_CAP};

/// Most payload words one message can carry (host, retransmission
/// off).
pub const MAX_MESSAGE_WORDS: usize = 19;

/// One application message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Author, 0-4 (0 = host). For forwarded traffic this is the
    /// original author, not the forwarding host.
    pub player_id: u8,
    pub data: Vec<u32, MAX_MESSAGE_WORDS>,
    /// Per-sender monotonic id; 0 marks confirmation traffic and
    /// never appears on an application message.
    pub packet_id: u32,
}

/// Peer-visible session state (one of the two swap copies).
#[derive(Debug)]
pub(crate) struct PeerState {
    pub incoming: Vec<Message, INCOMING_QUEUE_CAP>,
    pub player_count: u8,
    pub current_player_id: u8,
}

impl PeerState {
    pub fn new() -> Self {
        Self {
            incoming: Vec::new(),
            player_count: 1,
            current_player_id: 0,
        }
    }

    pub fn reset(&mut self) {
        self.incoming.clear();
        self.player_count = 1;
        self.current_player_id = 0;
    }
}

/// Internal retransmission and liveness bookkeeping.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub outgoing: Vec<Message, OUTGOING_QUEUE_CAP>,

    /// Rounds since each peer was last heard from.
    pub timeouts: [u32; MAX_PLAYERS],
    /// Frames without any inbound payload.
    pub recv_timeout: u32,
    /// Payload-bearing receives this display frame.
    pub frame_recv_count: u32,
    /// An accept round already ran this display frame.
    pub accept_called: bool,

    pub last_packet_id: u32,
    pub last_packet_id_from_server: u32,
    pub last_confirmation_from_server: u32,
    pub last_packet_id_from_clients: [u32; MAX_PLAYERS],
    pub last_confirmation_from_clients: [u32; MAX_PLAYERS],
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            outgoing: Vec::new(),
            timeouts: [0; MAX_PLAYERS],
            recv_timeout: 0,
            frame_recv_count: 0,
            accept_called: false,
            last_packet_id: 0,
            last_packet_id_from_server: 0,
            last_confirmation_from_server: 0,
            last_packet_id_from_clients: [0; MAX_PLAYERS],
            last_confirmation_from_clients: [0; MAX_PLAYERS],
        }
    }

    /// Reset everything except the outgoing queue, which the caller
    /// clears subject to the foreground interlock.
    pub fn reset_bookkeeping(&mut self) {
        self.timeouts = [0; MAX_PLAYERS];
        self.recv_timeout = 0;
        self.frame_recv_count = 0;
        self.accept_called = false;
        self.last_packet_id = 0;
        self.last_packet_id_from_server = 0;
        self.last_confirmation_from_server = 0;
        self.last_packet_id_from_clients = [0; MAX_PLAYERS];
        self.last_confirmation_from_clients = [0; MAX_PLAYERS];
    }

    /// Allocate the next outbound packet id.
    pub fn next_packet_id(&mut self) -> u32 {
        self.last_packet_id += 1;
        self.last_packet_id
    }

    /// Count one silent round against every peer but ourselves.
    pub fn track_remote_timeouts(&mut self, player_count: u8, current_player_id: u8) {
        for i in 0..usize::from(player_count).min(MAX_PLAYERS) {
            if i != usize::from(current_player_id) {
                self.timeouts[i] += 1;
            }
        }
    }

    /// True while every tracked peer is within `limit` rounds. The
    /// host tracks all peers; a client only tracks the host.
    pub fn remote_timeouts_ok(&self, player_count: u8, serving: bool, limit: u32) -> bool {
        for i in 0..usize::from(player_count).min(MAX_PLAYERS) {
            if (i == 0 || serving) && self.timeouts[i] > limit {
                return false;
            }
        }
        true
    }

    /// Drop every queued message the peer has confirmed.
    pub fn remove_confirmed(&mut self, confirmation: u32) {
        self.outgoing.retain(|m| m.packet_id > confirmation);
    }

    /// Apply a confirmation message. `serving`/`connected` describe
    /// our own role; a confirmation only makes sense from the
    /// opposite one. Returns `false` on any shape violation.
    pub fn handle_confirmation(
        &mut self,
        confirmation: &Message,
        serving: bool,
        connected: bool,
        current_player_id: u8,
        max_players: u8,
    ) -> bool {
        if confirmation.data.is_empty() {
            return false;
        }

        if confirmation.player_id == 0 {
            // Host confirmation: one id per client slot.
            if !connected || confirmation.data.len() != usize::from(max_players) - 1 {
                return false;
            }
            let confirmed = confirmation.data[usize::from(current_player_id) - 1];
            self.last_confirmation_from_server = confirmed;
            self.remove_confirmed(confirmed);
        } else {
            // Client confirmation: its latest received-from-host id.
            if !serving || confirmation.data.len() != 1 {
                return false;
            }
            self.last_confirmation_from_clients[usize::from(confirmation.player_id)] =
                confirmation.data[0];

            // Only prune up to what every active client has seen;
            // untouched slots stay zero and are skipped.
            let mut min = u32::MAX;
            for i in 1..MAX_PLAYERS {
                let confirmed = self.last_confirmation_from_clients[i];
                if confirmed > 0 && confirmed < min {
                    min = confirmed;
                }
            }
            if min < u32::MAX {
                self.remove_confirmed(min);
            }
        }

        true
    }
}

/// Build a message with a freshly allocated packet id, or `None`
/// when the payload exceeds the message capacity.
pub(crate) fn make_message(
    session: &mut SessionState,
    player_id: u8,
    data: &[u32],
) -> Option<Message> {
    if data.len() > MAX_MESSAGE_WORDS {
        return None;
    }
    let mut message = Message {
        player_id,
        data: Vec::new(),
        packet_id: session.next_packet_id(),
    };
    let _ = message.data.extend_from_slice(data);
    Some(message)
}

/// Number of confirmation words our role attaches to each frame.
pub(crate) fn confirmation_len(serving: bool, max_players: u8) -> usize {
    if serving {
        usize::from(max_players) - 1
    } else {
        1
    }
}

const _: () = assert!(OUTGOING_QUEUE_CAP >= 2, "queue must hold a ping and a payload");
const _: () = assert!(proto::MIN_PLAYERS == 2);

// ── Tests ────────────────────────────────────────────────────
