//! Data-frame build and parse.
//!
//! Outgoing frame layout (words):
//! ```text
//! ┌─────────────────┬───────────────────┬──────────────┬─────┐
//! │ wireless header │ confirmations     │ msg header + │ ... │
//! │ (byte count)    │ (retransmission)  │ payload      │     │
//! └─────────────────┴───────────────────┴──────────────┴─────┘
//! ```
//!
//! The whole frame is capped at 20 words for the host and 4 for a
//! client, wireless header included; queued messages that do not fit
//! stay queued for the next round.
//!
//! The inbound path is the mirror image and is fed straight from the
//! adapter, so it treats every word as untrusted: declared sizes are
//! bounds-checked against the frame, player ids against the session
//! table, and shape violations surface as typed errors.

use heapless::Vec;

use crate::error::LinkError;
use crate::proto::header::MessageHeader;
use crate::proto::{
    CLIENT_TRANSFER_WORDS, CONFIRMATION_PACKET_ID, HOST_TRANSFER_WORDS, INCOMING_QUEUE_CAP,
    MAX_PLAYERS, MIN_PLAYERS,
};

use super::session::{confirmation_len, Message, SessionState, MAX_MESSAGE_WORDS};

/// Role-dependent whole-frame cap, wireless header included.
pub(crate) fn transfer_words(serving: bool) -> usize {
    if serving {
        HOST_TRANSFER_WORDS
    } else {
        CLIENT_TRANSFER_WORDS
    }
}

/// With retransmission off nothing confirms our liveness, so an idle
/// queue gets one empty ping message carrying only a fresh packet id.
pub(crate) fn add_ping_if_needed(
    session: &mut SessionState,
    current_player_id: u8,
    retransmission: bool,
) {
    if retransmission || !session.outgoing.is_empty() {
        return;
    }
    let packet_id = session.next_packet_id();
    let _ = session.outgoing.push(Message {
        player_id: current_player_id,
        data: Vec::new(),
        packet_id,
    });
}

/// Pack the queue (and confirmations) into one adapter frame.
pub(crate) fn build_send_frame(
    session: &SessionState,
    serving: bool,
    current_player_id: u8,
    player_count: u8,
    retransmission: bool,
    max_players: u8,
) -> Vec<u32, HOST_TRANSFER_WORDS> {
    let cap = transfer_words(serving);
    let client_count = player_count.saturating_sub(MIN_PLAYERS as u8);
    let mut frame: Vec<u32, HOST_TRANSFER_WORDS> = Vec::new();

    // Word 0 is the wireless header, patched in at the end.
    let _ = frame.push(0);

    if retransmission {
        let confirmations = confirmation_len(serving, max_players);
        let _ = frame.push(
            MessageHeader {
                packet_id: CONFIRMATION_PACKET_ID,
                size: confirmations as u8,
                player_id: current_player_id,
                client_count,
            }
            .encode(),
        );
        if serving {
            for i in 1..=confirmations {
                let _ = frame.push(session.last_packet_id_from_clients[i]);
            }
        } else {
            let _ = frame.push(session.last_packet_id_from_server);
        }
    }

    for message in &session.outgoing {
        let size = message.data.len();
        if frame.len() + 1 + size > cap {
            break;
        }
        let _ = frame.push(
            MessageHeader {
                packet_id: message.packet_id,
                size: size as u8,
                player_id: message.player_id,
                client_count,
            }
            .encode(),
        );
        let _ = frame.extend_from_slice(&message.data);
    }

    // The adapter routes on the byte count in word 0; clients shift
    // it into their slot's bit lane.
    let bytes = ((frame.len() - 1) * 4) as u32;
    frame[0] = if current_player_id == 0 {
        bytes
    } else {
        bytes << (3 + u32::from(current_player_id) * 5)
    };

    frame
}

/// Unpack one received frame (wireless header already removed) into
/// messages, updating sequence/confirmation bookkeeping on the way.
///
/// `back_player_count` is the back-buffer count a client refreshes
/// from every host header.
#[allow(clippy::too_many_arguments)]
pub(crate) fn parse_frame(
    words: &[u32],
    serving: bool,
    connected: bool,
    retransmission: bool,
    current_player_id: u8,
    max_players: u8,
    session: &mut SessionState,
    back_player_count: &mut u8,
) -> Result<Vec<Message, INCOMING_QUEUE_CAP>, LinkError> {
    let mut messages: Vec<Message, INCOMING_QUEUE_CAP> = Vec::new();
    let mut i = 0usize;

    while i < words.len() {
        let header = MessageHeader::decode(words[i]);
        let size = usize::from(header.size);
        let player_id = usize::from(header.player_id);

        if player_id >= MAX_PLAYERS || size > MAX_MESSAGE_WORDS {
            return Err(LinkError::BadMessage);
        }
        if i + size >= words.len() {
            return Err(LinkError::BadMessage);
        }

        // Hearing anything proves the host is alive, and the named
        // sender too.
        session.timeouts[0] = 0;
        session.timeouts[player_id] = 0;

        // Out-of-order frames are dropped wholesale: the peer will
        // retransmit anything we skip here.
        let last = if serving {
            session.last_packet_id_from_clients[player_id]
        } else {
            session.last_packet_id_from_server
        };
        let gap = retransmission
            && header.packet_id != CONFIRMATION_PACKET_ID
            && last > 0
            && header.packet_id != last + 1;
        if gap {
            i += size + 1;
            continue;
        }

        if serving {
            if header.packet_id != CONFIRMATION_PACKET_ID {
                session.last_packet_id_from_clients[player_id] = header.packet_id;
            }
        } else {
            *back_player_count = MIN_PLAYERS as u8 + header.client_count;
            if header.packet_id != CONFIRMATION_PACKET_ID {
                session.last_packet_id_from_server = header.packet_id;
            }
        }

        // The host echoes forwarded traffic back at us.
        if header.player_id == current_player_id {
            i += size + 1;
            continue;
        }

        if size > 0 {
            let mut message = Message {
                player_id: header.player_id,
                data: Vec::new(),
                packet_id: header.packet_id,
            };
            let _ = message.data.extend_from_slice(&words[i + 1..=i + size]);

            if retransmission && header.packet_id == CONFIRMATION_PACKET_ID {
                if !session.handle_confirmation(
                    &message,
                    serving,
                    connected,
                    current_player_id,
                    max_players,
                ) {
                    return Err(LinkError::BadConfirmation);
                }
            } else if messages.push(message).is_err() {
                // More messages than any well-formed frame can carry.
                return Err(LinkError::BadMessage);
            }

            i += size;
        }
        i += 1;
    }

    Ok(messages)
}

// ── Tests ────────────────────────────────────────────────────
