//! Wire protocol for the WaveLink adapter.
//!
//! Everything in this module is pure data transformation: no ports,
//! no state machines. The driver composes these pieces into
//! transactions.
//!
//! Words travel most-significant-byte first on the wire; every value
//! here is expressed in the caller's native `u32` view and the bus
//! port is responsible for byte order.

pub mod broadcast;
pub mod codec;
pub mod header;
pub mod login;

/// Maximum consoles in one session (host + four clients).
pub const MAX_PLAYERS: usize = 5;

/// A session needs a host and at least one client.
pub const MIN_PLAYERS: usize = 2;

/// "Send the next word of the transaction", in either direction.
pub const DATA_REQUEST: u32 = 0x8000_0000;

/// Sent with `Setup` right after login; fixed adapter tuning value.
pub const SETUP_MAGIC: u32 = 0x003C_0420;

/// `IsFinishedConnect` response meaning "still negotiating".
pub const STILL_CONNECTING: u32 = 0x0100_0000;

/// A message header whose packet id is zero carries confirmations.
pub const CONFIRMATION_PACKET_ID: u32 = 0;

/// Whole-frame word caps per role, including the wireless header.
pub const HOST_TRANSFER_WORDS: usize = 20;
/// See [`HOST_TRANSFER_WORDS`].
pub const CLIENT_TRANSFER_WORDS: usize = 4;

/// Per-`send` payload caps, indexed by `retransmission`.
pub const HOST_SEND_LIMITS: [usize; 2] = [19, 14];
/// See [`HOST_SEND_LIMITS`].
pub const CLIENT_SEND_LIMITS: [usize; 2] = [3, 1];

/// Compile-time capacity of the outgoing queue (`buffer_size` must
/// not exceed it).
pub const OUTGOING_QUEUE_CAP: usize = 32;

/// Compile-time capacity of the inbound snapshot.
pub const INCOMING_QUEUE_CAP: usize = 32;

/// Largest response any transaction may legally produce. A count
/// byte beyond this fails the transaction instead of truncating.
pub const RESPONSE_CAP: usize = 64;

/// Scan lines to hold the wake pin high before login.
pub const PING_WAIT_LINES: u32 = 50;

/// Settling wait before a plain (no-handshake) transfer.
pub const TRANSFER_WAIT_LINES: u32 = 15;

/// Scan-line limit for one command transaction / handshake phase.
pub const CMD_TIMEOUT_LINES: u32 = 100;

/// Display frames to let broadcasts accumulate during discovery.
pub const BROADCAST_SEARCH_FRAMES: u32 = 60;

/// Scan lines per display frame of the timebase.
pub const LINES_PER_FRAME: u16 = 228;

/// Scan line at which the vertical blanking period begins.
pub const VBLANK_LINE: u16 = 160;
