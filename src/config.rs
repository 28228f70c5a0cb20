//! Session configuration parameters.
//!
//! All tunable parameters of the WaveLink session driver. The struct
//! is immutable once the driver is activated; callers persisting a
//! configuration should [`validate`](LinkConfig::validate) it before
//! handing it to the driver.

use serde::{Deserialize, Serialize};

use crate::proto;

/// Core session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    // --- Topology ---
    /// Host re-broadcasts client messages to the other clients.
    pub forwarding: bool,
    /// Keep outgoing messages until the peer confirms them.
    pub retransmission: bool,
    /// Maximum number of consoles in the session (2-5).
    pub max_players: u8,

    // --- Liveness ---
    /// Display frames without an inbound payload before the session
    /// resets with `Timeout`.
    pub timeout: u32,
    /// Outbound send/receive rounds without hearing from a tracked
    /// peer before the session resets with `RemoteTimeout`.
    pub remote_timeout: u32,

    // --- Buffers & timing ---
    /// Maximum queued outgoing messages.
    pub buffer_size: usize,
    /// Send-timer reload value (hardware timer ticks between rounds).
    pub interval: u16,
    /// Which hardware timer drives the periodic send loop (0-3).
    pub send_timer_id: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            forwarding: true,
            retransmission: true,
            max_players: proto::MAX_PLAYERS as u8,

            timeout: 5,         // frames
            remote_timeout: 5,  // rounds

            buffer_size: 30,
            interval: 50,
            send_timer_id: 3,
        }
    }
}

impl LinkConfig {
    /// Range-check every field. Invalid values are rejected, not
    /// clamped, so a corrupted stored config cannot silently degrade
    /// the session.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_players < proto::MIN_PLAYERS as u8 || self.max_players > proto::MAX_PLAYERS as u8
        {
            return Err("max_players out of range (2-5)");
        }
        if self.timeout == 0 {
            return Err("timeout must be at least 1 frame");
        }
        if self.remote_timeout == 0 {
            return Err("remote_timeout must be at least 1 round");
        }
        if self.buffer_size == 0 || self.buffer_size > proto::OUTGOING_QUEUE_CAP {
            return Err("buffer_size out of range");
        }
        if self.interval == 0 {
            return Err("interval must be non-zero");
        }
        if self.send_timer_id > 3 {
            return Err("send_timer_id out of range (0-3)");
        }
        Ok(())
    }
}
