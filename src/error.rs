//! Unified error types for the WaveLink driver.
//!
//! A single `Copy` enum covers every failure the session driver can
//! report. Errors are never propagated out of interrupt context;
//! the driver latches the most recent one into a one-shot slot that
//! [`LinkDriver::last_error`](crate::driver::LinkDriver::last_error)
//! drains. The bootloader has its own error type in [`crate::multiboot`]
//! because it runs once, outside any session.

use core::fmt;

/// Every fallible session operation funnels into this type.
///
/// The three categories carry different recovery policies: user
/// errors leave the session untouched, protocol and liveness errors
/// reset it back to `NeedsReset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    // ── User errors (no reset, caller retries) ────────────────
    /// The operation is not valid in the current session state.
    WrongState,
    /// `serve` was given a game name longer than 14 bytes.
    GameNameTooLong,
    /// `serve` was given a user name longer than 8 bytes.
    UserNameTooLong,
    /// `send` payload is empty, too long for the role, or carries a
    /// foreign author while not hosting.
    InvalidSendSize,
    /// The outgoing queue is at the configured capacity.
    BufferIsFull,

    // ── Adapter protocol errors (session reset) ───────────────
    /// A command/response transaction failed (bad echo, bad magic,
    /// bad acknowledge byte, or oversized response).
    CommandFailed,
    /// The adapter assigned a player id outside the configured range.
    WeirdPlayerId,
    /// The steady-state outbound data transaction failed.
    SendDataFailed,
    /// The steady-state inbound data transaction failed.
    ReceiveDataFailed,
    /// A confirmation message was malformed for the current role.
    BadConfirmation,
    /// An inbound frame declared a payload beyond its own length.
    BadMessage,
    /// The four-phase handshake lines did not toggle in time.
    AcknowledgeFailed,

    // ── Liveness errors (session reset) ───────────────────────
    /// Too many display frames elapsed without receiving a payload.
    Timeout,
    /// A tracked peer went silent for too many send/receive rounds.
    RemoteTimeout,
}

impl LinkError {
    /// User errors do not reset the session; the caller fixes the
    /// input and retries.
    pub const fn is_user_error(self) -> bool {
        matches!(
            self,
            Self::WrongState
                | Self::GameNameTooLong
                | Self::UserNameTooLong
                | Self::InvalidSendSize
                | Self::BufferIsFull
        )
    }

    /// Liveness errors come from timeout counters rather than a
    /// malformed exchange.
    pub const fn is_liveness_error(self) -> bool {
        matches!(self, Self::Timeout | Self::RemoteTimeout)
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongState => write!(f, "wrong state"),
            Self::GameNameTooLong => write!(f, "game name too long"),
            Self::UserNameTooLong => write!(f, "user name too long"),
            Self::InvalidSendSize => write!(f, "invalid send size"),
            Self::BufferIsFull => write!(f, "outgoing buffer is full"),
            Self::CommandFailed => write!(f, "adapter command failed"),
            Self::WeirdPlayerId => write!(f, "weird player id"),
            Self::SendDataFailed => write!(f, "send data failed"),
            Self::ReceiveDataFailed => write!(f, "receive data failed"),
            Self::BadConfirmation => write!(f, "bad confirmation"),
            Self::BadMessage => write!(f, "bad message"),
            Self::AcknowledgeFailed => write!(f, "acknowledge handshake failed"),
            Self::Timeout => write!(f, "receive timeout"),
            Self::RemoteTimeout => write!(f, "remote peer timeout"),
        }
    }
}
