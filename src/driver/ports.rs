//! Port traits: the boundary between the driver core and hardware.
//!
//! ```text
//!   Platform adapter ──▶ Port trait ──▶ LinkDriver (domain)
//! ```
//!
//! Platform integrations implement these traits; the driver consumes
//! them as `&mut impl` arguments at every call site, so the whole
//! core is testable against scripted mocks.
//!
//! The driver owns the ports exclusively between `activate` and
//! `deactivate`: nothing else may touch the bus, the wake pin, or the
//! send timer while a session is live. The bootloader makes the same
//! exclusivity claim for its one-shot run.

/// Serial bus clock/role selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMode {
    /// Console drives the clock at 256 kbps (login).
    Master256Kbps,
    /// Console drives the clock at 2 Mbps (everything after login).
    Master2Mbps,
    /// Peer drives the clock.
    Slave,
}

/// Progress of an interrupt-driven transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncState {
    /// No transfer started.
    Idle,
    /// Transfer started, completion IRQ not yet observed.
    Waiting,
    /// A received word is latched in `async_data`.
    Ready,
}

/// The 32-bit serial bus the adapter is attached to.
///
/// Words are most-significant-byte first on the wire; implementations
/// swap around the native word if needed so callers always think in
/// MSB-first `u32` values.
pub trait SerialPort {
    /// Configure and enable the bus.
    fn activate(&mut self, mode: BusMode);

    /// Release the bus.
    fn deactivate(&mut self);

    /// Blocking 32-bit exchange.
    fn transfer(&mut self, word: u32) -> u32;

    /// Begin an interrupt-driven 32-bit exchange and return
    /// immediately; completion is observed via [`on_serial_isr`]
    /// moving [`async_state`] to `Ready`.
    ///
    /// [`on_serial_isr`]: SerialPort::on_serial_isr
    /// [`async_state`]: SerialPort::async_state
    fn start_transfer(&mut self, word: u32);

    fn async_state(&self) -> AsyncState;

    /// The word received by the most recent completed transfer.
    fn async_data(&self) -> u32;

    /// Serial-complete interrupt body: latch the received word and
    /// mark the transfer `Ready`.
    fn on_serial_isr(&mut self);

    // ── Acknowledge handshake lines ───────────────────────────
    // At 2 Mbps the adapter requires a four-phase SO/SI handshake
    // between transfers; the driver sequences it, the port just
    // drives the pins.

    fn set_so(&mut self, high: bool);

    fn si_high(&self) -> bool;
}

/// The adapter wake pin (SD). Held high for ~50 scan lines before
/// login to drop the adapter into serial mode.
pub trait WakePort {
    fn set_wake(&mut self, high: bool);
}

/// Adapts any embedded-hal output pin into a [`WakePort`]. Pin
/// errors at wake time are swallowed; they surface later as a failed
/// login.
pub struct WakePin<P>(pub P);

impl<P: embedded_hal::digital::OutputPin> WakePort for WakePin<P> {
    fn set_wake(&mut self, high: bool) {
        let _ = self.0.set_state(high.into());
    }
}

/// The hardware timer driving the periodic send loop.
pub trait SendTimer {
    /// Start firing periodically every `interval` ticks.
    fn start(&mut self, interval: u16);

    fn stop(&mut self);
}

/// The free-running vertical-refresh counter used as a coarse
/// timebase. All driver timeouts are expressed in scan lines or
/// whole frames of this counter.
pub trait Timebase {
    /// Current scan line, `0..LINES_PER_FRAME`, wrapping every frame.
    fn vcount(&self) -> u16;
}

/// Everything a live session needs, as one bound.
pub trait AdapterPort: SerialPort + WakePort + SendTimer + Timebase {}

impl<T: SerialPort + WakePort + SendTimer + Timebase> AdapterPort for T {}
