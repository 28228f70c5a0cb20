//! Process-wide interrupt dispatch.
//!
//! Raw ISR trampolines have no user context, so platforms that wire
//! the driver to real interrupt vectors need one process-wide cell
//! naming the current dispatch target. The platform installs a
//! target (driver + ports, bundled behind [`IsrTarget`]) at
//! activation and removes it at teardown; the three trampolines
//! forward to whatever is installed and do nothing otherwise.
//!
//! Access is serialised with `critical-section`, so installation and
//! dispatch are safe even when the trampolines preempt foreground
//! code. Dispatching while nothing is installed is a programming
//! error upstream; it is a no-op here (with a debug assertion)
//! because panicking inside an interrupt helps nobody.

use core::cell::RefCell;

use critical_section::Mutex;

/// What the ISR trampolines forward to. Implement this on a platform
/// struct that owns the [`LinkDriver`](crate::driver::LinkDriver)
/// and its ports. `Send` because the cell is shared with interrupt
/// context.
pub trait IsrTarget: Send {
    /// Vertical-refresh interrupt.
    fn vblank(&mut self);
    /// Serial-complete interrupt.
    fn serial(&mut self);
    /// Periodic send-timer interrupt.
    fn timer(&mut self);
}

static TARGET: Mutex<RefCell<Option<&'static mut dyn IsrTarget>>> =
    Mutex::new(RefCell::new(None));

/// Install `target` as the dispatch target. Returns the previous
/// target so the platform can park it.
pub fn install(target: &'static mut dyn IsrTarget) -> Option<&'static mut dyn IsrTarget> {
    critical_section::with(|cs| TARGET.borrow_ref_mut(cs).replace(target))
}

/// Remove and return the current target.
pub fn uninstall() -> Option<&'static mut dyn IsrTarget> {
    critical_section::with(|cs| TARGET.borrow_ref_mut(cs).take())
}

/// True while a target is installed.
pub fn is_installed() -> bool {
    critical_section::with(|cs| TARGET.borrow_ref(cs).is_some())
}

/// Vertical-refresh trampoline; wire to the platform's VBlank IRQ.
pub fn isr_vblank() {
    dispatch(|target| target.vblank());
}

/// Serial-complete trampoline; wire to the serial IRQ.
pub fn isr_serial() {
    dispatch(|target| target.serial());
}

/// Send-timer trampoline; wire to the configured timer IRQ.
pub fn isr_timer() {
    dispatch(|target| target.timer());
}

fn dispatch(f: fn(&mut dyn IsrTarget)) {
    critical_section::with(|cs| {
        let mut target = TARGET.borrow_ref_mut(cs);
        match target.as_mut() {
            Some(target) => f(&mut **target),
            None => debug_assert!(false, "ISR fired with no target installed"),
        }
    });
}

// ── Tests ────────────────────────────────────────────────────
