//! Activation and login handshake scenarios.

use wavelink::proto::login::LOGIN_PARTS;
use wavelink::{BusMode, LinkConfig, LinkDriver, LinkState};

use crate::mock_hw::MockAdapter;

#[test]
fn activate_happy_path() {
    let mut hw = MockAdapter::new();
    hw.script_activation();
    let mut driver = LinkDriver::new(LinkConfig::default());

    assert!(driver.activate(&mut hw));
    assert_eq!(driver.state(), LinkState::Authenticated);
    assert!(driver.is_active());
    assert_eq!(driver.last_error(), None);

    // Login ran at the low rate, then the bus switched up.
    assert_eq!(
        hw.bus_activations,
        [BusMode::Master256Kbps, BusMode::Master2Mbps]
    );
    assert!(hw.timer_running);
    assert_eq!(hw.timer_interval, 50);
    // The wake pin was pulsed and released.
    assert!(!hw.wake_high);

    // Step 0 carries the first login part under an all-zero
    // complement; the last step repeats the final part.
    assert_eq!(hw.sent[0], u32::from(LOGIN_PARTS[0]));
    assert_eq!(hw.sent[9] & 0xFFFF, u32::from(LOGIN_PARTS[8]));

    // HELLO then SETUP with the tuning constant.
    assert_eq!(hw.sent[10], 0x9966_0010);
    assert_eq!(hw.sent[12], 0x9966_0117);
    assert_eq!(hw.sent[13], 0x003C_0420);
}

#[test]
fn activate_fails_on_corrupted_login_step() {
    let mut hw = MockAdapter::new();
    hw.script_activation();
    // Corrupt the adapter's reply at step 3.
    hw.replies[3] ^= 0x0001_0000;
    let mut driver = LinkDriver::new(LinkConfig::default());

    assert!(!driver.activate(&mut hw));
    assert_eq!(driver.state(), LinkState::NeedsReset);
    // Login aborts at the mismatch: steps 4+ never go out.
    assert_eq!(hw.sent.len(), 4);
}

#[test]
fn activate_fails_when_hello_is_rejected() {
    let mut hw = MockAdapter::new();
    hw.script_login();
    // HELLO's command word is answered with garbage instead of the
    // data-request echo.
    hw.replies.push_back(0xDEAD_BEEF);
    let mut driver = LinkDriver::new(LinkConfig::default());

    assert!(!driver.activate(&mut hw));
    assert_eq!(driver.state(), LinkState::NeedsReset);
}

#[test]
fn deactivate_releases_hardware() {
    let mut hw = MockAdapter::new();
    hw.script_activation();
    let mut driver = LinkDriver::new(LinkConfig::default());
    assert!(driver.activate(&mut hw));

    driver.deactivate(&mut hw);
    assert!(!driver.is_active());
    assert!(!hw.timer_running);
    assert!(!hw.bus_active);
    assert_eq!(driver.state(), LinkState::NeedsReset);
}

#[test]
fn operations_require_activation() {
    let mut hw = MockAdapter::new();
    let mut driver = LinkDriver::new(LinkConfig::default());

    assert!(!driver.serve(&mut hw, "GAME", "USER"));
    assert!(!driver.send(&mut hw, &[1]));
    assert!(driver.receive().is_empty());
}
