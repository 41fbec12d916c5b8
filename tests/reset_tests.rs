//! Hardware reset sequencing over the boot-select and reset straps.

mod common;

use std::time::Duration;

use espconsole::{Console, DeviceProfile};
use regex::Regex;

use common::{fast_config, init_logging, LineEvent, MockSerial};

fn open_console(mock: &MockSerial) -> Console<MockSerial> {
    Console::attach(mock.clone(), fast_config(), DeviceProfile::default())
        .expect("attach failed")
}

#[test]
fn open_releases_both_control_lines() {
    init_logging();
    let mock = MockSerial::new();
    let mut console = open_console(&mock);

    assert_eq!(
        mock.events(),
        vec![LineEvent::BootSelect(false), LineEvent::Reset(false)]
    );
    console.close();
}

#[test]
fn run_reset_pulses_with_strap_released() {
    init_logging();
    let mock = MockSerial::new();
    let mut console = open_console(&mock);
    mock.clear_events();

    console.reset_to_run();
    assert_eq!(
        mock.events(),
        vec![
            LineEvent::BootSelect(false),
            LineEvent::Reset(true),
            LineEvent::Reset(false),
        ]
    );
    console.close();
}

#[test]
fn bootloader_reset_holds_strap_through_pulse() {
    init_logging();
    let mock = MockSerial::new();
    let mut console = open_console(&mock);
    mock.clear_events();

    console.reset_to_bootloader();
    // The device samples boot-select at the reset edge: the strap is
    // asserted before the pulse and only released after it.
    assert_eq!(
        mock.events(),
        vec![
            LineEvent::BootSelect(true),
            LineEvent::Reset(true),
            LineEvent::Reset(false),
            LineEvent::BootSelect(false),
        ]
    );
    console.close();
}

#[test]
fn boot_banner_after_reset_is_not_lost() {
    init_logging();
    let mock = MockSerial::new();
    // Banner is emitted immediately upon reset release, like real hardware.
    mock.on_reset_release(&[b"I (56) boot: Multicore bootloader v1.2\r\n"]);
    let mut console = open_console(&mock);

    let mark = console.reset_to_run();
    console
        .assert_matches(
            &Regex::new(r"boot: Multicore bootloader").unwrap(),
            mark,
            Duration::from_secs(10),
        )
        .unwrap();
    console.close();
}

#[test]
fn wait_for_boot_uses_profile_banner() {
    init_logging();
    let mock = MockSerial::new();
    mock.on_reset_release(&[b"I (56) boot: Multicore bootloader v1.2\r\n"]);
    let mut console = open_console(&mock);

    let mark = console.reset_to_run();
    console.wait_for_boot(mark, Duration::from_secs(5)).unwrap();
    console.close();
}

#[test]
fn close_leaves_device_runnable() {
    init_logging();
    let mock = MockSerial::new();
    let mut console = open_console(&mock);

    console.reset_to_bootloader();
    console.close();

    let events = mock.events();
    assert!(events.len() >= 2);
    assert_eq!(
        &events[events.len() - 2..],
        &[LineEvent::BootSelect(false), LineEvent::Reset(false)]
    );
}

#[test]
fn control_line_failures_are_swallowed() {
    init_logging();
    let mock = MockSerial::new();
    mock.fail_control_lines();
    // Open succeeds even though the adapter rejects DTR/RTS.
    let mut console = open_console(&mock);

    // Reset is best-effort: no panic, no error, and the session stays usable.
    let mark = console.reset_to_run();
    mock.push(b"still alive\r\n");
    console
        .assert_contains("still alive", mark, Duration::from_secs(2))
        .unwrap();
    console.close();
}
