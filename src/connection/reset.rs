//! Reset sequences for the device's boot straps.
//!
//! Two serial control signals double as device straps: DTR drives
//! boot-select (asserted = download mode) and RTS drives the reset line
//! (asserted = held in reset). The device samples the boot-select strap only
//! at the reset edge, so ordering matters: entering the bootloader requires
//! the strap asserted before the pulse and held through it, while a normal
//! run releases it first.

use std::{thread, time::Duration};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::SerialInterface;

/// Delay after driving boot-select before touching the reset line.
const STRAP_SETTLE: Duration = Duration::from_millis(10);
/// Hold time after releasing reset, before the strap may change again.
const POST_RESET_HOLD: Duration = Duration::from_millis(50);

fn set_boot_select<P: SerialInterface + ?Sized>(serial: &mut P, asserted: bool) {
    match serial.write_data_terminal_ready(asserted) {
        Ok(()) => debug!("boot-select asserted={asserted}"),
        Err(e) => warn!("failed to drive boot-select line: {e}"),
    }
}

fn set_reset<P: SerialInterface + ?Sized>(serial: &mut P, asserted: bool) {
    match serial.write_request_to_send(asserted) {
        Ok(()) => debug!("reset asserted={asserted}"),
        Err(e) => warn!("failed to drive reset line: {e}"),
    }
}

/// Leaves both control lines deasserted so the device is runnable.
///
/// Used on open and on close, independent of the last reset performed.
pub(crate) fn release_control_lines<P: SerialInterface + ?Sized>(serial: &mut P) {
    set_boot_select(serial, false);
    set_reset(serial, false);
}

/// Boot mode a hardware reset lands the device in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ResetMode {
    /// Hold boot-select through the reset pulse; the device wakes in
    /// download mode.
    Bootloader,
    /// Release boot-select first; the device wakes into its application.
    Run,
}

impl ResetMode {
    /// Performs the assert/pulse/release sequence for this mode.
    ///
    /// Every line toggle is best-effort: failures are logged and swallowed.
    /// Correctness is enforced by the caller's follow-up assertion on the
    /// boot banner, not by this call succeeding.
    pub fn sequence<P: SerialInterface + ?Sized>(self, serial: &mut P, pulse: Duration) {
        debug!("reset sequence: {self} (pulse {pulse:?})");
        match self {
            ResetMode::Bootloader => {
                set_boot_select(serial, true);
                thread::sleep(STRAP_SETTLE);
                set_reset(serial, true);
                thread::sleep(pulse);
                set_reset(serial, false);
                thread::sleep(POST_RESET_HOLD);
                set_boot_select(serial, false);
            }
            ResetMode::Run => {
                set_boot_select(serial, false);
                thread::sleep(STRAP_SETTLE);
                set_reset(serial, true);
                thread::sleep(pulse);
                set_reset(serial, false);
                thread::sleep(POST_RESET_HOLD);
            }
        }
    }
}
