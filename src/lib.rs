//! Drive an ESP32-class device's interactive serial console from test and
//! provisioning tooling.
//!
//! A [Console] session owns the serial line: a background reader captures
//! everything the device emits into a bounded raw buffer and an
//! ANSI-stripped text buffer, commands are correlated with their echo, and
//! assertions are scoped to [Mark]s so asynchronous, noisy output can be
//! checked without races. Hardware resets into run or download mode are
//! sequenced over the two serial control lines wired to the device's
//! boot-select and reset straps.
//!
//! ```no_run
//! use std::time::Duration;
//! use espconsole::{Console, ConsoleConfig, DeviceProfile};
//!
//! # fn main() -> espconsole::Result<()> {
//! let mut console = Console::open(
//!     "/dev/ttyUSB0",
//!     ConsoleConfig::default(),
//!     DeviceProfile::default(),
//! )?;
//! let mark = console.reset_to_run();
//! console.wait_for_boot(mark, Duration::from_secs(10))?;
//! console.wait_for_ready(mark, Duration::from_secs(10))?;
//!
//! let mark = console.send_command("nvs_set key str -v \"value\"")?;
//! console.assert_contains("Value stored under key 'key'", mark, Duration::from_secs(5))?;
//! console.close();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod buffer;
pub mod capture;
pub mod config;
pub mod connection;
pub mod error;
pub mod filter;

pub use buffer::{ConsoleBuffer, Mark};
pub use capture::send_line_and_capture;
pub use config::{ConsoleConfig, DeviceProfile};
pub use connection::{Console, ConsoleMatch, Port, ResetMode, SerialInterface};
pub use error::{Error, Result, SerialPortError, SerialPortErrorKind};
