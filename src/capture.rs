//! Stateless one-shot command capture.
//!
//! For tools that issue a single command and exit, holding a session with a
//! background reader is overkill. [send_line_and_capture] writes the line,
//! then drains the transport on the caller's thread until the device goes
//! quiet, emulating the terminal's cursor position reply inline.

use std::{
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{config::ConsoleConfig, connection::SerialInterface, error::Result, filter};

const ONE_SHOT_READ_CHUNK: usize = 256;
const ONE_SHOT_POLL: Duration = Duration::from_millis(20);

/// Sends one command line and returns the filtered transcript of whatever
/// the device emits in response.
///
/// Reads until either no bytes arrive for `config.idle_threshold` or
/// `config.capture_timeout` elapses, whichever comes first. There is no echo
/// concept in this mode; quiescence is the only synchronization. Transport
/// read and write failures propagate, unlike control-line toggling elsewhere:
/// with no session to fall back on, a dead line makes the transcript
/// meaningless.
pub fn send_line_and_capture<P: SerialInterface>(
    serial: &mut P,
    line: &str,
    config: &ConsoleConfig,
) -> Result<String> {
    debug!("TX {line}");
    serial.write_all(format!("{line}\r\n").as_bytes())?;
    serial.flush()?;

    let start = Instant::now();
    let mut last_data = start;
    let mut captured = Vec::new();
    let mut chunk = [0u8; ONE_SHOT_READ_CHUNK];

    loop {
        let n = serial.read(&mut chunk)?;
        if n > 0 {
            let mut data = chunk[..n].to_vec();
            if let Some(scrubbed) = filter::scrub_cpr_queries(&data) {
                if let Err(e) = serial
                    .write_all(filter::CPR_REPLY)
                    .and_then(|()| serial.flush())
                {
                    warn!("failed to answer cursor position query: {e}");
                }
                data = scrubbed;
            }
            captured.extend_from_slice(&data);
            last_data = Instant::now();
        } else {
            if last_data.elapsed() >= config.idle_threshold {
                break;
            }
            thread::sleep(ONE_SHOT_POLL);
        }
        if start.elapsed() >= config.capture_timeout {
            break;
        }
    }

    Ok(filter::clean_chunk(&captured))
}
