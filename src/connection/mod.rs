//! Live console session with a target device.
//!
//! The [Console] struct owns the serial line, a background reader draining it
//! into the capture buffers, and the wait/match primitives callers use to
//! synchronize on device output. Exactly one reader thread exists per open
//! session; the buffers are the only shared mutable state, guarded by a single
//! lock so raw and clean capture are always observed as a consistent pair.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use regex::Regex;

use crate::{
    buffer::{ConsoleBuffer, Mark},
    config::{ConsoleConfig, DeviceProfile},
    error::{Error, Result, SerialPortError},
    filter,
};

pub(crate) mod reset;

pub use reset::ResetMode;

/// How long `close` waits for the reader thread before abandoning it.
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);
const READER_JOIN_POLL: Duration = Duration::from_millis(5);
/// Lines of clean text attached to diagnostics that have no mark to scope to.
const DIAGNOSTIC_TAIL_LINES: usize = 50;

#[cfg(unix)]
/// Alias for the serial TTYPort.
pub type Port = serialport::TTYPort;
#[cfg(windows)]
/// Alias for the serial COMPort.
pub type Port = serialport::COMPort;

/// Blocking serial interface the console drives.
///
/// Implemented for the native [Port]; test harnesses substitute scripted
/// in-memory transports.
pub trait SerialInterface: Send {
    /// Port name, e.g. "/dev/ttyUSB0" or "COM3".
    fn name(&self) -> Option<String>;

    /// Sets the bound on a single blocking [read](Self::read).
    fn set_timeout(&mut self, timeout: Duration) -> std::result::Result<(), SerialPortError>;

    /// Reads available bytes, returning `Ok(0)` once the timeout elapses
    /// with nothing to deliver.
    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, SerialPortError>;

    /// Writes the whole buffer as one atomic write.
    fn write_all(&mut self, buf: &[u8]) -> std::result::Result<(), SerialPortError>;

    /// Flushes the output queue.
    fn flush(&mut self) -> std::result::Result<(), SerialPortError>;

    /// Discards pending receive and transmit queues.
    fn clear_buffers(&mut self) -> std::result::Result<(), SerialPortError>;

    /// Drives the DTR line (boot-select strap; asserted = download mode).
    fn write_data_terminal_ready(&mut self, level: bool)
        -> std::result::Result<(), SerialPortError>;

    /// Drives the RTS line (reset strap; asserted = held in reset).
    fn write_request_to_send(&mut self, level: bool) -> std::result::Result<(), SerialPortError>;

    /// Opens a second handle onto the same line for the reader thread.
    fn try_clone(&self) -> std::result::Result<Self, SerialPortError>
    where
        Self: Sized;
}

impl SerialInterface for Port {
    fn name(&self) -> Option<String> {
        serialport::SerialPort::name(self)
    }

    fn set_timeout(&mut self, timeout: Duration) -> std::result::Result<(), SerialPortError> {
        serialport::SerialPort::set_timeout(self, timeout).map_err(SerialPortError::from)
    }

    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, SerialPortError> {
        match std::io::Read::read(self, buf) {
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(SerialPortError::from(e)),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> std::result::Result<(), SerialPortError> {
        std::io::Write::write_all(self, buf).map_err(SerialPortError::from)
    }

    fn flush(&mut self) -> std::result::Result<(), SerialPortError> {
        std::io::Write::flush(self).map_err(SerialPortError::from)
    }

    fn clear_buffers(&mut self) -> std::result::Result<(), SerialPortError> {
        serialport::SerialPort::clear(self, serialport::ClearBuffer::All)
            .map_err(SerialPortError::from)
    }

    fn write_data_terminal_ready(
        &mut self,
        level: bool,
    ) -> std::result::Result<(), SerialPortError> {
        serialport::SerialPort::write_data_terminal_ready(self, level)
            .map_err(SerialPortError::from)
    }

    fn write_request_to_send(&mut self, level: bool) -> std::result::Result<(), SerialPortError> {
        serialport::SerialPort::write_request_to_send(self, level).map_err(SerialPortError::from)
    }

    fn try_clone(&self) -> std::result::Result<Self, SerialPortError>
    where
        Self: Sized,
    {
        self.try_clone_native().map_err(SerialPortError::from)
    }
}

/// Owned result of a successful [Console::wait_match].
#[derive(Debug, Clone)]
pub struct ConsoleMatch {
    text: String,
    groups: Vec<Option<String>>,
}

impl ConsoleMatch {
    fn from_captures(caps: &regex::Captures<'_>) -> Self {
        ConsoleMatch {
            text: caps[0].to_string(),
            groups: caps
                .iter()
                .skip(1)
                .map(|g| g.map(|m| m.as_str().to_string()))
                .collect(),
        }
    }

    /// The full matched text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Capture group `index`, 1-based as in [regex::Captures].
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index.checked_sub(1)?)?.as_deref()
    }
}

/// An open console session.
///
/// Opening spawns the background reader; dropping (or [close](Self::close))
/// stops it and leaves the device runnable with both control lines released.
/// Writes to the transport are single-caller by contract: the driver does not
/// serialize concurrent `send_command` calls.
pub struct Console<P: SerialInterface + 'static = Port> {
    serial: P,
    config: ConsoleConfig,
    profile: DeviceProfile,
    buffer: Arc<Mutex<ConsoleBuffer>>,
    stop: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl<P: SerialInterface + fmt::Debug + 'static> fmt::Debug for Console<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("serial", &self.serial)
            .field("config", &self.config)
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

fn lock_buffer(buffer: &Mutex<ConsoleBuffer>) -> MutexGuard<'_, ConsoleBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Console<Port> {
    /// Opens `port` and spawns the background reader.
    ///
    /// Pending receive and transmit queues are cleared and both control
    /// lines set to not-asserted before any capture begins.
    pub fn open(port: &str, config: ConsoleConfig, profile: DeviceProfile) -> Result<Self> {
        info!("opening serial port {port} @ {}", config.baud);
        let serial = serialport::new(port, config.baud)
            .timeout(config.read_timeout)
            .open_native()
            .map_err(SerialPortError::from)?;
        Self::attach(serial, config, profile)
    }
}

impl<P: SerialInterface + 'static> Console<P> {
    /// Wraps an already-open transport and spawns the background reader.
    pub fn attach(mut serial: P, config: ConsoleConfig, profile: DeviceProfile) -> Result<Self> {
        serial.set_timeout(config.read_timeout)?;
        serial.clear_buffers()?;
        reset::release_control_lines(&mut serial);

        let buffer = Arc::new(Mutex::new(ConsoleBuffer::new(config.buffer_limit)));
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));

        let reader_serial = serial.try_clone()?;
        let reader = thread::Builder::new()
            .name("espconsole-reader".into())
            .spawn({
                let buffer = Arc::clone(&buffer);
                let stop = Arc::clone(&stop);
                let stopped = Arc::clone(&stopped);
                let chunk_size = config.read_chunk;
                move || reader_loop(reader_serial, &buffer, &stop, &stopped, chunk_size)
            })
            .map_err(Error::Spawn)?;

        Ok(Console {
            serial,
            config,
            profile,
            buffer,
            stop,
            stopped,
            reader: Some(reader),
        })
    }

    /// Whether the background reader has stopped.
    ///
    /// Once stopped (fatal transport error or close), session calls fail
    /// with [Error::ConnectionClosed] instead of hanging.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// The sentinel profile this session was opened with.
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Takes a mark at the current logical end of capture.
    pub fn get_mark(&self) -> Mark {
        lock_buffer(&self.buffer).mark()
    }

    /// Clean text captured since `mark`.
    pub fn text_from(&self, mark: Mark) -> String {
        lock_buffer(&self.buffer).clean_from(mark).to_string()
    }

    /// Raw bytes captured since `mark`, clamped to what eviction has kept.
    pub fn raw_from(&self, mark: Mark) -> Vec<u8> {
        lock_buffer(&self.buffer).raw_from(mark).to_vec()
    }

    /// Last `n` lines of clean text, for postmortem dumps.
    pub fn tail_lines(&self, n: usize) -> String {
        lock_buffer(&self.buffer).tail_lines(n)
    }

    /// Hardware-resets the device into normal run mode.
    ///
    /// Returns a mark taken immediately before the reset pulse, so a
    /// follow-up wait for the boot banner is scoped to exactly this reset's
    /// output with no race losing the first bytes.
    pub fn reset_to_run(&mut self) -> Mark {
        self.reset(ResetMode::Run)
    }

    /// Hardware-resets the device into the download-mode bootloader.
    ///
    /// Returns a mark taken immediately before the reset pulse.
    pub fn reset_to_bootloader(&mut self) -> Mark {
        self.reset(ResetMode::Bootloader)
    }

    fn reset(&mut self, mode: ResetMode) -> Mark {
        info!("hardware reset: {mode}");
        let mark = self.get_mark();
        mode.sequence(&mut self.serial, self.config.reset_pulse);
        mark
    }

    /// Sends one command line and returns a mark scoping its output.
    ///
    /// The line plus terminator goes out as one atomic write; interleaved
    /// partial writes desync the device-side line editor. The call then
    /// waits up to the configured echo timeout for the terminated command
    /// echo to reappear in clean capture after the mark. The echo wait is
    /// advisory: some inputs (control characters) never echo, so a missing
    /// echo logs at debug and the call still succeeds. True failures are
    /// caught by the caller's own follow-up assertion.
    pub fn send_command(&mut self, line: &str) -> Result<Mark> {
        if self.is_stopped() {
            return Err(Error::ConnectionClosed);
        }
        let mark = self.get_mark();
        debug!("TX {line}");
        self.serial.write_all(format!("{line}\r\n").as_bytes())?;
        self.serial.flush()?;

        // Only a terminated echo counts; the command text alone may be a
        // partial echo or unrelated output.
        let echo = format!("{line}\n");
        let echo_crlf = format!("{line}\r\n");
        if !line.is_empty()
            && !self.poll_until(mark, self.config.echo_timeout, |text| {
                text.contains(&echo_crlf) || text.contains(&echo)
            })?
        {
            debug!(
                "no echo for command within {:?} (advisory only)",
                self.config.echo_timeout
            );
        }
        Ok(mark)
    }

    /// Waits until `needle` appears in clean capture after `mark`.
    ///
    /// On timeout the error embeds the full text captured since the mark;
    /// a bare timeout carries no triage value for intermittent hardware
    /// faults.
    pub fn assert_contains(&self, needle: &str, mark: Mark, timeout: Duration) -> Result<()> {
        if self.poll_until(mark, timeout, |text| text.contains(needle))? {
            Ok(())
        } else {
            Err(self.timeout_error(format!("substring {needle:?}"), mark, timeout))
        }
    }

    /// Waits until `pattern` matches clean capture after `mark`.
    pub fn assert_matches(&self, pattern: &Regex, mark: Mark, timeout: Duration) -> Result<()> {
        self.wait_match(pattern, mark, timeout).map(|_| ())
    }

    /// Waits until `pattern` matches and returns the matched text and
    /// capture groups, for structured extraction from console output.
    pub fn wait_match(
        &self,
        pattern: &Regex,
        mark: Mark,
        timeout: Duration,
    ) -> Result<ConsoleMatch> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let buf = lock_buffer(&self.buffer);
                if let Some(caps) = pattern.captures(buf.clean_from(mark)) {
                    return Ok(ConsoleMatch::from_captures(&caps));
                }
            }
            // Checked after the capture read: output that arrived before the
            // reader died can still satisfy the wait.
            if self.is_stopped() {
                return Err(Error::ConnectionClosed);
            }
            if Instant::now() >= deadline {
                return Err(self.timeout_error(format!("pattern /{pattern}/"), mark, timeout));
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    /// Waits until no new bytes have arrived for `silence`.
    ///
    /// Detects "this boot or command has finished emitting output" without a
    /// fixed end marker. Idempotent once quiescent. Fails with a timeout
    /// error if `timeout` elapses before the line goes quiet.
    pub fn wait_for_idle(&self, silence: Duration, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut last_total = lock_buffer(&self.buffer).total_raw();
        let mut last_growth = Instant::now();
        loop {
            if last_growth.elapsed() >= silence {
                return Ok(());
            }
            // A dead reader makes silence meaningless: the buffer can never
            // grow again, so quiescence would be confirmed vacuously.
            if self.is_stopped() {
                return Err(Error::ConnectionClosed);
            }
            if Instant::now() >= deadline {
                return Err(Error::timed_out(
                    "console to become idle",
                    timeout,
                    self.tail_lines(DIAGNOSTIC_TAIL_LINES),
                ));
            }
            thread::sleep(self.config.poll_interval);
            let total = lock_buffer(&self.buffer).total_raw();
            if total != last_total {
                last_total = total;
                last_growth = Instant::now();
            }
        }
    }

    /// Waits for the profile's boot banner after `mark`.
    ///
    /// Conventionally follows [reset_to_run](Self::reset_to_run) with the
    /// mark that call returned.
    pub fn wait_for_boot(&self, mark: Mark, timeout: Duration) -> Result<()> {
        self.assert_matches(self.profile.boot_banner(), mark, timeout)
    }

    /// Waits for each of the profile's ready phrases after `mark`, in order.
    ///
    /// `timeout` applies per phrase; deadlines are never pooled across
    /// chained waits.
    pub fn wait_for_ready(&self, mark: Mark, timeout: Duration) -> Result<()> {
        let phrases = self.profile.ready_phrases().to_vec();
        for phrase in &phrases {
            self.assert_contains(phrase, mark, timeout)?;
        }
        Ok(())
    }

    /// Waits for the profile's prompt after `mark`, signalling the console
    /// is accepting commands.
    pub fn wait_for_prompt(&self, mark: Mark, timeout: Duration) -> Result<()> {
        self.assert_contains(self.profile.prompt(), mark, timeout)
    }

    /// Stops the reader and leaves the device runnable.
    ///
    /// Signals the reader, joins it with a bounded timeout (abandoning it if
    /// it does not observe the signal promptly), then deasserts both control
    /// lines regardless of the last reset performed. Called automatically on
    /// drop.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            info!("closing console on {:?}", self.serial.name());
            let deadline = Instant::now() + READER_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(READER_JOIN_POLL);
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("reader thread did not stop in time, abandoning it");
            }
            reset::release_control_lines(&mut self.serial);
        }
    }

    /// Polls clean capture after `mark` until `pred` holds or `timeout`
    /// elapses. The buffer lock is held only for the read, never across the
    /// sleep between iterations.
    ///
    /// A stopped reader fails the poll with [Error::ConnectionClosed] rather
    /// than burning the deadline against a buffer that can never grow. The
    /// stopped check runs after the capture read, so output that arrived
    /// before the fault can still satisfy `pred`.
    fn poll_until(
        &self,
        mark: Mark,
        timeout: Duration,
        pred: impl Fn(&str) -> bool,
    ) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let buf = lock_buffer(&self.buffer);
                if pred(buf.clean_from(mark)) {
                    return Ok(true);
                }
            }
            if self.is_stopped() {
                return Err(Error::ConnectionClosed);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    fn timeout_error(&self, operation: String, mark: Mark, timeout: Duration) -> Error {
        Error::timed_out(operation, timeout, self.text_from(mark))
    }
}

impl<P: SerialInterface + 'static> Drop for Console<P> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drains the transport into the capture buffers for the session's lifetime.
///
/// Never panics across the thread boundary: a fatal transport error stops the
/// loop and sets the stopped flag, and later session calls fail with a
/// distinct closed-connection error instead of hanging.
fn reader_loop<P: SerialInterface>(
    mut serial: P,
    buffer: &Mutex<ConsoleBuffer>,
    stop: &AtomicBool,
    stopped: &AtomicBool,
    chunk_size: usize,
) {
    let mut chunk = vec![0u8; chunk_size];
    while !stop.load(Ordering::Relaxed) {
        let n = match serial.read(&mut chunk) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(e) => {
                warn!("serial read failed, stopping reader: {e}");
                break;
            }
        };

        let mut data = chunk[..n].to_vec();
        if let Some(scrubbed) = filter::scrub_cpr_queries(&data) {
            // The device-side line editor stalls until its cursor position
            // query is answered.
            if let Err(e) = serial
                .write_all(filter::CPR_REPLY)
                .and_then(|()| serial.flush())
            {
                warn!("failed to answer cursor position query: {e}");
            }
            data = scrubbed;
        }

        let clean = filter::clean_chunk(&data);
        if !clean.is_empty() {
            debug!("RX {}", clean.trim_end_matches(['\r', '\n']));
        }
        // One lock acquisition for both appends keeps raw and clean capture
        // mutually consistent for concurrent readers.
        lock_buffer(buffer).append(&data, &clean);
    }
    stopped.store(true, Ordering::Relaxed);
    debug!("reader loop exited");
}
