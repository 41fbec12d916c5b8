//! Scripted in-memory serial transport for exercising the console driver
//! without hardware.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use espconsole::{ConsoleConfig, SerialInterface, SerialPortError};

/// One control-line transition observed by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    BootSelect(bool),
    Reset(bool),
}

type Responder = Box<dyn FnMut(&[u8], &mut VecDeque<Vec<u8>>) + Send>;

#[derive(Default)]
struct MockState {
    rx: VecDeque<Vec<u8>>,
    tx: Vec<u8>,
    events: Vec<LineEvent>,
    on_reset_release: Vec<Vec<u8>>,
    rts: bool,
    responder: Option<Responder>,
    fail_reads: bool,
    fail_control_lines: bool,
}

/// In-memory transport; clones share the same line, as a cloned port would.
#[derive(Clone)]
pub struct MockSerial {
    state: Arc<Mutex<MockState>>,
}

impl MockSerial {
    pub fn new() -> Self {
        MockSerial {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Queues one chunk the "device" will emit; each chunk is delivered by
    /// one read call, so fragmentation is under test control.
    pub fn push(&self, bytes: &[u8]) {
        self.state.lock().unwrap().rx.push_back(bytes.to_vec());
    }

    /// Installs a device simulator invoked with every write; it may queue
    /// response chunks (echo included) for later reads.
    pub fn set_responder(
        &self,
        responder: impl FnMut(&[u8], &mut VecDeque<Vec<u8>>) + Send + 'static,
    ) {
        self.state.lock().unwrap().responder = Some(Box::new(responder));
    }

    /// Queues chunks emitted the moment the reset line is released, like a
    /// device printing its boot banner straight out of reset.
    pub fn on_reset_release(&self, chunks: &[&[u8]]) {
        let mut state = self.state.lock().unwrap();
        for chunk in chunks {
            state.on_reset_release.push(chunk.to_vec());
        }
    }

    /// Everything written to the transport so far.
    pub fn tx_bytes(&self) -> Vec<u8> {
        self.state.lock().unwrap().tx.clone()
    }

    /// Control-line transitions observed so far.
    pub fn events(&self) -> Vec<LineEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().unwrap().events.clear();
    }

    /// Makes every subsequent read fail, simulating a vanished line.
    pub fn fail_reads(&self) {
        self.state.lock().unwrap().fail_reads = true;
    }

    /// Makes control-line toggling fail, simulating an adapter without
    /// DTR/RTS support.
    pub fn fail_control_lines(&self) {
        self.state.lock().unwrap().fail_control_lines = true;
    }
}

impl SerialInterface for MockSerial {
    fn name(&self) -> Option<String> {
        Some("mock".to_string())
    }

    fn set_timeout(&mut self, _timeout: Duration) -> Result<(), SerialPortError> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialPortError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_reads {
                return Err(SerialPortError::io("simulated transport fault"));
            }
            if let Some(mut chunk) = state.rx.pop_front() {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    let rest = chunk.split_off(n);
                    state.rx.push_front(rest);
                }
                return Ok(n);
            }
        }
        // Emulate a bounded-timeout read with nothing to deliver.
        thread::sleep(Duration::from_millis(2));
        Ok(0)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), SerialPortError> {
        let mut state = self.state.lock().unwrap();
        state.tx.extend_from_slice(buf);
        if let Some(mut responder) = state.responder.take() {
            responder(buf, &mut state.rx);
            state.responder = Some(responder);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SerialPortError> {
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<(), SerialPortError> {
        let mut state = self.state.lock().unwrap();
        state.rx.clear();
        state.tx.clear();
        Ok(())
    }

    fn write_data_terminal_ready(&mut self, level: bool) -> Result<(), SerialPortError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_control_lines {
            return Err(SerialPortError::io("no DTR on this adapter"));
        }
        state.events.push(LineEvent::BootSelect(level));
        Ok(())
    }

    fn write_request_to_send(&mut self, level: bool) -> Result<(), SerialPortError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_control_lines {
            return Err(SerialPortError::io("no RTS on this adapter"));
        }
        if state.rts && !level {
            let pending: Vec<Vec<u8>> = state.on_reset_release.drain(..).collect();
            for chunk in pending {
                state.rx.push_back(chunk);
            }
        }
        state.rts = level;
        state.events.push(LineEvent::Reset(level));
        Ok(())
    }

    fn try_clone(&self) -> Result<Self, SerialPortError> {
        Ok(self.clone())
    }
}

/// Config with short timings so the suite runs fast.
pub fn fast_config() -> ConsoleConfig {
    ConsoleConfig {
        read_timeout: Duration::from_millis(5),
        poll_interval: Duration::from_millis(10),
        echo_timeout: Duration::from_millis(200),
        reset_pulse: Duration::from_millis(10),
        idle_threshold: Duration::from_millis(60),
        capture_timeout: Duration::from_secs(2),
        ..ConsoleConfig::default()
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Occurrences of `needle` in `hay`.
pub fn count_occurrences(hay: &[u8], needle: &[u8]) -> usize {
    if needle.is_empty() || hay.len() < needle.len() {
        return 0;
    }
    hay.windows(needle.len()).filter(|w| *w == needle).count()
}
