//! Driver tunables and per-device sentinel profiles.

use std::{sync::LazyLock, time::Duration};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

static DEFAULT_BOOT_BANNER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"boot: Multicore bootloader").unwrap());

/// Timing and sizing knobs for a console session.
///
/// The defaults match the behavior embedded-device consoles have proven to
/// need in practice; most harnesses only ever override the buffer limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Line speed. The console framing is fixed; only the speed varies.
    pub baud: u32,
    /// Bound on a single blocking read in the reader loop. Keeps shutdown
    /// responsive.
    pub read_timeout: Duration,
    /// Largest chunk drained from the transport per read.
    pub read_chunk: usize,
    /// Raw capture bound in bytes; oldest bytes are evicted beyond it.
    pub buffer_limit: usize,
    /// Sleep between wait-engine polls.
    pub poll_interval: Duration,
    /// How long `send_command` waits for the command's echo.
    pub echo_timeout: Duration,
    /// Width of the reset pulse on the reset strap.
    pub reset_pulse: Duration,
    /// Silence that ends a one-shot capture.
    pub idle_threshold: Duration,
    /// Upper bound on a one-shot capture.
    pub capture_timeout: Duration,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            baud: 115_200,
            read_timeout: Duration::from_millis(50),
            read_chunk: 4096,
            buffer_limit: 1_000_000,
            poll_interval: Duration::from_millis(50),
            echo_timeout: Duration::from_secs(2),
            reset_pulse: Duration::from_millis(100),
            idle_threshold: Duration::from_millis(400),
            capture_timeout: Duration::from_secs(6),
        }
    }
}

/// Device-specific sentinel phrases.
///
/// The driver itself is device-agnostic; what distinguishes one project's
/// console from another's is the boot banner it prints, the phrases that mark
/// startup milestones, and its prompt. Patterns are compiled once here, never
/// per query.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    boot_banner: Regex,
    ready_phrases: Vec<String>,
    prompt: String,
}

impl DeviceProfile {
    /// Builds a profile from a boot banner pattern, startup milestone
    /// phrases (asserted in order), and the console prompt.
    pub fn new(boot_banner: &str, ready_phrases: &[&str], prompt: &str) -> Result<Self> {
        Ok(DeviceProfile {
            boot_banner: Regex::new(boot_banner)?,
            ready_phrases: ready_phrases.iter().map(|s| s.to_string()).collect(),
            prompt: prompt.to_string(),
        })
    }

    /// Pattern matching the first line the bootloader prints.
    pub fn boot_banner(&self) -> &Regex {
        &self.boot_banner
    }

    /// Literal phrases marking startup milestones, in emission order.
    pub fn ready_phrases(&self) -> &[String] {
        &self.ready_phrases
    }

    /// The console prompt.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        DeviceProfile {
            boot_banner: DEFAULT_BOOT_BANNER.clone(),
            ready_phrases: vec![
                "Console initialized".to_string(),
                "Startup sequence complete".to_string(),
            ],
            prompt: "esp32> ".to_string(),
        }
    }
}
