//! Bounded raw capture buffer and its ANSI-stripped text companion.
//!
//! The background reader is the sole writer; every other component reads
//! through the lock held by [`Console`](crate::Console). Raw bytes are bounded
//! by a configurable limit with oldest-first eviction; the clean text grows
//! without bound and is the haystack for all text searches.

/// Snapshot of the buffer's logical lengths, taken under the buffer lock.
///
/// A mark captures both the raw and the clean logical position in one lock
/// acquisition, so queries scoped to it only ever see output that arrived
/// after the mark was taken, in whichever stream they search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mark {
    pub(crate) raw: u64,
    pub(crate) clean: usize,
}

/// Raw and clean capture buffers, updated together under one lock.
#[derive(Debug)]
pub struct ConsoleBuffer {
    raw: Vec<u8>,
    base_offset: u64,
    limit: usize,
    clean: String,
}

impl ConsoleBuffer {
    /// Creates an empty buffer bounding raw capture to `limit` bytes.
    pub fn new(limit: usize) -> Self {
        ConsoleBuffer {
            raw: Vec::new(),
            base_offset: 0,
            limit,
            clean: String::new(),
        }
    }

    /// Appends one received chunk in both raw and clean form.
    ///
    /// Once the raw buffer exceeds its limit the oldest bytes are dropped and
    /// `base_offset` advances by exactly the dropped count. The clean text is
    /// unbounded; its length moves independently of the raw length since
    /// escape stripping changes sizes.
    pub fn append(&mut self, raw: &[u8], clean: &str) {
        self.raw.extend_from_slice(raw);
        if self.raw.len() > self.limit {
            let dropped = self.raw.len() - self.limit;
            self.raw.drain(..dropped);
            self.base_offset += dropped as u64;
        }
        self.clean.push_str(clean);
    }

    /// Takes a mark at the current logical end of both streams.
    pub fn mark(&self) -> Mark {
        Mark {
            raw: self.total_raw(),
            clean: self.clean.len(),
        }
    }

    /// Total raw bytes ever appended, including evicted ones.
    pub fn total_raw(&self) -> u64 {
        self.base_offset + self.raw.len() as u64
    }

    /// Logical position of the first byte still held in the raw buffer.
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Number of raw bytes currently held.
    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }

    /// Clean text captured at or after `mark`.
    pub fn clean_from(&self, mark: Mark) -> &str {
        self.clean.get(mark.clean..).unwrap_or("")
    }

    /// The complete clean text.
    pub fn clean_text(&self) -> &str {
        &self.clean
    }

    /// Raw bytes captured at or after `mark`.
    ///
    /// A mark whose offset has fallen behind `base_offset` through eviction
    /// clamps to the current buffer start; it never indexes out of range.
    pub fn raw_from(&self, mark: Mark) -> &[u8] {
        let start = mark.raw.saturating_sub(self.base_offset) as usize;
        &self.raw[start.min(self.raw.len())..]
    }

    /// Last `n` lines of clean text, for failure diagnostics.
    pub fn tail_lines(&self, n: usize) -> String {
        let lines: Vec<&str> = self.clean.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}
