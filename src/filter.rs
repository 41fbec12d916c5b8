//! Terminal output filtering.
//!
//! Device consoles decorate their output with ANSI escape sequences and, while
//! line editing, probe the terminal with a cursor position query. Both have to
//! be handled before captured output is usable in assertions: escapes are
//! stripped, and the probe is answered with a canned reply so the device-side
//! line editor does not stall waiting for a terminal that isn't there.

use std::sync::LazyLock;

use regex::Regex;

/// Cursor Position Report query emitted by the device's line editor.
pub const CPR_QUERY: &[u8] = b"\x1b[6n";

/// Canned CPR reply, claiming the cursor sits at row 1, column 1.
pub const CPR_REPLY: &[u8] = b"\x1b[1;1R";

// OSC: `ESC ]` ... terminated by BEL or `ESC \`. CSI: `ESC [` parameter and
// intermediate bytes, then one final byte. A sequence split across two read
// chunks is not guaranteed to be stripped.
static ANSI_OSC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1B\].*?(?:\x07|\x1B\\)").unwrap());
static ANSI_CSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").unwrap());

/// Strips OSC and CSI escape sequences from `text`.
pub fn strip_ansi(text: &str) -> String {
    let text = ANSI_OSC_RE.replace_all(text, "");
    ANSI_CSI_RE.replace_all(&text, "").into_owned()
}

/// Lossily decodes a raw chunk and strips ANSI escape sequences.
///
/// Invalid byte sequences become replacement characters; link noise is
/// expected and never fatal.
pub fn clean_chunk(raw: &[u8]) -> String {
    strip_ansi(&String::from_utf8_lossy(raw))
}

/// Removes every CPR query from `chunk`.
///
/// Returns `None` when the chunk holds no query, so the common path avoids a
/// copy. The caller is responsible for writing [`CPR_REPLY`] back.
pub fn scrub_cpr_queries(chunk: &[u8]) -> Option<Vec<u8>> {
    if !contains_cpr_query(chunk) {
        return None;
    }
    let mut out = Vec::with_capacity(chunk.len());
    let mut i = 0;
    while i < chunk.len() {
        if chunk[i..].starts_with(CPR_QUERY) {
            i += CPR_QUERY.len();
        } else {
            out.push(chunk[i]);
            i += 1;
        }
    }
    Some(out)
}

fn contains_cpr_query(chunk: &[u8]) -> bool {
    chunk.windows(CPR_QUERY.len()).any(|w| w == CPR_QUERY)
}
