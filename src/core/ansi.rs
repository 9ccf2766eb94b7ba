//! Terminal control sequence removal.

use std::sync::LazyLock;

use regex::Regex;

/// ESC followed by a single Fe byte, or a full CSI sequence.
static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("ansi regex"));

/// Remove ANSI escape sequences, leaving every other byte untouched.
///
/// Idempotent: `strip(&strip(s)) == strip(s)`.
#[must_use]
pub fn strip(raw: &str) -> String {
    let mut out = ANSI_RE.replace_all(raw, "").into_owned();
    // Removing one sequence can splice a new one together ("\x1B\x1B[0mA").
    while ANSI_RE.is_match(&out) {
        out = ANSI_RE.replace_all(&out, "").into_owned();
    }
    out
}
