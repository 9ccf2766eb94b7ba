//! Pattern extractors over normalized (ANSI-free) terminal text.
//!
//! Every function here is total: "not found" is `None` or a zero value, never
//! an error. Label matching is case-insensitive and windowed: once a line
//! containing the label is found, only the next few lines are searched.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use rust_decimal::Decimal;

/// Lines searched for a percentage, counting the label line.
pub const PERCENT_WINDOW: usize = 12;

/// Lines searched for a reset description, counting the label line.
pub const RESET_WINDOW: usize = 14;

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([0-9]{1,3})\s*%\s*(used|left)").expect("percent regex"));

static DURATION_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*([a-z]+)").expect("duration regex"));

static SHORT_DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b\d+\s*[hm]\b").expect("short duration regex"));

static LINES_ADDED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*lines?\s+added").expect("lines added regex"));

static LINES_REMOVED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*lines?\s+removed").expect("lines removed regex"));

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^\s@]+@[^\s@]+)").expect("email regex"));

static TRUST_FOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Do you trust the files in this folder\?[ \t]*(?:\r?\n)+\s*([^\r\n]+)")
        .expect("trust folder regex")
});

// =============================================================================
// Percentages
// =============================================================================

/// Percent remaining expressed on a single line.
///
/// "35% left" yields 35, "25% used" yields 75.
#[must_use]
pub fn percent_from_line(line: &str) -> Option<u32> {
    let caps = PERCENT_RE.captures(line)?;
    let value: u32 = caps.get(1)?.as_str().parse().ok()?;
    let used = caps.get(2)?.as_str().eq_ignore_ascii_case("used");
    Some(if used { 100u32.saturating_sub(value) } else { value })
}

/// Percent remaining for the quota whose label contains `label`.
///
/// Searches each label occurrence in turn; the first percentage within
/// [`PERCENT_WINDOW`] lines wins.
#[must_use]
pub fn extract_percent(label: &str, text: &str) -> Option<u32> {
    let lines: Vec<&str> = text.lines().collect();
    label_positions(&lines, label).find_map(|idx| {
        lines[idx..]
            .iter()
            .take(PERCENT_WINDOW)
            .find_map(|line| percent_from_line(line))
    })
}

/// Tries historical label phrasings in priority order.
#[must_use]
pub fn extract_percent_any(labels: &[&str], text: &str) -> Option<u32> {
    labels.iter().find_map(|label| extract_percent(label, text))
}

// =============================================================================
// Reset Descriptions
// =============================================================================

/// Reset description following the label, trimmed.
///
/// A line mentioning "reset" wins from the label line onward; a bare duration
/// token ("2h", "30m") counts only on later lines, so labels such as
/// "5h limit" do not match themselves.
#[must_use]
pub fn extract_reset(label: &str, text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    label_positions(&lines, label).find_map(|idx| {
        lines[idx..]
            .iter()
            .take(RESET_WINDOW)
            .enumerate()
            .find_map(|(offset, line)| reset_from_line(line, offset > 0))
    })
}

fn reset_from_line(line: &str, allow_bare_duration: bool) -> Option<String> {
    let lower = line.to_lowercase();
    if let Some(pos) = lower.find("reset") {
        // Lowercasing ASCII keeps byte offsets; fall back to the whole line otherwise.
        let tail = if lower.len() == line.len() { &line[pos..] } else { line };
        return non_empty(trim_unbalanced_paren(tail.trim()));
    }
    if allow_bare_duration && SHORT_DURATION_RE.is_match(line) {
        return non_empty(line.trim());
    }
    None
}

fn trim_unbalanced_paren(s: &str) -> &str {
    let opens = s.matches('(').count();
    let closes = s.matches(')').count();
    if closes > opens {
        s.strip_suffix(')').map_or(s, str::trim_end)
    } else {
        s
    }
}

/// Normalizes a reset description to start with "Resets".
#[must_use]
pub fn clean_reset_text(text: Option<&str>) -> Option<String> {
    let trimmed = text?.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.to_lowercase().starts_with("reset") {
        Some(trimmed.to_string())
    } else {
        Some(format!("Resets {trimmed}"))
    }
}

// =============================================================================
// Durations
// =============================================================================

fn unit_seconds(unit: &str, allow_days: bool) -> Option<f64> {
    match unit.to_lowercase().as_str() {
        "d" | "day" | "days" if allow_days => Some(86_400.0),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(3_600.0),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(60.0),
        "s" | "sec" | "secs" | "second" | "seconds" => Some(1.0),
        _ => None,
    }
}

/// Sum of recognized tokens and how many were recognized.
fn sum_duration_tokens(text: &str, allow_days: bool) -> (f64, usize) {
    DURATION_TOKEN_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let value: f64 = caps.get(1)?.as_str().parse().ok()?;
            let unit = unit_seconds(caps.get(2)?.as_str(), allow_days)?;
            Some(value * unit)
        })
        .fold((0.0, 0), |(total, count), secs| (total + secs, count + 1))
}

/// Seconds in a free-form "2h 15m 30.5s" string.
///
/// Token order is irrelevant, `ms` is ignored, unknown tokens add nothing.
#[must_use]
pub fn parse_duration_string(text: &str) -> f64 {
    sum_duration_tokens(text, false).0
}

/// `now` plus the "2d 3h 15m" offset found in `text`.
///
/// `None` for absent or empty input, or when no token is recognized.
#[must_use]
pub fn parse_relative_offset_from(text: Option<&str>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = text.filter(|t| !t.trim().is_empty())?;
    let (seconds, recognized) = sum_duration_tokens(text, true);
    if recognized == 0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let millis = (seconds * 1000.0).round() as i64;
    now.checked_add_signed(Duration::milliseconds(millis))
}

/// [`parse_relative_offset_from`] anchored at the current time.
#[must_use]
pub fn parse_relative_offset(text: Option<&str>) -> Option<DateTime<Utc>> {
    parse_relative_offset_from(text, Utc::now())
}

// =============================================================================
// Cost Figures
// =============================================================================

/// Regex fragment matching `label` with flexible inner whitespace.
fn label_pattern(label: &str) -> String {
    label
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+")
}

/// Currency amount after `label`, e.g. "Total cost: $1,234.56".
#[must_use]
pub fn extract_currency(label: &str, text: &str) -> Option<Decimal> {
    let pattern = format!(r"(?i){}\s*:?\s*\$?\s*([\d,]+(?:\.\d+)?)", label_pattern(label));
    let re = Regex::new(&pattern).ok()?;
    let raw = re.captures(text)?.get(1)?.as_str().replace(',', "");
    Decimal::from_str(&raw).ok()
}

/// Free text after `label:`, e.g. the value of "Total duration (API): 6m 19.7s".
#[must_use]
pub fn extract_labeled_text(label: &str, text: &str) -> Option<String> {
    let pattern = format!(r"(?i){}\s*:\s*([^\r\n]+)", label_pattern(label));
    let re = Regex::new(&pattern).ok()?;
    non_empty(re.captures(text)?.get(1)?.as_str().trim())
}

/// Lines added and removed, taken from the first line that mentions either.
#[must_use]
pub fn extract_line_delta(text: &str) -> (u32, u32) {
    let capture = |re: &Regex, line: &str| {
        re.captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    text.lines()
        .find(|line| LINES_ADDED_RE.is_match(line) || LINES_REMOVED_RE.is_match(line))
        .map_or((0, 0), |line| {
            (capture(&LINES_ADDED_RE, line), capture(&LINES_REMOVED_RE, line))
        })
}

// =============================================================================
// Account Fields
// =============================================================================

/// Value of the first `label: value` pair found, trying labels in order.
#[must_use]
pub fn extract_key_value(labels: &[&str], text: &str) -> Option<String> {
    labels.iter().find_map(|label| {
        let pattern = format!(r"(?i)\b{}\s*:\s*([^\r\n]+)", label_pattern(label));
        let re = Regex::new(&pattern).ok()?;
        non_empty(re.captures(text)?.get(1)?.as_str().trim())
    })
}

/// Account email from an "Account:" or "Email:" line.
#[must_use]
pub fn extract_email(text: &str) -> Option<String> {
    let value = extract_key_value(&["Account", "Email"], text)?;
    Some(EMAIL_RE.captures(&value)?.get(1)?.as_str().to_string())
}

#[must_use]
pub fn extract_organization(text: &str) -> Option<String> {
    extract_key_value(&["Organization", "Org"], text)
}

#[must_use]
pub fn extract_login_method(text: &str) -> Option<String> {
    extract_key_value(&["Login method"], text)
}

/// Folder named on the line after a trust prompt.
#[must_use]
pub fn extract_trust_folder(text: &str) -> Option<String> {
    non_empty(TRUST_FOLDER_RE.captures(text)?.get(1)?.as_str().trim())
}

// =============================================================================
// Helpers
// =============================================================================

fn label_positions<'a>(lines: &'a [&str], label: &str) -> impl Iterator<Item = usize> + 'a {
    let needle = label.to_lowercase();
    lines
        .iter()
        .enumerate()
        .filter(move |(_, line)| line.to_lowercase().contains(&needle))
        .map(|(idx, _)| idx)
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const USAGE: &str = "\
Claude Code v1.0.27

Current session
████████████████░░░░ 65% left
Resets in 2h 15m

Current week (all models)
██████████░░░░░░░░░░ 35% left
Resets Jan 15, 3:30pm (America/Los_Angeles)

Current week (Opus)
████████████████████ 80% left
Resets Jan 15, 3:30pm (America/Los_Angeles)

Account: user@example.com
Organization: Acme Corp
Login method: Claude Max
";

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).expect("decimal")
    }

    #[test]
    fn percent_left_and_used() {
        assert_eq!(percent_from_line("██ 35% left"), Some(35));
        assert_eq!(percent_from_line("██ 25% used"), Some(75));
        assert_eq!(percent_from_line("25 % USED"), Some(75));
        assert_eq!(percent_from_line("no numbers"), None);
        assert_eq!(percent_from_line("150% used"), Some(0));
    }

    #[test]
    fn percent_used_and_left_sum_to_hundred() {
        for n in [0u32, 1, 19, 50, 99, 100] {
            let used = extract_percent("Quota", &format!("Quota\n{n}% used")).expect("used");
            let left = extract_percent("Quota", &format!("Quota\n{n}% left")).expect("left");
            assert_eq!(used + left, 100, "n = {n}");
        }
    }

    #[test]
    fn percent_by_label() {
        assert_eq!(extract_percent("Current session", USAGE), Some(65));
        assert_eq!(extract_percent("current week (all models)", USAGE), Some(35));
        assert_eq!(extract_percent("Current week (Sonnet)", USAGE), None);
    }

    #[test]
    fn percent_respects_window() {
        let mut text = String::from("Current session\n");
        for _ in 0..PERCENT_WINDOW {
            text.push_str("filler\n");
        }
        text.push_str("10% left\n");
        assert_eq!(extract_percent("Current session", &text), None);
    }

    #[test]
    fn percent_tries_labels_in_order() {
        let labels = ["Current week (Sonnet only)", "Current week (Opus)"];
        assert_eq!(extract_percent_any(&labels, USAGE), Some(80));
        assert_eq!(extract_percent_any(&["nope", "also nope"], USAGE), None);
    }

    #[test]
    fn reset_by_label() {
        assert_eq!(
            extract_reset("Current session", USAGE).as_deref(),
            Some("Resets in 2h 15m")
        );
        assert_eq!(
            extract_reset("Current week", USAGE).as_deref(),
            Some("Resets Jan 15, 3:30pm (America/Los_Angeles)")
        );
    }

    #[test]
    fn reset_on_label_line_is_trimmed() {
        let text = "5h limit: [████░░] 72% left (resets 14:32)\nWeekly limit: 40% left";
        assert_eq!(extract_reset("5h limit", text).as_deref(), Some("resets 14:32"));
    }

    #[test]
    fn reset_bare_duration_on_following_line() {
        let text = "Current session\n55% left\nin 3h 10m";
        assert_eq!(extract_reset("Current session", text).as_deref(), Some("in 3h 10m"));
        assert_eq!(extract_reset("Missing", text), None);
    }

    #[test]
    fn clean_reset_text_adds_prefix() {
        assert_eq!(clean_reset_text(Some(" in 2h ")).as_deref(), Some("Resets in 2h"));
        assert_eq!(clean_reset_text(Some("Resets 3pm")).as_deref(), Some("Resets 3pm"));
        assert_eq!(clean_reset_text(Some("  ")), None);
        assert_eq!(clean_reset_text(None), None);
    }

    #[test]
    fn duration_strings() {
        assert!((parse_duration_string("6m 19.7s") - 379.7).abs() < 1e-9);
        assert!((parse_duration_string("2h 15m 30.5s") - 8130.5).abs() < 1e-9);
        assert!((parse_duration_string("15m 2h") - parse_duration_string("2h 15m")).abs() < 1e-9);
        assert!((parse_duration_string("250ms") - 0.0).abs() < f64::EPSILON);
        assert!((parse_duration_string("nothing") - 0.0).abs() < f64::EPSILON);
        assert!((parse_duration_string("2d") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn relative_offset() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).single().expect("time");
        let parsed = parse_relative_offset_from(Some("Resets in 2d 3h 15m"), now).expect("offset");
        assert_eq!(parsed - now, Duration::days(2) + Duration::hours(3) + Duration::minutes(15));
        assert_eq!(parse_relative_offset_from(Some("Resets Jan 15, 3:30pm"), now), None);
        assert_eq!(parse_relative_offset_from(Some(""), now), None);
        assert_eq!(parse_relative_offset_from(None, now), None);
    }

    #[test]
    fn currency_amounts() {
        let text = "Total cost:            $1,234.56\nTotal duration (API): 6m 19.7s";
        assert_eq!(extract_currency("Total cost", text), Some(dec("1234.56")));
        assert_eq!(extract_currency("total  cost", "TOTAL COST: 0.55"), Some(dec("0.55")));
        assert_eq!(extract_currency("Total cost", "Total spend: $3"), None);
    }

    #[test]
    fn labeled_text() {
        let text = "Total duration (API):  6m 19.7s\nTotal duration (wall): 6h 33m 10.2s";
        assert_eq!(
            extract_labeled_text("Total duration (API)", text).as_deref(),
            Some("6m 19.7s")
        );
        assert_eq!(
            extract_labeled_text("Total duration (wall)", text).as_deref(),
            Some("6h 33m 10.2s")
        );
    }

    #[test]
    fn line_deltas() {
        assert_eq!(
            extract_line_delta("Total code changes: 120 lines added, 45 lines removed"),
            (120, 45)
        );
        assert_eq!(extract_line_delta("3 lines removed, 1 line added"), (1, 3));
        assert_eq!(extract_line_delta("Total cost: $0.00"), (0, 0));
    }

    #[test]
    fn account_fields() {
        assert_eq!(extract_email(USAGE).as_deref(), Some("user@example.com"));
        assert_eq!(extract_organization(USAGE).as_deref(), Some("Acme Corp"));
        assert_eq!(extract_login_method(USAGE).as_deref(), Some("Claude Max"));
        assert_eq!(
            extract_key_value(&["Email", "Account"], "Email: a@b.io").as_deref(),
            Some("a@b.io")
        );
        assert_eq!(extract_email("Account: not-an-email"), None);
        assert_eq!(extract_organization("nothing here"), None);
    }

    #[test]
    fn trust_folder() {
        let text = "Do you trust the files in this folder?\n\n  /Users/me/Probe\n\n> 1. Yes";
        assert_eq!(extract_trust_folder(text).as_deref(), Some("/Users/me/Probe"));
        assert_eq!(extract_trust_folder("Current session"), None);
    }
}
