//! Free-form placeholder block duration tokens (`"30min"`, `"2hr"`, `"true"`).

use std::sync::LazyLock;

use chrono::TimeDelta;
use regex::Regex;

/// Shortest placeholder block, in minutes.
pub const MIN_BLOCK_MINUTES: i64 = 30;

/// Longest placeholder block, in minutes.
pub const MAX_BLOCK_MINUTES: i64 = 12 * 60;

/// Block length for flag-like tokens (`"true"`, `"1"`, `"7"`).
pub const DEFAULT_BLOCK_MINUTES: i64 = 60;

/// Number followed by an optional unit.
#[allow(clippy::expect_used)]
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d*)?|\.\d+)\s*([a-z]*)$").expect("failed to compile duration regex")
});

/// Tokens that switch placeholders off.
const DISABLED_TOKENS: [&str; 4] = ["", "false", "no", "off"];

/// Tokens that switch placeholders on with the default block length.
const ENABLED_TOKENS: [&str; 3] = ["true", "yes", "on"];

/// Minutes per unit, or `None` for an unknown unit.
fn unit_minutes(unit: &str) -> Option<f64> {
    match unit {
        "" | "h" | "hr" | "hrs" | "hour" | "hours" => Some(60.0),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(1.0),
        _ => None,
    }
}

/// Parses a placeholder duration token into a block length.
///
/// Returns `None` when the token disables placeholders (`"false"`, `"off"`,
/// empty). All-digit tokens and boolean-style words enable placeholders with
/// one-hour blocks. Anything else unrecognised also falls back to one hour.
/// The result is clamped to `[30min, 12h]`.
///
/// ```
/// use guidecast_xmltv::duration::parse_block_duration;
///
/// assert_eq!(parse_block_duration("30min").unwrap().num_minutes(), 30);
/// assert_eq!(parse_block_duration("2hr").unwrap().num_minutes(), 120);
/// assert_eq!(parse_block_duration("0.2").unwrap().num_minutes(), 30);
/// assert!(parse_block_duration("false").is_none());
/// ```
#[must_use]
pub fn parse_block_duration(token: &str) -> Option<TimeDelta> {
    let token = token.trim().to_ascii_lowercase();
    if DISABLED_TOKENS.contains(&token.as_str()) {
        return None;
    }
    if ENABLED_TOKENS.contains(&token.as_str()) || token.bytes().all(|b| b.is_ascii_digit()) {
        return TimeDelta::try_minutes(DEFAULT_BLOCK_MINUTES);
    }

    let minutes = DURATION_RE
        .captures(&token)
        .and_then(|caps| {
            let value: f64 = caps.get(1)?.as_str().parse().ok()?;
            let per_unit = unit_minutes(caps.get(2)?.as_str())?;
            Some(value * per_unit)
        })
        .map_or(DEFAULT_BLOCK_MINUTES, round_minutes);

    TimeDelta::try_minutes(minutes.clamp(MIN_BLOCK_MINUTES, MAX_BLOCK_MINUTES))
}

/// Rounds fractional minutes, saturating far outside the clamp range.
#[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
fn round_minutes(minutes: f64) -> i64 {
    if minutes.is_finite() {
        minutes.round().clamp(0.0, 1e9) as i64
    } else {
        MAX_BLOCK_MINUTES
    }
}
