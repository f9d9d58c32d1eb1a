//! XMLTV timestamps (`YYYYMMDDHHmmss ±HHMM`) and the guide clock.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};

/// Number of characters in the wall-clock part of a timestamp.
const WALL_CLOCK_LEN: usize = 14;

/// `chrono` format of the wall-clock part.
const WALL_CLOCK_FORMAT: &str = "%Y%m%d%H%M%S";

/// Full timestamp format including the numeric offset.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S %z";

/// Parses a fixed-width decimal field of `raw`.
fn field<T: std::str::FromStr>(raw: &str, from: usize, to: usize) -> Option<T> {
    let digits = raw.get(from..to)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Decomposes the leading `YYYYMMDDHHmmss` of an XMLTV timestamp into a
/// calendar date-time.
///
/// The offset suffix is ignored: every timestamp compared by the transforms
/// comes from the same source and carries the same offset, so field-wise
/// comparison is sufficient. Returns `None` when the value is too short or
/// does not name a real calendar instant.
#[must_use]
pub fn parse_wall_clock(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim_start();
    if raw.len() < WALL_CLOCK_LEN {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(field(raw, 0, 4)?, field(raw, 4, 6)?, field(raw, 6, 8)?)?;
    let time = NaiveTime::from_hms_opt(field(raw, 8, 10)?, field(raw, 10, 12)?, field(raw, 12, 14)?)?;
    Some(date.and_time(time))
}

/// Parses a numeric `±HHMM` offset such as `+0100` or `-0500`.
#[must_use]
pub fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    let (sign, digits) = match raw.as_bytes().first()? {
        b'+' => (1_i32, raw.get(1..)?),
        b'-' => (-1_i32, raw.get(1..)?),
        _ => return None,
    };
    if digits.len() != 4 {
        return None;
    }
    let hours: i32 = field(digits, 0, 2)?;
    let minutes: i32 = field(digits, 2, 4)?;
    let seconds = hours.checked_mul(3600)?.checked_add(minutes.checked_mul(60)?)?;
    FixedOffset::east_opt(sign.checked_mul(seconds)?)
}

/// Formats an offset the way XMLTV expects (`+HHMM`).
#[must_use]
pub fn format_offset(offset: FixedOffset) -> String {
    let seconds = offset.local_minus_utc();
    let sign = if seconds < 0 { '-' } else { '+' };
    let minutes = seconds.unsigned_abs() / 60;
    format!("{sign}{:02}{:02}", minutes / 60, minutes % 60)
}

/// Reference point for date-relative transforms: the local calendar date
/// treated as day 0, and the offset written on synthesized timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuideClock {
    today: NaiveDate,
    offset: FixedOffset,
}

impl GuideClock {
    /// Creates a clock pinned to `today` in `offset`.
    #[must_use]
    pub const fn new(today: NaiveDate, offset: FixedOffset) -> Self {
        Self { today, offset }
    }

    /// Clock for the current date in the host's local time zone.
    #[must_use]
    pub fn now_local() -> Self {
        let now = Local::now();
        Self::new(now.date_naive(), *now.offset())
    }

    /// Clock for the current date as observed in `offset`.
    #[must_use]
    pub fn now_in(offset: FixedOffset) -> Self {
        let now = Utc::now().with_timezone(&offset);
        Self::new(now.date_naive(), offset)
    }

    /// Day 0.
    #[must_use]
    pub const fn today(&self) -> NaiveDate {
        self.today
    }

    /// Offset applied to synthesized timestamps.
    #[must_use]
    pub const fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Local midnight at the start of day 0.
    #[must_use]
    pub fn midnight(&self) -> NaiveDateTime {
        self.today.and_time(NaiveTime::MIN)
    }

    /// Local midnight at the start of day `days`.
    #[must_use]
    pub fn day_start(&self, days: u32) -> Option<NaiveDateTime> {
        self.midnight()
            .checked_add_signed(TimeDelta::try_days(i64::from(days))?)
    }

    /// Formats a local wall-clock instant as an XMLTV timestamp.
    #[must_use]
    pub fn format(&self, wall_clock: NaiveDateTime) -> String {
        format!(
            "{} {}",
            wall_clock.format(WALL_CLOCK_FORMAT),
            format_offset(self.offset)
        )
    }

    /// Formats unix seconds as an XMLTV timestamp in this clock's offset.
    #[must_use]
    pub fn format_unix(&self, secs: i64) -> Option<String> {
        let utc = DateTime::from_timestamp(secs, 0)?;
        Some(utc.with_timezone(&self.offset).format(TIMESTAMP_FORMAT).to_string())
    }

    /// Calendar date of unix seconds in this clock's offset.
    #[must_use]
    pub fn date_of_unix(&self, secs: i64) -> Option<NaiveDate> {
        let utc = DateTime::from_timestamp(secs, 0)?;
        Some(utc.with_timezone(&self.offset).date_naive())
    }
}
