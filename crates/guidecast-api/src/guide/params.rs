//! Parameters for a windowed guide fetch.

/// Default number of days to cover.
pub const DEFAULT_DAYS: u32 = 14;

/// Default ceiling on follow-up windows.
pub const DEFAULT_MAX_WINDOWS: u32 = 32;

const SECS_PER_DAY: i64 = 86_400;

/// How far ahead to fetch and how many follow-up windows to allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlan {
    /// Days to cover starting now.
    pub days: u32,
    /// Follow-up windows after the base window.
    pub max_windows: u32,
}

impl Default for FetchPlan {
    fn default() -> Self {
        Self {
            days: DEFAULT_DAYS,
            max_windows: DEFAULT_MAX_WINDOWS,
        }
    }
}

impl FetchPlan {
    /// Creates a plan.
    #[must_use]
    pub const fn new(days: u32, max_windows: u32) -> Self {
        Self { days, max_windows }
    }

    /// Unix second at which the horizon is reached, counted from `now`.
    #[must_use]
    pub fn horizon(&self, now: i64) -> i64 {
        now.saturating_add(SECS_PER_DAY.saturating_mul(i64::from(self.days)))
    }
}
