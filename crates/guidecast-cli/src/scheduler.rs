//! Cron-driven update trigger.

use std::future::Future;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use cron::Schedule;

/// Parses a cron expression with a leading seconds field,
/// e.g. `0 0 */6 * * *`.
///
/// # Errors
///
/// Returns an error if the expression is invalid.
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression)
        .with_context(|| format!("invalid cron expression: {expression}"))
}

/// Next run strictly after now, in local time.
#[must_use]
pub fn next_run(schedule: &Schedule) -> Option<DateTime<Local>> {
    schedule.upcoming(Local).next()
}

/// Sleeps until each scheduled time and calls `trigger`. Returns when the
/// schedule has no further runs.
pub async fn run_schedule<F, Fut>(schedule: Schedule, mut trigger: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    while let Some(next) = next_run(&schedule) {
        let wait = next.signed_duration_since(Local::now()).to_std().unwrap_or_default();
        tracing::info!(next = %next.to_rfc3339(), "Next guide update scheduled");
        tokio::time::sleep(wait).await;
        trigger().await;
    }
    tracing::warn!("Update schedule has no further runs");
}
