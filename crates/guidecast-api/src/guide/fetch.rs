//! Windowed guide download.

use anyhow::{Context, Result};
use tracing::instrument;

use super::api::GuideApi;
use super::params::FetchPlan;
use super::types::Guide;

/// Downloads the base window and then follow-up windows until the plan's
/// horizon is covered, merging each into the base.
///
/// The cursor for the next window is the latest programme end seen so far.
/// Stops early on an empty window, a cursor that does not advance, or once
/// `plan.max_windows` follow-ups have been fetched. `now` is unix seconds.
///
/// # Errors
///
/// Returns an error if any window request fails after retries.
#[instrument(skip_all, fields(days = plan.days))]
pub async fn fetch_guide(api: &(impl GuideApi + Sync), plan: &FetchPlan, now: i64) -> Result<Guide> {
    let horizon = plan.horizon(now);

    let mut guide = api
        .guide_window(None)
        .await
        .context("base guide window failed")?;
    let removed = guide.dedup_programs();
    tracing::info!(
        channels = guide.channels.len(),
        programs = guide.program_count(),
        duplicates = removed,
        "Base guide window received"
    );

    let Some(mut cursor) = guide.max_end_time() else {
        tracing::warn!("Base guide window is empty");
        return Ok(guide);
    };

    let mut windows: u32 = 0;
    while cursor < horizon {
        if windows >= plan.max_windows {
            tracing::warn!(
                windows,
                cursor,
                horizon,
                "Window limit reached before horizon"
            );
            break;
        }
        windows = windows.saturating_add(1);

        let window = api
            .guide_window(Some(cursor))
            .await
            .with_context(|| format!("guide window {windows} (start={cursor}) failed"))?;

        let Some(next) = window.max_end_time() else {
            tracing::info!(window = windows, cursor, "Empty guide window, stopping");
            break;
        };

        let stats = guide.merge_window(window);
        tracing::info!(
            window = windows,
            added = stats.added,
            duplicates = stats.duplicates,
            unmatched_channels = stats.unmatched_channels,
            "Guide window merged"
        );

        if next <= cursor {
            tracing::warn!(
                cursor,
                next,
                "cursor did not advance, stopping window fetch"
            );
            break;
        }
        cursor = next;
    }

    tracing::info!(
        channels = guide.channels.len(),
        programs = guide.program_count(),
        windows,
        "Guide fetch completed"
    );
    Ok(guide)
}
