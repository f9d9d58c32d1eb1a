//! One guide update: discover, fetch and merge windows, build, validate,
//! publish.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{FixedOffset, Utc};
use guidecast_api::guide::{FetchPlan, Guide, GuideApi, fetch_guide};
use guidecast_store::GuideStore;
use guidecast_xmltv::{GuideClock, validate_file, write_guide};
use tracing::instrument;

/// Everything an update needs, shared between the scheduler, the
/// refresh endpoint and the `fetch` subcommand.
#[derive(Debug)]
pub struct UpdateCycle<A> {
    api: Arc<A>,
    store: Arc<GuideStore>,
    plan: FetchPlan,
    offset: Option<FixedOffset>,
}

impl<A> UpdateCycle<A>
where
    A: GuideApi + Send + Sync,
{
    /// Creates a cycle. `offset` pins timestamps to a fixed offset; `None`
    /// uses the host's local offset at run time.
    #[must_use]
    pub const fn new(
        api: Arc<A>,
        store: Arc<GuideStore>,
        plan: FetchPlan,
        offset: Option<FixedOffset>,
    ) -> Self {
        Self {
            api,
            store,
            plan,
            offset,
        }
    }

    /// Runs one update and returns the published version's path.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery or any guide window fails, no guide
    /// data was received, or the built document does not validate. The
    /// previously published document stays in place in every case.
    #[instrument(skip_all)]
    pub async fn run(&self) -> Result<PathBuf> {
        let device = self.api.discover().await.context("device discovery failed")?;
        tracing::info!(
            device_id = device.device_id.as_deref().unwrap_or("unknown"),
            "Device discovered"
        );

        let guide = fetch_guide(self.api.as_ref(), &self.plan, Utc::now().timestamp()).await?;
        if guide.is_empty() {
            bail!("no guide data received, keeping the published document");
        }

        let clock = self.clock();
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || publish_guide(&store, &guide, &clock))
            .await
            .context("publish task failed")?
    }

    /// Runs one update, logging the outcome instead of returning it.
    pub async fn run_logged(&self) {
        match self.run().await {
            Ok(path) => tracing::info!(path = %path.display(), "Guide update complete"),
            Err(e) => tracing::error!(error = %format!("{e:#}"), "Guide update failed"),
        }
    }

    fn clock(&self) -> GuideClock {
        self.offset
            .map_or_else(GuideClock::now_local, GuideClock::now_in)
    }
}

/// Builds `guide` into a staged version, validates it and publishes it.
/// A version that fails to build or validate is discarded.
///
/// # Errors
///
/// Returns an error if staging, building, validation or publishing fails.
pub fn publish_guide(store: &GuideStore, guide: &Guide, clock: &GuideClock) -> Result<PathBuf> {
    let mut staged = store.stage()?;

    let checked = write_guide(guide, clock, &mut staged).and_then(|stats| {
        staged.flush()?;
        Ok(stats)
    });
    let checked = checked.and_then(|stats| validate_file(staged.path()).map(|_| stats));

    match checked {
        Ok(stats) => {
            let path = store.commit(staged)?;
            tracing::info!(
                channels = stats.channels,
                programmes = stats.programmes,
                skipped = stats.skipped,
                "Guide document built"
            );
            Ok(path)
        }
        Err(e) => {
            tracing::error!(error = %e, "Guide document rejected, previous version kept");
            store.discard(staged)?;
            Err(anyhow::Error::new(e).context("failed to build guide document"))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::NaiveDate;
    use guidecast_api::guide::{DeviceInfo, GuideChannel, GuideProgram, LineupEntry};

    use super::*;

    fn program(start: i64, title: &str) -> GuideProgram {
        GuideProgram {
            start_time: start,
            end_time: start.saturating_add(1_800),
            title: String::from(title),
            episode_title: None,
            episode_number: None,
            synopsis: None,
            image_url: None,
            original_airdate: None,
            series_id: None,
            filter: vec![],
        }
    }

    fn sample_guide() -> Guide {
        Guide::new(vec![GuideChannel {
            guide_number: String::from("2.1"),
            guide_name: Some(String::from("WXYZ")),
            affiliate: None,
            image_url: None,
            programs: vec![program(1_704_067_200, "News & Weather")],
        }])
    }

    fn clock() -> GuideClock {
        GuideClock::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            FixedOffset::east_opt(0).unwrap(),
        )
    }

    struct MockGuideApi {
        window: Guide,
        discover_ok: bool,
        window_calls: AtomicU32,
    }

    impl GuideApi for MockGuideApi {
        async fn discover(&self) -> Result<DeviceInfo> {
            if !self.discover_ok {
                bail!("device unreachable");
            }
            Ok(DeviceInfo {
                device_id: Some(String::from("1234ABCD")),
                device_auth: String::from("tok"),
                friendly_name: None,
                base_url: None,
                tuner_count: None,
            })
        }

        async fn lineup(&self) -> Result<Vec<LineupEntry>> {
            Ok(vec![])
        }

        async fn guide_window(&self, start: Option<i64>) -> Result<Guide> {
            self.window_calls.fetch_add(1, Ordering::SeqCst);
            // Follow-up windows carry nothing new.
            Ok(if start.is_none() {
                self.window.clone()
            } else {
                Guide::default()
            })
        }
    }

    fn cycle(api: MockGuideApi, store: GuideStore) -> UpdateCycle<MockGuideApi> {
        UpdateCycle::new(
            Arc::new(api),
            Arc::new(store),
            FetchPlan::new(1, 4),
            FixedOffset::east_opt(0),
        )
    }

    #[test]
    fn test_publish_guide_commits_valid_document() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = GuideStore::open(dir.path(), 3).unwrap();

        // Act
        let path = publish_guide(&store, &sample_guide(), &clock()).unwrap();

        // Assert
        let current = store.current().unwrap();
        let published = std::fs::read_to_string(&current).unwrap();
        assert_eq!(std::fs::canonicalize(current).unwrap(), std::fs::canonicalize(path).unwrap());
        assert!(published.contains("<title>News &amp; Weather</title>"));
        assert!(published.trim_end().ends_with("</tv>"));
    }

    #[tokio::test]
    async fn test_run_publishes_fetched_guide() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = GuideStore::open(dir.path(), 3).unwrap();
        let api = MockGuideApi {
            window: sample_guide(),
            discover_ok: true,
            window_calls: AtomicU32::new(0),
        };
        let cycle = cycle(api, store);

        // Act
        let path = cycle.run().await.unwrap();

        // Assert
        assert!(path.exists());
        assert_eq!(cycle.api.window_calls.load(Ordering::SeqCst), 2);
        assert!(cycle.store.current().is_some());
    }

    #[tokio::test]
    async fn test_run_discovery_failure_publishes_nothing() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = GuideStore::open(dir.path(), 3).unwrap();
        let api = MockGuideApi {
            window: sample_guide(),
            discover_ok: false,
            window_calls: AtomicU32::new(0),
        };
        let cycle = cycle(api, store);

        // Act
        let err = cycle.run().await.unwrap_err();

        // Assert
        assert!(err.to_string().contains("device discovery failed"));
        assert_eq!(cycle.api.window_calls.load(Ordering::SeqCst), 0);
        assert!(cycle.store.current().is_none());
    }

    #[tokio::test]
    async fn test_run_empty_guide_keeps_previous_document() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = GuideStore::open(dir.path(), 3).unwrap();
        let previous = publish_guide(&store, &sample_guide(), &clock()).unwrap();
        let api = MockGuideApi {
            window: Guide::default(),
            discover_ok: true,
            window_calls: AtomicU32::new(0),
        };
        let cycle = cycle(api, store);

        // Act
        let result = cycle.run().await;

        // Assert
        assert!(result.is_err());
        assert_eq!(
            std::fs::canonicalize(cycle.store.current().unwrap()).unwrap(),
            std::fs::canonicalize(previous).unwrap()
        );
        assert_eq!(cycle.store.versions().unwrap().len(), 1);
    }
}
