//! Transform pipeline assembly for files and HTTP requests.

use guidecast_api::guide::GuideApi;
use guidecast_xmltv::{
    DateRangeFilter, GuideClock, PlaceholderInjector, PlaceholderSpec, RosterEntry,
    TransformPipeline, XmltvError,
};

/// Stages requested for one transform invocation.
#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    /// Keep programmes starting before day 0 + `days`.
    pub days: Option<u32>,
    /// Fill uncovered channels with placeholders.
    pub placeholder: Option<PlaceholderSpec>,
}

impl TransformOptions {
    /// Whether the injector needs a channel lineup.
    #[must_use]
    pub const fn needs_roster(&self) -> bool {
        self.placeholder.is_some()
    }
}

/// Requests the device lineup and maps it to injector roster entries in
/// device order.
///
/// # Errors
///
/// Returns [`XmltvError::MissingData`] if the lineup request fails.
pub async fn lineup_roster(
    api: &(impl GuideApi + Sync),
) -> Result<Vec<RosterEntry>, XmltvError> {
    let lineup = api
        .lineup()
        .await
        .map_err(|e| XmltvError::MissingData(format!("channel lineup: {e:#}")))?;
    Ok(lineup
        .into_iter()
        .map(|entry| RosterEntry::new(entry.guide_number, entry.guide_name))
        .collect())
}

/// Fetches the device lineup as an injector roster.
///
/// A failed lineup request is not fatal: it is logged and `None` is
/// returned so placeholders cover only channels already in the document.
pub async fn fetch_roster(api: &(impl GuideApi + Sync)) -> Option<Vec<RosterEntry>> {
    match lineup_roster(api).await {
        Ok(roster) => Some(roster),
        Err(e) => {
            tracing::warn!(error = %e, "Channel lineup unavailable");
            None
        }
    }
}

/// Builds a fresh pipeline: date filter first, then the injector.
#[must_use]
pub fn build_pipeline(
    options: &TransformOptions,
    clock: GuideClock,
    roster: Option<Vec<RosterEntry>>,
) -> TransformPipeline {
    let filter = options.days.and_then(|days| {
        let stage = DateRangeFilter::for_days(&clock, days);
        if stage.is_none() {
            tracing::warn!(days, "Day range out of bounds, date filter skipped");
        }
        stage
    });
    let injector = options
        .placeholder
        .clone()
        .map(|spec| PlaceholderInjector::new(spec, clock, roster));

    TransformPipeline::new()
        .maybe_stage(filter)
        .maybe_stage(injector)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use anyhow::{Result, bail};
    use chrono::{FixedOffset, NaiveDate};
    use guidecast_api::guide::{DeviceInfo, Guide, LineupEntry};
    use tracing_mock::{expect, subscriber};

    use super::*;

    struct MockLineupApi {
        lineup: Option<Vec<LineupEntry>>,
    }

    impl GuideApi for MockLineupApi {
        async fn discover(&self) -> Result<DeviceInfo> {
            bail!("not used")
        }

        async fn lineup(&self) -> Result<Vec<LineupEntry>> {
            match &self.lineup {
                Some(lineup) => Ok(lineup.clone()),
                None => bail!("device unreachable"),
            }
        }

        async fn guide_window(&self, _start: Option<i64>) -> Result<Guide> {
            bail!("not used")
        }
    }

    fn entry(number: &str, name: &str) -> LineupEntry {
        LineupEntry {
            guide_number: String::from(number),
            guide_name: String::from(name),
            url: None,
        }
    }

    fn clock() -> GuideClock {
        GuideClock::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            FixedOffset::east_opt(0).unwrap(),
        )
    }

    const DOC: &str = concat!(
        "<?xml version=\"1.0\"?>\n<tv>\n",
        "  <channel id=\"2.1\"><display-name>One</display-name></channel>\n",
        "  <programme start=\"20240101060000 +0000\" channel=\"2.1\"><title>A</title></programme>\n",
        "  <programme start=\"20240105060000 +0000\" channel=\"2.1\"><title>B</title></programme>\n",
        "</tv>\n",
    );

    fn run(pipeline: TransformPipeline) -> String {
        let mut out = Vec::new();
        pipeline.run(DOC.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_roster_maps_lineup_in_device_order() {
        // Arrange
        let api = MockLineupApi {
            lineup: Some(vec![entry("4.1", "Four"), entry("2.1", "Two")]),
        };

        // Act
        let roster = fetch_roster(&api).await.unwrap();

        // Assert
        assert_eq!(
            roster,
            vec![RosterEntry::new("4.1", "Four"), RosterEntry::new("2.1", "Two")]
        );
    }

    #[tokio::test]
    async fn test_lineup_failure_is_missing_data() {
        // Arrange
        let api = MockLineupApi { lineup: None };

        // Act
        let err = lineup_roster(&api).await.unwrap_err();

        // Assert
        assert!(matches!(err, XmltvError::MissingData(_)));
        assert_eq!(
            err.to_string(),
            "missing data: channel lineup: device unreachable"
        );
    }

    #[tokio::test]
    async fn test_fetch_roster_failure_warns_and_degrades() {
        // Arrange
        let api = MockLineupApi { lineup: None };
        let (subscriber, handle) = subscriber::mock()
            .event(
                expect::event()
                    .at_level(tracing::Level::WARN)
                    .with_fields(expect::msg("Channel lineup unavailable")),
            )
            .only()
            .run_with_handle();

        // Act
        let roster = {
            let _guard = tracing::subscriber::set_default(subscriber);
            fetch_roster(&api).await
        };

        // Assert
        assert!(roster.is_none());
        handle.assert_finished();
    }

    #[test]
    fn test_no_options_is_identity() {
        // Arrange
        let pipeline = build_pipeline(&TransformOptions::default(), clock(), None);

        // Act & Assert
        assert!(pipeline.is_empty());
        assert_eq!(run(pipeline), DOC);
    }

    #[test]
    fn test_days_only_filters() {
        // Arrange
        let options = TransformOptions {
            days: Some(2),
            placeholder: None,
        };

        // Act
        let out = run(build_pipeline(&options, clock(), None));

        // Assert
        assert!(out.contains("<title>A</title>"));
        assert!(!out.contains("<title>B</title>"));
    }

    #[test]
    fn test_filter_then_inject_for_roster_channels() {
        // Arrange
        let options = TransformOptions {
            days: Some(1),
            placeholder: PlaceholderSpec::from_token("12hr").map(|spec| PlaceholderSpec {
                days: 1,
                ..spec
            }),
        };
        let roster = vec![RosterEntry::new("2.1", "One"), RosterEntry::new("9.1", "Nine")];

        // Act
        let pipeline = build_pipeline(&options, clock(), Some(roster));
        let out = run(pipeline);

        // Assert
        assert!(options.needs_roster());
        assert!(out.contains("<channel id=\"9.1\">"));
        assert_eq!(out.matches("channel=\"9.1\"").count(), 2);
        assert!(!out.contains("<title>B</title>"));
        assert!(out.trim_end().ends_with("</tv>"));
    }
}
