//! Device and guide data types (JSON wire format).

use serde::{Deserialize, Serialize};

/// Device discovery document (`discover.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Hardware identifier.
    #[serde(rename = "DeviceID", default)]
    pub device_id: Option<String>,
    /// Short-lived token required by the guide endpoint.
    #[serde(rename = "DeviceAuth")]
    pub device_auth: String,
    /// Human-readable device name.
    #[serde(rename = "FriendlyName", default)]
    pub friendly_name: Option<String>,
    /// Device base URL as reported by the device.
    #[serde(rename = "BaseURL", default)]
    pub base_url: Option<String>,
    /// Number of tuners.
    #[serde(rename = "TunerCount", default)]
    pub tuner_count: Option<u32>,
}

/// One channel of the device lineup (`lineup.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineupEntry {
    /// Channel number, used as the XMLTV channel id.
    #[serde(rename = "GuideNumber")]
    pub guide_number: String,
    /// Channel name.
    #[serde(rename = "GuideName", default)]
    pub guide_name: String,
    /// Stream URL.
    #[serde(rename = "URL", default)]
    pub url: Option<String>,
}

/// One programme of a guide window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuideProgram {
    /// Start (unix seconds).
    #[serde(rename = "StartTime")]
    pub start_time: i64,
    /// End (unix seconds).
    #[serde(rename = "EndTime")]
    pub end_time: i64,
    /// Title.
    #[serde(rename = "Title", default)]
    pub title: String,
    /// Episode title.
    #[serde(rename = "EpisodeTitle", default)]
    pub episode_title: Option<String>,
    /// Episode number such as `S01E02`.
    #[serde(rename = "EpisodeNumber", default)]
    pub episode_number: Option<String>,
    /// Description.
    #[serde(rename = "Synopsis", default)]
    pub synopsis: Option<String>,
    /// Artwork URL.
    #[serde(rename = "ImageURL", default)]
    pub image_url: Option<String>,
    /// First air date (unix seconds, midnight UTC).
    #[serde(rename = "OriginalAirdate", default)]
    pub original_airdate: Option<i64>,
    /// Series identifier.
    #[serde(rename = "SeriesID", default)]
    pub series_id: Option<String>,
    /// Genre tags.
    #[serde(rename = "Filter", default)]
    pub filter: Vec<String>,
}

/// One channel of a guide window with its programmes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuideChannel {
    /// Channel number; the join key across windows.
    #[serde(rename = "GuideNumber")]
    pub guide_number: String,
    /// Channel name.
    #[serde(rename = "GuideName", default)]
    pub guide_name: Option<String>,
    /// Network affiliation.
    #[serde(rename = "Affiliate", default)]
    pub affiliate: Option<String>,
    /// Logo URL.
    #[serde(rename = "ImageURL", default)]
    pub image_url: Option<String>,
    /// Programmes, in endpoint order.
    #[serde(rename = "Guide", default)]
    pub programs: Vec<GuideProgram>,
}

/// Guide data for a set of channels: a single window or a merged
/// multi-window result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guide {
    /// Channels in endpoint order.
    pub channels: Vec<GuideChannel>,
}

impl Guide {
    /// Wraps channels.
    #[must_use]
    pub const fn new(channels: Vec<GuideChannel>) -> Self {
        Self { channels }
    }

    /// `true` when no channel carries a programme.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(|c| c.programs.is_empty())
    }

    /// Total programmes across channels.
    #[must_use]
    pub fn program_count(&self) -> usize {
        self.channels.iter().map(|c| c.programs.len()).sum()
    }

    /// Latest programme end, used as the next window's cursor.
    #[must_use]
    pub fn max_end_time(&self) -> Option<i64> {
        self.channels
            .iter()
            .flat_map(|c| c.programs.iter().map(|p| p.end_time))
            .max()
    }

    /// Channel by guide number.
    #[must_use]
    pub fn channel(&self, guide_number: &str) -> Option<&GuideChannel> {
        self.channels.iter().find(|c| c.guide_number == guide_number)
    }
}
