//! Guide API client module.
//!
//! Discovers the tuner device, reads its channel lineup and downloads guide
//! data window by window from the cloud guide endpoint.

mod api;
mod backoff;
mod client;
mod fetch;
mod merge;
mod params;
mod types;

#[allow(clippy::module_name_repetitions)]
pub use api::{GuideApi, LocalGuideApi};
pub use backoff::RetryPolicy;
#[allow(clippy::module_name_repetitions)]
pub use client::{GuideClient, GuideClientBuilder};
pub use fetch::fetch_guide;
pub use merge::{MergeStats, merge_windows};
pub use params::FetchPlan;
#[allow(clippy::module_name_repetitions)]
pub use types::{DeviceInfo, Guide, GuideChannel, GuideProgram, LineupEntry};
