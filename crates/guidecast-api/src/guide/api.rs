//! `GuideApi` trait definition.
#![allow(clippy::future_not_send)]

use anyhow::Result;

use super::types::{DeviceInfo, Guide, LineupEntry};

/// Tuner device and guide API.
///
/// Abstracts remote operations for mock substitution in tests.
/// Uses `trait_variant::make` to generate a `Send`-bound async trait.
#[allow(clippy::module_name_repetitions)]
#[trait_variant::make(GuideApi: Send)]
pub trait LocalGuideApi {
    /// Reads the device's discovery document (carries the auth token).
    ///
    /// # Errors
    ///
    /// Returns an error if the device is unreachable or the reply is not
    /// valid JSON.
    async fn discover(&self) -> Result<DeviceInfo>;

    /// Reads the device's channel lineup.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is unreachable or rejects the request.
    async fn lineup(&self) -> Result<Vec<LineupEntry>>;

    /// Downloads one guide window. `start` is unix seconds; `None` asks for
    /// the endpoint's default window beginning now.
    ///
    /// A window the endpoint has no data for is returned empty, not as an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error on exhausted retries, name resolution failure or an
    /// undecodable body.
    async fn guide_window(&self, start: Option<i64>) -> Result<Guide>;
}
