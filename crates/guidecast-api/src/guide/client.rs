//! `GuideClient` - tuner device and cloud guide API client implementation.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::instrument;
use url::Url;

use super::api::GuideApi;
use super::backoff::RetryPolicy;
use super::types::{DeviceInfo, Guide, GuideChannel, LineupEntry};

/// Default base URL of the cloud guide endpoint.
pub const DEFAULT_API_URL: &str = "https://api.hdhomerun.com/";

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest body prefix quoted in decode errors.
const PREVIEW_LEN: usize = 500;

/// Tuner device and guide API client.
///
/// Caches the device auth token between calls and re-discovers it once when
/// the guide endpoint rejects it.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct GuideClient {
    /// HTTP client (reqwest, gzip enabled).
    http_client: Client,
    /// Device base URL (`discover.json`, `lineup.json`).
    device_url: Url,
    /// Guide endpoint base URL (`api/guide.php`).
    api_url: Url,
    /// Backoff between attempts.
    retry: RetryPolicy,
    /// Cached `DeviceAuth` token.
    device_auth: Mutex<Option<String>>,
}

/// Builder for `GuideClient`.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct GuideClientBuilder {
    device_url: Option<Url>,
    api_url: Option<Url>,
    user_agent: Option<String>,
    retry: Option<RetryPolicy>,
    timeout: Option<Duration>,
}

impl GuideClientBuilder {
    /// Creates a new builder.
    const fn new() -> Self {
        Self {
            device_url: None,
            api_url: None,
            user_agent: None,
            retry: None,
            timeout: None,
        }
    }

    /// Sets the tuner device base URL (required).
    #[must_use]
    pub fn device_url(mut self, url: Url) -> Self {
        self.device_url = Some(url);
        self
    }

    /// Overrides the guide endpoint base URL (for wiremock in tests).
    #[must_use]
    pub fn api_url(mut self, url: Url) -> Self {
        self.api_url = Some(url);
        self
    }

    /// Sets the User-Agent (required).
    #[must_use]
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Sets the retry policy (default: 3 retries, 2s doubling).
    #[must_use]
    pub const fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Sets the per-request timeout (default: 30s).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// - `device_url` or `user_agent` is not set.
    /// - `reqwest::Client` build fails.
    pub fn build(self) -> Result<GuideClient> {
        let device_url = self.device_url.context("device_url is required")?;
        let user_agent = self.user_agent.context("user_agent is required")?;

        let api_url = if let Some(url) = self.api_url {
            url
        } else {
            Url::parse(DEFAULT_API_URL).context("invalid default guide API URL")?
        };

        let http_client = Client::builder()
            .user_agent(&user_agent)
            .gzip(true)
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .context("failed to build HTTP client")?;

        Ok(GuideClient {
            http_client,
            device_url,
            api_url,
            retry: self.retry.unwrap_or_default(),
            device_auth: Mutex::new(None),
        })
    }
}

/// Outcome of a request once retries are settled.
#[derive(Debug)]
enum Reply {
    /// 2xx with its body.
    Body(String),
    /// 401 / 403: the auth token was refused.
    Unauthorized(StatusCode),
    /// Any other 4xx: the endpoint has nothing for this request.
    NoData(StatusCode),
}

impl GuideClient {
    /// Creates a new builder.
    #[must_use]
    pub const fn builder() -> GuideClientBuilder {
        GuideClientBuilder::new()
    }

    /// Device base URL.
    #[must_use]
    pub const fn device_url(&self) -> &Url {
        &self.device_url
    }

    /// Builds a JSON decode error with a preview of the response body.
    fn json_decode_error(command: &str, body: &str) -> String {
        format!(
            "{} JSON decoding failed (len={}): {}",
            command,
            body.len(),
            body.get(..body.floor_char_boundary(PREVIEW_LEN))
                .unwrap_or_default()
        )
    }

    fn decode<T: DeserializeOwned>(command: &str, body: &str) -> Result<T> {
        serde_json::from_str(body).with_context(|| Self::json_decode_error(command, body))
    }

    /// Parses a guide window. The endpoint answers `null` when it has
    /// nothing to offer.
    pub(crate) fn parse_guide(body: &str) -> Result<Guide> {
        let channels: Option<Vec<GuideChannel>> = Self::decode("Guide", body)?;
        Ok(Guide::new(channels.unwrap_or_default()))
    }

    fn endpoint(base: &Url, path: &str) -> Result<Url> {
        base.join(path)
            .with_context(|| format!("invalid endpoint {path} for base {base}"))
    }
}

/// `true` when `err` (or any cause) is a host name resolution failure.
fn is_name_resolution_error(err: &reqwest::Error) -> bool {
    if !err.is_connect() {
        return false;
    }
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let message = cause.to_string().to_ascii_lowercase();
        if message.contains("dns error")
            || message.contains("failed to lookup address")
            || message.contains("name or service not known")
        {
            return true;
        }
        source = cause.source();
    }
    false
}

impl GuideClient {
    /// Sends a GET request with retry logic.
    ///
    /// Transport errors, 5xx and 429 are retried with exponential backoff
    /// (429 honours `Retry-After`). Name resolution failures fail at once.
    /// 4xx replies are returned to the caller without retrying.
    async fn request_with_retry(
        &self,
        command: &str,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Reply> {
        let mut last_err = None;

        for attempt in 0..=self.retry.max_retries() {
            let response = match build_request().send().await {
                Ok(r) => r,
                Err(e) if is_name_resolution_error(&e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("{command} request failed: host name did not resolve")));
                }
                Err(e) => {
                    tracing::warn!(
                        %command,
                        attempt,
                        error = %e,
                        "Request failed, will retry"
                    );
                    last_err =
                        Some(anyhow::Error::new(e).context(format!("{command} request failed")));
                    self.retry.wait(attempt).await;
                    continue;
                }
            };

            let status = response.status();
            tracing::trace!(%command, %status, headers = ?response.headers(), "Response headers");

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map_or_else(
                        || self.retry.delay_for(attempt),
                        |secs| Duration::from_secs(secs.saturating_add(1)),
                    );

                tracing::warn!(
                    %command,
                    attempt,
                    code = status.as_u16(),
                    retry_after_secs = retry_after.as_secs(),
                    "Rate limited, waiting before retry"
                );
                last_err = Some(anyhow::anyhow!("{command} rate limited (HTTP {status})"));
                if !self.retry.is_last(attempt) {
                    tokio::time::sleep(retry_after).await;
                }
                continue;
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Ok(Reply::Unauthorized(status));
            }

            if status.is_client_error() {
                return Ok(Reply::NoData(status));
            }

            if !status.is_success() {
                tracing::warn!(
                    %command,
                    attempt,
                    code = status.as_u16(),
                    "Server error, will retry"
                );
                last_err = Some(anyhow::anyhow!("{command} failed (HTTP {status})"));
                self.retry.wait(attempt).await;
                continue;
            }

            match response.text().await {
                Ok(body) => {
                    tracing::debug!(%command, body_len = body.len(), "Response body received");
                    return Ok(Reply::Body(body));
                }
                Err(e) => {
                    tracing::warn!(
                        %command,
                        attempt,
                        error = %e,
                        "Failed to read response body, will retry"
                    );
                    last_err = Some(
                        anyhow::Error::new(e).context(format!("failed to read {command} response")),
                    );
                    self.retry.wait(attempt).await;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{command} failed after retries")))
    }

    /// Returns the cached auth token, discovering the device if needed.
    async fn device_auth(&self) -> Result<String> {
        let mut cached = self.device_auth.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let info = self.fetch_device_info().await?;
        *cached = Some(info.device_auth.clone());
        Ok(info.device_auth)
    }

    async fn fetch_device_info(&self) -> Result<DeviceInfo> {
        let url = Self::endpoint(&self.device_url, "discover.json")?;
        match self
            .request_with_retry("Discover", || self.http_client.get(url.clone()))
            .await?
        {
            Reply::Body(body) => Self::decode("Discover", &body),
            Reply::Unauthorized(status) | Reply::NoData(status) => {
                bail!("device discovery rejected (HTTP {status})")
            }
        }
    }
}

impl GuideApi for GuideClient {
    #[instrument(skip_all)]
    async fn discover(&self) -> Result<DeviceInfo> {
        let info = self.fetch_device_info().await?;
        *self.device_auth.lock().await = Some(info.device_auth.clone());
        Ok(info)
    }

    #[instrument(skip_all)]
    async fn lineup(&self) -> Result<Vec<LineupEntry>> {
        let url = Self::endpoint(&self.device_url, "lineup.json")?;
        match self
            .request_with_retry("Lineup", || self.http_client.get(url.clone()))
            .await?
        {
            Reply::Body(body) => Self::decode("Lineup", &body),
            Reply::Unauthorized(status) | Reply::NoData(status) => {
                bail!("channel lineup request rejected (HTTP {status})")
            }
        }
    }

    #[instrument(skip_all, fields(start = ?start))]
    async fn guide_window(&self, start: Option<i64>) -> Result<Guide> {
        let url = Self::endpoint(&self.api_url, "api/guide.php")?;
        let mut refreshed = false;

        loop {
            let token = self.device_auth().await?;
            let reply = self
                .request_with_retry("Guide", || {
                    let req = self
                        .http_client
                        .get(url.clone())
                        .query(&[("DeviceAuth", token.as_str())]);
                    match start {
                        Some(start) => req.query(&[("Start", start)]),
                        None => req,
                    }
                })
                .await?;

            match reply {
                Reply::Body(body) => return Self::parse_guide(&body),
                Reply::NoData(status) => {
                    tracing::info!(?start, code = status.as_u16(), "No guide data for window");
                    return Ok(Guide::default());
                }
                Reply::Unauthorized(status) if !refreshed => {
                    tracing::warn!(
                        code = status.as_u16(),
                        "Guide endpoint refused device auth, rediscovering"
                    );
                    *self.device_auth.lock().await = None;
                    refreshed = true;
                }
                Reply::Unauthorized(status) => {
                    bail!("guide endpoint refused device auth after rediscovery (HTTP {status})")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const DISCOVER: &str =
        r#"{"FriendlyName":"Tuner","DeviceID":"1234ABCD","DeviceAuth":"tok-1","TunerCount":2}"#;

    const WINDOW: &str = r#"[
        {"GuideNumber":"2.1","GuideName":"WXYZ","Affiliate":"ABC","Guide":[
            {"StartTime":1704067200,"EndTime":1704069000,"Title":"News","EpisodeNumber":"S01E02","Filter":["News"]},
            {"StartTime":1704069000,"EndTime":1704070800,"Title":"Weather"}
        ]},
        {"GuideNumber":"4.1","GuideName":"WABC"}
    ]"#;

    fn client(server: &MockServer) -> GuideClient {
        let base: Url = format!("{}/", server.uri()).parse().unwrap();
        GuideClient::builder()
            .device_url(base.clone())
            .api_url(base)
            .user_agent("test/0.0.0")
            .retry(RetryPolicy::new(2, Duration::ZERO))
            .build()
            .unwrap()
    }

    async fn mount_discover(server: &MockServer, token: &str, times: u64) {
        Mock::given(method("GET"))
            .and(path("/discover.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"{{"DeviceID":"1234ABCD","DeviceAuth":"{token}"}}"#
            )))
            .expect(times)
            .mount(server)
            .await;
    }

    #[test]
    fn test_builder_requires_device_url() {
        // Arrange & Act
        let result = GuideClient::builder().user_agent("test/0.0.0").build();

        // Assert
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("device_url is required")
        );
    }

    #[test]
    fn test_builder_requires_user_agent() {
        let result = GuideClient::builder()
            .device_url(Url::parse("http://127.0.0.1/").unwrap())
            .build();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("user_agent is required")
        );
    }

    #[test]
    fn test_parse_guide() {
        // Act
        let guide = GuideClient::parse_guide(WINDOW).unwrap();

        // Assert
        assert_eq!(guide.channels.len(), 2);
        assert_eq!(guide.channels[0].programs.len(), 2);
        assert_eq!(
            guide.channels[0].programs[0].episode_number.as_deref(),
            Some("S01E02")
        );
        assert!(guide.channels[1].programs.is_empty());
        assert_eq!(guide.max_end_time(), Some(1_704_070_800));
    }

    #[test]
    fn test_parse_guide_null_is_empty() {
        let guide = GuideClient::parse_guide("null").unwrap();
        assert!(guide.is_empty());
    }

    #[test]
    fn test_parse_guide_garbage_reports_preview() {
        let err = GuideClient::parse_guide("<html>oops</html>").unwrap_err();
        assert!(err.to_string().contains("Guide JSON decoding failed"));
    }

    #[tokio::test]
    async fn test_discover_via_http() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/discover.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DISCOVER))
            .expect(1)
            .mount(&server)
            .await;

        // Act
        let info = client(&server).discover().await.unwrap();

        // Assert
        assert_eq!(info.device_auth, "tok-1");
        assert_eq!(info.tuner_count, Some(2));
    }

    #[tokio::test]
    async fn test_lineup_via_http() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lineup.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"GuideNumber":"2.1","GuideName":"WXYZ","URL":"http://x/auto/v2.1"}]"#,
            ))
            .mount(&server)
            .await;

        // Act
        let lineup = client(&server).lineup().await.unwrap();

        // Assert
        assert_eq!(lineup.len(), 1);
        assert_eq!(lineup[0].guide_number, "2.1");
        assert_eq!(lineup[0].guide_name, "WXYZ");
    }

    #[tokio::test]
    async fn test_lineup_not_found_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lineup.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(client(&server).lineup().await.is_err());
    }

    #[tokio::test]
    async fn test_guide_window_sends_token_and_start() {
        // Arrange
        let server = MockServer::start().await;
        mount_discover(&server, "tok-1", 1).await;
        Mock::given(method("GET"))
            .and(path("/api/guide.php"))
            .and(query_param("DeviceAuth", "tok-1"))
            .and(query_param("Start", "1704070800"))
            .respond_with(ResponseTemplate::new(200).set_body_string(WINDOW))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/guide.php"))
            .and(query_param_is_missing("Start"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;
        let client = client(&server);

        // Act
        let base = client.guide_window(None).await.unwrap();
        let later = client.guide_window(Some(1_704_070_800)).await.unwrap();

        // Assert: token discovered once and reused
        assert!(base.is_empty());
        assert_eq!(later.program_count(), 2);
    }

    #[tokio::test]
    async fn test_guide_window_rediscovers_once_on_unauthorized() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/discover.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DISCOVER))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/guide.php"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        // Act
        let result = client(&server).guide_window(None).await;

        // Assert
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("after rediscovery")
        );
    }

    #[tokio::test]
    async fn test_guide_window_client_error_is_empty_window() {
        // Arrange
        let server = MockServer::start().await;
        mount_discover(&server, "tok-1", 1).await;
        Mock::given(method("GET"))
            .and(path("/api/guide.php"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        // Act
        let guide = client(&server).guide_window(Some(1)).await.unwrap();

        // Assert: not retried, not an error
        assert!(guide.is_empty());
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_fail() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/discover.json"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        // Act
        let result = client(&server).discover().await;

        // Assert: first attempt + 2 retries
        assert!(result.unwrap_err().to_string().contains("HTTP 503"));
    }

    #[tokio::test]
    async fn test_no_backoff_after_final_attempt() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/discover.json"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;
        let client = GuideClient::builder()
            .device_url(format!("{}/", server.uri()).parse().unwrap())
            .user_agent("test/0.0.0")
            .retry(RetryPolicy::new(1, Duration::from_secs(2)))
            .build()
            .unwrap();

        // Act
        let start = std::time::Instant::now();
        let result = client.discover().await;

        // Assert: one 2s backoff between the two attempts, none after the last
        assert!(result.unwrap_err().to_string().contains("HTTP 500"));
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_rate_limit_on_final_attempt_does_not_sleep() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lineup.json"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .expect(1)
            .mount(&server)
            .await;
        let base: Url = format!("{}/", server.uri()).parse().unwrap();
        let client = GuideClient::builder()
            .device_url(base)
            .user_agent("test/0.0.0")
            .retry(RetryPolicy::new(0, Duration::ZERO))
            .build()
            .unwrap();

        // Act
        let result = tokio::time::timeout(Duration::from_secs(5), client.lineup()).await;

        // Assert
        let err = result.unwrap().unwrap_err();
        assert!(format!("{err:#}").contains("rate limited"));
    }

    #[tokio::test]
    async fn test_rate_limit_honours_retry_after() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lineup.json"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/lineup.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        // Act
        let start = std::time::Instant::now();
        let lineup = client(&server).lineup().await.unwrap();

        // Assert: Retry-After 0 waits one second
        assert!(lineup.is_empty());
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unresolvable_host_fails_without_retry() {
        // Arrange
        let client = GuideClient::builder()
            .device_url(Url::parse("http://guidecast-device.invalid/").unwrap())
            .user_agent("test/0.0.0")
            .retry(RetryPolicy::new(3, Duration::from_secs(5)))
            .build()
            .unwrap();

        // Act
        let start = std::time::Instant::now();
        let result = client.discover().await;

        // Assert
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
