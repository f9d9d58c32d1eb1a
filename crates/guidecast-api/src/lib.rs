//! API client library for guidecast.
//!
//! Talks to the tuner device (discovery, channel lineup) and the cloud guide
//! endpoint, and assembles multi-window guide data.

/// Device and guide API client.
pub mod guide;
