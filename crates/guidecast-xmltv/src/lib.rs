//! Streaming XMLTV transforms for guidecast.
//!
//! Documents are processed as a stream of byte chunks: the [`scanner`]
//! isolates top-level `<channel>` and `<programme>` elements regardless of
//! where chunk boundaries fall, and the [`filter`] and [`inject`] stages
//! rewrite the stream on top of it. [`builder`] serializes fetched guide
//! data and [`validate`] checks produced documents before they are
//! published.

pub mod builder;
pub mod duration;
mod error;
pub mod filter;
pub mod inject;
pub mod scanner;
pub mod timestamp;
pub mod transform;
pub mod validate;

pub use builder::{BuildStats, write_guide};
pub use error::{Result, XmltvError};
pub use filter::{DateRangeFilter, filter_document};
pub use inject::{PlaceholderInjector, PlaceholderSpec, RosterEntry};
pub use scanner::{Element, ElementKind, Segment, TagScanner};
pub use timestamp::GuideClock;
pub use transform::{Transform, TransformPipeline};
pub use validate::{ValidationReport, validate_document, validate_file};
