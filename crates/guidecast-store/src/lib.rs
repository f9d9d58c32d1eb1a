//! Versioned storage for generated XMLTV documents.
//!
//! Each update cycle writes a new timestamped file; a stable `xmltv.xml`
//! link is repointed to it once it has been validated, and older versions
//! are pruned.

mod location;
/// Staging, publishing and pruning of guide versions.
pub mod store;

pub use location::resolve_data_dir;
#[allow(clippy::module_name_repetitions)]
pub use store::{GuideStore, StagedGuide};
