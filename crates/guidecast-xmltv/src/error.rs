//! Error taxonomy shared by the scanner, transforms and validator.

use std::io;

use thiserror::Error;

/// Errors raised while scanning, transforming, building or validating an
/// XMLTV document.
#[derive(Debug, Error)]
#[allow(clippy::module_name_repetitions)]
pub enum XmltvError {
    /// Malformed or unterminated input. The invocation must be aborted.
    #[error("malformed document: {0}")]
    Structural(String),

    /// A required collaborator produced no data.
    #[error("missing data: {0}")]
    MissingData(String),

    /// A produced document failed the well-formedness check.
    #[error("document failed validation: {0}")]
    Validation(String),

    /// The underlying reader or writer failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias defaulting to [`XmltvError`].
pub type Result<T, E = XmltvError> = std::result::Result<T, E>;
