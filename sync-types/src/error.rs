//! Error types for linkmirror data model validation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while constructing or validating model types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Task identifier is empty, too long, or has characters unsafe for file names.
    #[error("invalid task id: {0:?}")]
    InvalidTaskId(String),

    /// Extension entry cannot be part of an allow-set.
    #[error("invalid extension {extension:?}: {reason}")]
    InvalidExtension {
        /// The rejected extension.
        extension: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Path is not a plain relative path (absolute, `..`, or empty).
    #[error("not a relative path: {0}")]
    NotRelative(PathBuf),

    /// Path is not valid UTF-8 and cannot be used as a cache key.
    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    /// Path does not live under the expected root.
    #[error("{path} is outside {root}")]
    OutsideRoot {
        /// The offending path.
        path: PathBuf,
        /// The root it was expected under.
        root: PathBuf,
    },

    /// Input and output trees overlap, so the mirror would observe itself.
    #[error("input {input} and output {output} overlap")]
    OverlappingDirs {
        /// Source tree.
        input: PathBuf,
        /// Destination tree.
        output: PathBuf,
    },
}
