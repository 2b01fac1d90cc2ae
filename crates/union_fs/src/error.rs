//! Error types for overlay filesystem operations.
//!
//! All fallible functions in this crate return [`Result<T>`], which uses [`Error`]
//! as the error type. `std::io::Error` and zip errors are converted via `From` impls.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or querying an overlay filesystem.
#[derive(Error, Debug)]
pub enum Error {
    /// Two paths (or a path and a filesystem) cannot be combined: they come from
    /// different filesystem instances or disagree on being absolute.
    #[error("Incompatible paths: {0}")]
    IncompatiblePath(String),

    /// The logical path is absent from every root after masking.
    #[error("No such file: {0}")]
    NotFound(String),

    /// A directory operation was requested on something that is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// A path operation received arguments it cannot satisfy (e.g. a bad subpath range).
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Underlying filesystem I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An archive root could not be opened or one of its entries could not be read.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}
