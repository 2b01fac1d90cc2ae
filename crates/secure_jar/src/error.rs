//! Error types for jar assembly and verification.
//!
//! Trust outcomes (`Invalid`, `NotYetChecked`, ...) are not errors; they are
//! reported through [`EntryStatus`](crate::EntryStatus).

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// None of the paths handed to the jar exist.
    #[error("Invalid paths argument, contained no existing paths: {0:?}")]
    NoValidPaths(Vec<String>),

    /// Overlay filesystem lookup or path algebra failed.
    #[error(transparent)]
    FileSystem(#[from] union_fs::Error),

    /// A path built against another filesystem was handed to this jar.
    #[error("Wrong filesystem: {0}")]
    WrongFileSystem(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The manifest text could not be parsed.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// A `<ALGO>-Digest` attribute names an algorithm with no digest engine.
    #[error("Unsupported digest algorithm: {0}")]
    UnsupportedDigestAlgorithm(String),

    /// A `<ALGO>-Digest` value is not valid Base64.
    #[error("Invalid digest value for {algorithm}: {source}")]
    InvalidDigest {
        algorithm: String,
        #[source]
        source: base64::DecodeError,
    },

    /// The configuration file could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}
