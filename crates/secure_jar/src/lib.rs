//! Jars assembled from directories and archives, with on-demand trust checks.
//!
//! A [`Jar`] is built from one or more roots (lowest priority first) on top of
//! the `union_fs` overlay filesystem. On assembly it:
//!
//! - loads the manifest from the last declared root that has one,
//! - records the signers recovered from signed archives as *pending*,
//! - builds the multi-release override table when the manifest asks for it.
//!
//! Entries are then verified lazily. [`Jar::verify_and_get_signers`]
//! recomputes the digests the manifest declares for an entry and moves its
//! signers from pending to verified. Outcomes are memoized per entry name and
//! reported as [`EntryStatus`] values, never as errors.
//!
//! # Example
//!
//! ```no_run
//! use camino::{Utf8Path, Utf8PathBuf};
//! use secure_jar::{EntryStatus, JarBuilder, JarConfig};
//!
//! # fn main() -> secure_jar::Result<()> {
//! let config = JarConfig::load(Utf8Path::new("secure_jar.toml"))?.with_env_overrides();
//! let jar = JarBuilder::new(vec![Utf8PathBuf::from("mods/example-1.0.jar")])
//!     .with_config(config)
//!     .build()?;
//!
//! let class = jar.get_path("com/example/Main.class");
//! match jar.verify_path(&class)? {
//!     EntryStatus::Invalid => eprintln!("{class} was tampered with"),
//!     status => println!("{class}: {status:?}"),
//! }
//! # Ok(())
//! # }
//! ```

mod cache;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod jar;
pub mod manifest;
pub mod metadata;
pub mod multi_release;
pub mod provider;
pub mod signature;
pub mod verifier;

pub use config::JarConfig;
pub use error::{Error, Result};
pub use filesystem::{JarFileSystem, SimpleFileSystem};
pub use jar::{EntryStatus, Jar, JarBuilder};
pub use manifest::{Attributes, Manifest};
pub use metadata::{JarMetadata, SimpleJarMetadata};
pub use multi_release::MultiReleaseTable;
pub use provider::Provider;
pub use signature::{ArchiveScan, ArchiveScanner, JarSignatureScanner, Signer, SignerSet};
pub use verifier::{DigestAlgorithm, ManifestVerifier, SignedState};
