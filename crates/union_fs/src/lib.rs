//! Overlay (union) filesystem over an ordered list of directory and archive roots.
//!
//! This crate composes several physical roots into one read-only namespace:
//!
//! - [`LogicalPath`] is the path value and its relativize/resolve/normalize algebra.
//! - [`RootSource`] is one physical root: a directory, a zip archive, or another
//!   [`UnionFileSystem`] (overlays nest).
//! - [`OverlayResolver`] picks the highest-priority root for a path and merges
//!   directory listings, honouring a per-root masking predicate.
//! - [`UnionFileSystem`] exposes all of this behind the [`FileSystem`] trait,
//!   including eager attribute reads and lazily-checked attribute views.
//!
//! # Priority
//!
//! Roots are supplied lowest priority first. When two roots contain the same
//! path, the one supplied **last** wins, unless the masking predicate hides it
//! in that root, in which case lookup falls back to earlier roots.
//!
//! # Masking
//!
//! The predicate receives `(relative_path, root_identity)`. Directories are
//! tested with a trailing `/`, and a path is only visible in a root if all of
//! its ancestor directories are visible there too.
//!
//! ```no_run
//! use std::sync::Arc;
//! use camino::Utf8PathBuf;
//! use union_fs::{FileSystem, UnionFileSystem};
//!
//! # fn main() -> union_fs::Result<()> {
//! let fs = UnionFileSystem::new(
//!     Arc::new(|path: &str, _root: &str| !path.ends_with(".bak")),
//!     &[Utf8PathBuf::from("base.zip"), Utf8PathBuf::from("patches")],
//! )?;
//! let text = fs.read_to_string(&fs.get_path("config/settings.txt"))?;
//! # let _ = text;
//! # Ok(())
//! # }
//! ```

pub mod attributes;
pub mod error;
pub mod filesystem;
pub mod path;
pub mod resolver;
pub mod source;

pub use attributes::{
    attribute_view, AttributeViewKind, BasicAttributeView, BasicAttributes, EntryKind,
};
pub use error::{Error, Result};
pub use filesystem::{entry_name, DirEntry, FileSystem, Location, UnionFileSystem};
pub use path::{FileSystemId, LogicalPath};
pub use resolver::OverlayResolver;
pub use source::{accept_all, ArchiveRoot, DirectoryRoot, PathFilter, RootSource};
