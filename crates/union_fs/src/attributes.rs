//! Basic file metadata and lazily-checked attribute views.
//!
//! Two ways to read metadata exist and they differ in when existence is checked:
//!
//! - [`FileSystem::read_attributes`] resolves immediately and fails with
//!   [`Error::NotFound`](crate::Error::NotFound) when the path is absent.
//! - [`attribute_view`] only checks that the view kind is supported and that
//!   the path belongs to the filesystem. The existence check is deferred to
//!   [`BasicAttributeView::read_attributes`].

use crate::error::Result;
use crate::filesystem::FileSystem;
use crate::path::LogicalPath;
use std::time::SystemTime;

/// What kind of entry a path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

impl EntryKind {
    pub fn is_directory(self) -> bool {
        self == Self::Directory
    }
}

/// Kind, size and modification time of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAttributes {
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl BasicAttributes {
    pub fn directory(modified: Option<SystemTime>) -> Self {
        Self {
            kind: EntryKind::Directory,
            size: 0,
            modified,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_regular_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub(crate) fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let kind = if meta.is_dir() {
            EntryKind::Directory
        } else if meta.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };
        Self {
            kind,
            size: if meta.is_dir() { 0 } else { meta.len() },
            modified: meta.modified().ok(),
        }
    }
}

/// Attribute view families a caller may ask for. Only [`Basic`](Self::Basic)
/// is backed by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeViewKind {
    Basic,
    Posix,
    Dos,
    Owner,
    UserDefined,
}

/// A handle for reading [`BasicAttributes`] later.
///
/// Constructing the view never touches the underlying roots.
pub struct BasicAttributeView<'a> {
    fs: &'a dyn FileSystem,
    path: LogicalPath,
}

impl<'a> BasicAttributeView<'a> {
    pub fn path(&self) -> &LogicalPath {
        &self.path
    }

    /// Resolve the path now; fails with `NotFound` if it is absent.
    pub fn read_attributes(&self) -> Result<BasicAttributes> {
        self.fs.read_attributes(&self.path)
    }
}

impl std::fmt::Debug for BasicAttributeView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAttributeView")
            .field("fs", &self.fs.id())
            .field("path", &self.path)
            .finish()
    }
}

/// Build a view for `path`, or `None` if `kind` is unsupported or `path`
/// belongs to another filesystem.
pub fn attribute_view<'a>(
    fs: &'a dyn FileSystem,
    path: &LogicalPath,
    kind: AttributeViewKind,
) -> Option<BasicAttributeView<'a>> {
    if kind != AttributeViewKind::Basic || path.file_system() != fs.id() {
        return None;
    }
    Some(BasicAttributeView {
        fs,
        path: path.clone(),
    })
}
