//! The filesystem capability and its overlay implementation.

use crate::attributes::{attribute_view, AttributeViewKind, BasicAttributeView, BasicAttributes, EntryKind};
use crate::error::{Error, Result};
use crate::path::{FileSystemId, LogicalPath};
use crate::resolver::OverlayResolver;
use crate::source::{PathFilter, RootSource};
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::io::Read;

/// One immediate child of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Physical location of an entry: a root on disk plus the entry inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub root: Utf8PathBuf,
    pub entry: String,
    /// `true` when `root` is an archive rather than a directory.
    pub archive: bool,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entry.is_empty() {
            write!(f, "{}", self.root)
        } else if self.archive {
            write!(f, "{}!/{}", self.root, self.entry)
        } else {
            write!(f, "{}/{}", self.root, self.entry)
        }
    }
}

/// Read-only access to a tree of entries addressed by [`LogicalPath`].
///
/// Relative paths are interpreted against the root. Every method rejects
/// paths built against another filesystem with [`Error::IncompatiblePath`].
pub trait FileSystem: Send + Sync {
    fn id(&self) -> FileSystemId;

    /// The physical path this filesystem was primarily built from.
    fn primary_path(&self) -> &Utf8Path;

    /// Attributes of the entry, failing with `NotFound` when it is absent.
    fn read_attributes(&self, path: &LogicalPath) -> Result<BasicAttributes>;

    fn read(&self, path: &LogicalPath) -> Result<Vec<u8>>;

    fn open(&self, path: &LogicalPath) -> Result<Box<dyn Read + Send>>;

    /// Immediate children, sorted by name.
    fn list(&self, path: &LogicalPath) -> Result<Vec<DirEntry>>;

    /// Physical location of the entry, `None` when it is absent.
    fn locate(&self, path: &LogicalPath) -> Result<Option<Location>>;

    fn exists(&self, path: &LogicalPath) -> bool {
        self.read_attributes(path).is_ok()
    }

    fn get_path(&self, path: &str) -> LogicalPath {
        LogicalPath::parse(self.id(), path)
    }

    fn root(&self) -> LogicalPath {
        LogicalPath::root(self.id())
    }

    fn is_directory(&self, path: &LogicalPath) -> bool {
        self.read_attributes(path)
            .map(|a| a.is_directory())
            .unwrap_or(false)
    }

    fn is_regular_file(&self, path: &LogicalPath) -> bool {
        self.read_attributes(path)
            .map(|a| a.is_regular_file())
            .unwrap_or(false)
    }

    fn read_to_string(&self, path: &LogicalPath) -> Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
    }

    /// Depth-first, pre-order walk starting at (and including) `start`.
    /// Children are visited in name order.
    fn walk(&self, start: &LogicalPath) -> Result<Vec<LogicalPath>> {
        let attrs = self.read_attributes(start)?;
        let mut out = vec![start.clone()];
        if !attrs.is_directory() {
            return Ok(out);
        }

        let mut pending = vec![start.clone()];
        while let Some(dir) = pending.pop() {
            for entry in self.list(&dir)? {
                let child = dir.resolve_str(&entry.name);
                if entry.kind.is_directory() {
                    pending.push(child.clone());
                }
                out.push(child);
            }
        }
        out.sort_by(|a, b| a.segments().cmp(b.segments()));
        Ok(out)
    }
}

/// The address of `path` inside a root of filesystem `fs`: normalized segments
/// joined with `/`, no leading separator.
pub fn entry_name(fs: FileSystemId, path: &LogicalPath) -> Result<String> {
    if path.file_system() != fs {
        return Err(Error::IncompatiblePath(format!(
            "'{path}' does not belong to {fs}"
        )));
    }
    Ok(path.to_absolute().normalize().relative_str())
}

/// An overlay of several roots behind one namespace.
///
/// Roots are given lowest priority first; a later root shadows earlier ones
/// for every path its masking predicate admits.
pub struct UnionFileSystem {
    id: FileSystemId,
    primary: Utf8PathBuf,
    resolver: OverlayResolver,
}

impl UnionFileSystem {
    /// Open every path as a directory or archive root.
    pub fn new(filter: PathFilter, paths: &[Utf8PathBuf]) -> Result<Self> {
        let roots = paths
            .iter()
            .map(|p| RootSource::open(p))
            .collect::<Result<Vec<_>>>()?;
        Self::from_roots(filter, roots)
    }

    /// Assemble from already opened roots, e.g. to nest another overlay.
    pub fn from_roots(filter: PathFilter, roots: Vec<RootSource>) -> Result<Self> {
        let Some(first) = roots.first() else {
            return Err(Error::InvalidPath(
                "union filesystem needs at least one root".to_string(),
            ));
        };
        let primary = first.physical_path().to_path_buf();
        let id = FileSystemId::next();

        tracing::debug!(
            "Created union filesystem {} over {} root(s), primary {}",
            id,
            roots.len(),
            primary
        );

        Ok(Self {
            id,
            primary,
            resolver: OverlayResolver::new(roots, filter),
        })
    }

    /// Physical root paths, highest priority first.
    pub fn base_paths(&self) -> Vec<&Utf8Path> {
        self.resolver
            .roots()
            .iter()
            .rev()
            .map(RootSource::physical_path)
            .collect()
    }

    pub fn filter(&self) -> &PathFilter {
        self.resolver.filter()
    }

    /// A lazily-checked attribute view; see [`attribute_view`].
    pub fn get_attribute_view(
        &self,
        path: &LogicalPath,
        kind: AttributeViewKind,
    ) -> Option<BasicAttributeView<'_>> {
        attribute_view(self, path, kind)
    }

    fn resolve_entry(&self, path: &LogicalPath) -> Result<(&RootSource, String, BasicAttributes)> {
        let rel = entry_name(self.id, path)?;
        match self.resolver.resolve(&rel)? {
            Some((root, attrs)) => Ok((root, rel, attrs)),
            None => Err(Error::NotFound(path.to_string())),
        }
    }
}

impl FileSystem for UnionFileSystem {
    fn id(&self) -> FileSystemId {
        self.id
    }

    fn primary_path(&self) -> &Utf8Path {
        &self.primary
    }

    fn read_attributes(&self, path: &LogicalPath) -> Result<BasicAttributes> {
        self.resolve_entry(path).map(|(_, _, attrs)| attrs)
    }

    fn read(&self, path: &LogicalPath) -> Result<Vec<u8>> {
        let (root, rel, attrs) = self.resolve_entry(path)?;
        if attrs.is_directory() {
            return Err(Error::NotFound(format!("{path} is a directory")));
        }
        root.read(&rel)
    }

    fn open(&self, path: &LogicalPath) -> Result<Box<dyn Read + Send>> {
        let (root, rel, attrs) = self.resolve_entry(path)?;
        if attrs.is_directory() {
            return Err(Error::NotFound(format!("{path} is a directory")));
        }
        root.open_entry(&rel)
    }

    fn list(&self, path: &LogicalPath) -> Result<Vec<DirEntry>> {
        let rel = entry_name(self.id, path)?;
        self.resolver.list_children(&rel)
    }

    fn locate(&self, path: &LogicalPath) -> Result<Option<Location>> {
        let rel = entry_name(self.id, path)?;
        self.resolver.locate(&rel)
    }
}

impl fmt::Debug for UnionFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnionFileSystem")
            .field("id", &self.id)
            .field("primary", &self.primary)
            .field("resolver", &self.resolver)
            .finish()
    }
}
