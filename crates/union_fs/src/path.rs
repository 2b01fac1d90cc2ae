//! Logical paths and the relativize/resolve/normalize algebra.
//!
//! A [`LogicalPath`] is an immutable list of name segments tagged with the
//! [`FileSystemId`] of the filesystem that produced it and an absolute flag.
//! No I/O happens here. Parsing collapses repeated `/` separators but never
//! interprets `.` or `..`; call [`LogicalPath::normalize`] for that.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{self, AtomicU64};
use std::sync::Arc;

const SEPARATOR: char = '/';
const PARENT: &str = "..";
const CURRENT: &str = ".";

/// Process-unique identity of a filesystem instance.
///
/// Paths built against different instances never compare equal, even when
/// their segments match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileSystemId(u64);

impl FileSystemId {
    /// Allocate a fresh identity.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, atomic::Ordering::Relaxed))
    }
}

impl fmt::Display for FileSystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fs#{}", self.0)
    }
}

/// A path inside a virtual filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalPath {
    fs: FileSystemId,
    absolute: bool,
    segments: Arc<[String]>,
}

impl LogicalPath {
    /// Parse a `/`-separated string. A leading `/` makes the path absolute.
    pub fn parse(fs: FileSystemId, path: &str) -> Self {
        Self::from_segments(
            fs,
            path.starts_with(SEPARATOR),
            path.split(SEPARATOR)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        )
    }

    /// Build a path directly from its segments. Empty segments are dropped.
    pub fn from_segments<I, S>(fs: FileSystemId, absolute: bool, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments
            .into_iter()
            .map(Into::into)
            .filter(|s: &String| !s.is_empty())
            .collect();
        Self {
            fs,
            absolute,
            segments: segments.into(),
        }
    }

    /// The absolute root (`/`) of a filesystem.
    pub fn root(fs: FileSystemId) -> Self {
        Self::from_segments(fs, true, Vec::<String>::new())
    }

    /// The empty relative path. Resolving it against anything is a no-op.
    pub fn empty(fs: FileSystemId) -> Self {
        Self::from_segments(fs, false, Vec::<String>::new())
    }

    pub fn file_system(&self) -> FileSystemId {
        self.fs
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Number of name segments. The root and the empty path both have zero.
    pub fn name_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The segment at `index`, if any.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(String::as_str)
    }

    /// The last segment.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The path without its last segment.
    ///
    /// A relative single-segment path has no parent; an absolute one has the root.
    pub fn parent(&self) -> Option<Self> {
        match self.segments.len() {
            0 => None,
            1 if !self.absolute => None,
            n => Some(self.with_segments(self.absolute, self.segments[..n - 1].to_vec())),
        }
    }

    /// A relative path made of the segments in `begin..end`.
    pub fn subpath(&self, begin: usize, end: usize) -> Result<Self> {
        if begin >= end || end > self.segments.len() {
            return Err(Error::InvalidPath(format!(
                "subpath({begin}, {end}) out of range for '{self}' with {} names",
                self.segments.len()
            )));
        }
        Ok(self.with_segments(false, self.segments[begin..end].to_vec()))
    }

    /// Segment-wise prefix test. Paths from other filesystems or of the other
    /// flavour never match.
    pub fn starts_with(&self, other: &LogicalPath) -> bool {
        self.fs == other.fs
            && self.absolute == other.absolute
            && self.segments.len() >= other.segments.len()
            && self.segments.iter().zip(other.segments.iter()).all(|(a, b)| a == b)
    }

    /// Segment-wise suffix test. An absolute `other` must match the whole path.
    pub fn ends_with(&self, other: &LogicalPath) -> bool {
        if self.fs != other.fs {
            return false;
        }
        if other.absolute {
            return self == other;
        }
        self.segments.len() >= other.segments.len()
            && self
                .segments
                .iter()
                .rev()
                .zip(other.segments.iter().rev())
                .all(|(a, b)| a == b)
    }

    /// Append `other` to this path. An absolute `other` replaces this path.
    pub fn resolve(&self, other: &LogicalPath) -> Self {
        if other.absolute {
            return other.clone();
        }
        if other.segments.is_empty() {
            return self.clone();
        }
        let joined = self
            .segments
            .iter()
            .chain(other.segments.iter())
            .cloned()
            .collect::<Vec<_>>();
        self.with_segments(self.absolute, joined)
    }

    /// Parse `other` against this path's filesystem, then [`resolve`](Self::resolve) it.
    pub fn resolve_str(&self, other: &str) -> Self {
        self.resolve(&LogicalPath::parse(self.fs, other))
    }

    /// The relative path that leads from this path to `other`.
    ///
    /// Both paths must belong to the same filesystem and share the absolute
    /// flag. The result is `n - c` `..` segments (where `c` is the length of the
    /// common segment prefix and `n` this path's name count) followed by the
    /// remainder of `other`. Relativizing a path against itself yields a path
    /// with zero names.
    pub fn relativize(&self, other: &LogicalPath) -> Result<Self> {
        if self.fs != other.fs {
            return Err(Error::IncompatiblePath(format!(
                "'{other}' belongs to {} but '{self}' belongs to {}",
                other.fs, self.fs
            )));
        }
        if self.absolute != other.absolute {
            return Err(Error::IncompatiblePath(format!(
                "cannot relativize '{other}' against '{self}': absolute/relative mismatch"
            )));
        }

        let common = self
            .segments
            .iter()
            .zip(other.segments.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let segments = std::iter::repeat(PARENT.to_string())
            .take(self.segments.len() - common)
            .chain(other.segments[common..].iter().cloned())
            .collect::<Vec<_>>();
        Ok(self.with_segments(false, segments))
    }

    /// Remove `.` segments and fold `name/..` pairs.
    ///
    /// Leading `..` segments survive on relative paths and are dropped on
    /// absolute ones (there is nothing above the root).
    pub fn normalize(&self) -> Self {
        let mut out: Vec<String> = Vec::with_capacity(self.segments.len());
        for segment in self.segments.iter() {
            match segment.as_str() {
                CURRENT => {}
                PARENT => match out.last() {
                    Some(last) if last != PARENT => {
                        out.pop();
                    }
                    _ if self.absolute => {}
                    _ => out.push(PARENT.to_string()),
                },
                _ => out.push(segment.clone()),
            }
        }
        self.with_segments(self.absolute, out)
    }

    /// The same segments, anchored at the root.
    pub fn to_absolute(&self) -> Self {
        if self.absolute {
            return self.clone();
        }
        Self {
            fs: self.fs,
            absolute: true,
            segments: self.segments.clone(),
        }
    }

    /// The segments joined with `/`, without a leading separator.
    ///
    /// This is the form handed to masking predicates and used to address
    /// entries inside a physical root.
    pub fn relative_str(&self) -> String {
        self.segments.join("/")
    }

    fn with_segments(&self, absolute: bool, segments: Vec<String>) -> Self {
        Self {
            fs: self.fs,
            absolute,
            segments: segments.into(),
        }
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            f.write_str("/")?;
        }
        f.write_str(&self.segments.join("/"))
    }
}

impl PartialOrd for LogicalPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogicalPath {
    /// Lexical by segments, absolute before relative on ties, filesystem last.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .absolute
            .cmp(&self.absolute)
            .then_with(|| self.segments.iter().cmp(other.segments.iter()))
            .then_with(|| self.fs.cmp(&other.fs))
    }
}
