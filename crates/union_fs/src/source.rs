//! Physical roots that an overlay is assembled from.
//!
//! A [`RootSource`] is one of a small closed set: a directory on disk, a zip
//! archive, or another [`UnionFileSystem`] (which is how overlays nest). All of
//! them are addressed by a `/`-separated path relative to the root, with `""`
//! naming the root itself.

use crate::attributes::{BasicAttributes, EntryKind};
use crate::error::{Error, Result};
use crate::filesystem::{DirEntry, FileSystem, UnionFileSystem};
use crate::path::LogicalPath;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use zip::ZipArchive;

const MAX_PREALLOCATION: u64 = 1 << 20;

/// Masking predicate: `(relative_path, source_identity) -> visible`.
///
/// Directories are tested in their trailing-slash form (`"subdir/"`), files as
/// plain names (`"subdir/file.txt"`).
pub type PathFilter = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// A filter that hides nothing.
pub fn accept_all() -> PathFilter {
    Arc::new(|_: &str, _: &str| true)
}

/// One physical root of an overlay.
pub enum RootSource {
    Directory(DirectoryRoot),
    Archive(ArchiveRoot),
    Union(Arc<UnionFileSystem>),
}

impl RootSource {
    /// Open a directory or zip archive on disk.
    pub fn open(path: &Utf8Path) -> Result<Self> {
        let meta = std::fs::metadata(path.as_std_path())?;
        if meta.is_dir() {
            Ok(Self::Directory(DirectoryRoot::new(path.to_path_buf())))
        } else {
            Ok(Self::Archive(ArchiveRoot::open(path)?))
        }
    }

    /// The string handed to masking predicates as the source identity.
    pub fn identity(&self) -> String {
        self.physical_path().to_string()
    }

    /// The on-disk location this root ultimately reads from.
    pub fn physical_path(&self) -> &Utf8Path {
        match self {
            Self::Directory(dir) => &dir.path,
            Self::Archive(archive) => &archive.path,
            Self::Union(fs) => fs.primary_path(),
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, Self::Archive(_))
    }

    /// Metadata for `rel`, `None` if it does not exist in this root.
    pub fn attributes(&self, rel: &str) -> Result<Option<BasicAttributes>> {
        match self {
            Self::Directory(dir) => dir.attributes(rel),
            Self::Archive(archive) => Ok(archive.attributes(rel)),
            Self::Union(fs) => match fs.read_attributes(&nested_path(fs, rel)) {
                Ok(attrs) => Ok(Some(attrs)),
                Err(Error::NotFound(_)) => Ok(None),
                Err(err) => Err(err),
            },
        }
    }

    pub fn read(&self, rel: &str) -> Result<Vec<u8>> {
        match self {
            Self::Directory(dir) => Ok(std::fs::read(dir.full_path(rel).as_std_path())?),
            Self::Archive(archive) => archive.read(rel),
            Self::Union(fs) => fs.read(&nested_path(fs, rel)),
        }
    }

    pub fn open_entry(&self, rel: &str) -> Result<Box<dyn Read + Send>> {
        match self {
            Self::Directory(dir) => Ok(Box::new(File::open(dir.full_path(rel).as_std_path())?)),
            Self::Archive(archive) => Ok(Box::new(Cursor::new(archive.read(rel)?))),
            Self::Union(fs) => fs.open(&nested_path(fs, rel)),
        }
    }

    /// Immediate children of the directory `rel`, unfiltered.
    pub fn list(&self, rel: &str) -> Result<Vec<DirEntry>> {
        match self {
            Self::Directory(dir) => dir.list(rel),
            Self::Archive(archive) => archive.list(rel),
            Self::Union(fs) => fs.list(&nested_path(fs, rel)),
        }
    }
}

impl std::fmt::Debug for RootSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Directory(dir) => f.debug_tuple("Directory").field(&dir.path).finish(),
            Self::Archive(archive) => f.debug_tuple("Archive").field(&archive.path).finish(),
            Self::Union(fs) => f.debug_tuple("Union").field(&fs.id()).finish(),
        }
    }
}

fn nested_path(fs: &UnionFileSystem, rel: &str) -> LogicalPath {
    LogicalPath::parse(fs.id(), rel).to_absolute()
}

/// A plain directory on disk.
pub struct DirectoryRoot {
    path: Utf8PathBuf,
}

impl DirectoryRoot {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    fn full_path(&self, rel: &str) -> Utf8PathBuf {
        if rel.is_empty() {
            self.path.clone()
        } else {
            self.path.join(rel)
        }
    }

    fn attributes(&self, rel: &str) -> Result<Option<BasicAttributes>> {
        match std::fs::metadata(self.full_path(rel).as_std_path()) {
            Ok(meta) => Ok(Some(BasicAttributes::from_metadata(&meta))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn list(&self, rel: &str) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(self.full_path(rel).as_std_path())? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!("Skipping non-UTF-8 entry under {}", self.full_path(rel));
                continue;
            };
            let file_type = entry.file_type()?;
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                // Follow symlinks so a linked directory still lists as one.
                match std::fs::metadata(entry.path()) {
                    Ok(meta) if meta.is_dir() => EntryKind::Directory,
                    Ok(meta) if meta.is_file() => EntryKind::File,
                    _ => EntryKind::Other,
                }
            };
            entries.push(DirEntry { name, kind });
        }
        Ok(entries)
    }
}

struct ArchiveEntry {
    index: Option<usize>,
    attrs: BasicAttributes,
    children: BTreeSet<String>,
}

/// A zip archive, indexed once when opened.
///
/// Parent directories missing from the archive's central directory are
/// synthesized so every file is reachable from the root. Entry reads go through
/// a mutex since the zip reader is stateful.
pub struct ArchiveRoot {
    path: Utf8PathBuf,
    archive: Mutex<ZipArchive<BufReader<File>>>,
    entries: BTreeMap<String, ArchiveEntry>,
}

impl ArchiveRoot {
    pub fn open(path: &Utf8Path) -> Result<Self> {
        let file = File::open(path.as_std_path())?;
        let mut archive = ZipArchive::new(BufReader::new(file))?;

        let mut entries: BTreeMap<String, ArchiveEntry> = BTreeMap::new();
        entries.insert(
            String::new(),
            ArchiveEntry {
                index: None,
                attrs: BasicAttributes::directory(None),
                children: BTreeSet::new(),
            },
        );

        for i in 0..archive.len() {
            let file = archive.by_index(i)?;
            let name = file.name().trim_matches('/').to_string();
            if name.is_empty() {
                continue;
            }
            let modified = file.last_modified().and_then(zip_time);
            let attrs = if file.is_dir() {
                BasicAttributes::directory(modified)
            } else {
                BasicAttributes {
                    kind: EntryKind::File,
                    size: file.size(),
                    modified,
                }
            };
            drop(file);

            insert_parents(&mut entries, &name);
            let entry = entries.entry(name).or_insert_with(|| ArchiveEntry {
                index: None,
                attrs: attrs.clone(),
                children: BTreeSet::new(),
            });
            entry.index = Some(i);
            entry.attrs = attrs;
        }

        tracing::debug!("Indexed archive {} ({} entries)", path, entries.len());

        Ok(Self {
            path: path.to_path_buf(),
            archive: Mutex::new(archive),
            entries,
        })
    }

    fn attributes(&self, rel: &str) -> Option<BasicAttributes> {
        self.entries.get(rel).map(|e| e.attrs.clone())
    }

    fn read(&self, rel: &str) -> Result<Vec<u8>> {
        let index = match self.entries.get(rel) {
            Some(ArchiveEntry {
                index: Some(index),
                attrs,
                ..
            }) if attrs.is_regular_file() => *index,
            _ => return Err(Error::NotFound(format!("{}!/{}", self.path, rel))),
        };

        let mut archive = self
            .archive
            .lock()
            .map_err(|_| io::Error::other(format!("archive lock poisoned: {}", self.path)))?;
        let mut file = archive.by_index(index)?;
        // The declared size comes from the archive and is not trusted.
        let mut bytes = Vec::with_capacity(file.size().min(MAX_PREALLOCATION) as usize);
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn list(&self, rel: &str) -> Result<Vec<DirEntry>> {
        let Some(entry) = self.entries.get(rel) else {
            return Err(Error::NotFound(format!("{}!/{}", self.path, rel)));
        };
        if !entry.attrs.is_directory() {
            return Err(Error::NotADirectory(format!("{}!/{}", self.path, rel)));
        }
        Ok(entry
            .children
            .iter()
            .map(|name| {
                let child = join(rel, name);
                let kind = self
                    .entries
                    .get(&child)
                    .map(|e| e.attrs.kind)
                    .unwrap_or(EntryKind::Other);
                DirEntry {
                    name: name.clone(),
                    kind,
                }
            })
            .collect())
    }
}

/// Register `name` with its parent and make sure every ancestor exists as a directory.
fn insert_parents(entries: &mut BTreeMap<String, ArchiveEntry>, name: &str) {
    let mut child = name;
    loop {
        let (parent, file_name) = match child.rfind('/') {
            Some(idx) => (&child[..idx], &child[idx + 1..]),
            None => ("", child),
        };
        let parent_entry = entries.entry(parent.to_string()).or_insert_with(|| ArchiveEntry {
            index: None,
            attrs: BasicAttributes::directory(None),
            children: BTreeSet::new(),
        });
        let fresh = parent_entry.children.insert(file_name.to_string());
        if parent.is_empty() || !fresh {
            break;
        }
        child = parent;
    }
}

pub(crate) fn join(rel: &str, name: &str) -> String {
    if rel.is_empty() {
        name.to_string()
    } else {
        format!("{rel}/{name}")
    }
}

/// Zip timestamps carry no timezone and are read as UTC.
fn zip_time(dt: zip::DateTime) -> Option<SystemTime> {
    chrono::NaiveDateTime::try_from(dt)
        .ok()
        .map(|t| t.and_utc().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &std::path::Path, files: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, content) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_archive_synthesizes_parents() {
        let dir = tempdir().unwrap();
        let zip_path = dir.path().join("a.zip");
        write_zip(&zip_path, &[("a/b/c.txt", "c"), ("top.txt", "t")]);

        let path = Utf8PathBuf::from_path_buf(zip_path).unwrap();
        let root = RootSource::open(&path).unwrap();
        assert!(root.is_archive());

        assert!(root.attributes("a").unwrap().unwrap().is_directory());
        assert!(root.attributes("a/b").unwrap().unwrap().is_directory());
        let file = root.attributes("a/b/c.txt").unwrap().unwrap();
        assert!(file.is_regular_file());
        assert_eq!(file.size, 1);
        assert!(root.attributes("missing").unwrap().is_none());

        let names: Vec<String> = root.list("").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["a", "top.txt"]);
        assert_eq!(root.read("a/b/c.txt").unwrap(), b"c");
        assert!(matches!(root.list("top.txt"), Err(Error::NotADirectory(_))));
        assert!(matches!(root.read("a"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_directory_root() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/x.txt"), b"xyz").unwrap();

        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let root = RootSource::open(&path).unwrap();
        assert_eq!(root.identity(), path.to_string());
        assert!(root.attributes("").unwrap().unwrap().is_directory());
        assert_eq!(root.attributes("sub/x.txt").unwrap().unwrap().size, 3);
        assert!(root.attributes("sub/y.txt").unwrap().is_none());

        let mut content = String::new();
        root.open_entry("sub/x.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "xyz");
    }

    #[test]
    fn test_archive_reads_entries_past_preallocation() {
        let dir = tempdir().unwrap();
        let zip_path = dir.path().join("big.zip");
        let big = "x".repeat(MAX_PREALLOCATION as usize + 17);
        write_zip(&zip_path, &[("big.bin", &big)]);

        let path = Utf8PathBuf::from_path_buf(zip_path).unwrap();
        let root = RootSource::open(&path).unwrap();
        let bytes = root.read("big.bin").unwrap();
        assert_eq!(bytes.len(), big.len());
    }

    #[test]
    fn test_zip_time_is_utc() {
        let dt = zip::DateTime::from_date_and_time(2000, 3, 1, 0, 0, 0).unwrap();
        // 2000-03-01T00:00:00Z
        assert_eq!(
            zip_time(dt),
            Some(UNIX_EPOCH + Duration::from_secs(951_868_800))
        );

        let dt = zip::DateTime::from_date_and_time(2024, 2, 29, 23, 59, 58).unwrap();
        let expected: SystemTime = chrono::NaiveDate::from_ymd_opt(2024, 2, 29)
            .and_then(|d| d.and_hms_opt(23, 59, 58))
            .unwrap()
            .and_utc()
            .into();
        assert_eq!(zip_time(dt), Some(expected));
    }
}
