//! The filesystem a jar reads through, chosen once by root count.

use camino::{Utf8Path, Utf8PathBuf};
use std::io::Read;
use union_fs::{
    accept_all, entry_name, BasicAttributes, DirEntry, Error, FileSystem, FileSystemId, Location,
    LogicalPath, PathFilter, RootSource, UnionFileSystem,
};

/// A single directory or archive, read without masking.
///
/// The filter is only carried along for provider filtering.
pub struct SimpleFileSystem {
    id: FileSystemId,
    primary: Utf8PathBuf,
    root: RootSource,
    filter: Option<PathFilter>,
}

impl SimpleFileSystem {
    pub fn open(path: &Utf8Path, filter: Option<PathFilter>) -> union_fs::Result<Self> {
        let root = RootSource::open(path)?;
        Ok(Self {
            id: FileSystemId::next(),
            primary: path.to_path_buf(),
            root,
            filter,
        })
    }

    pub fn filter(&self) -> Option<&PathFilter> {
        self.filter.as_ref()
    }

    fn attributes(&self, path: &LogicalPath) -> union_fs::Result<(String, BasicAttributes)> {
        let rel = entry_name(self.id, path)?;
        match self.root.attributes(&rel)? {
            Some(attrs) => Ok((rel, attrs)),
            None => Err(Error::NotFound(path.to_string())),
        }
    }

    fn file(&self, path: &LogicalPath) -> union_fs::Result<String> {
        let (rel, attrs) = self.attributes(path)?;
        if attrs.is_directory() {
            return Err(Error::NotFound(format!("{path} is a directory")));
        }
        Ok(rel)
    }
}

impl FileSystem for SimpleFileSystem {
    fn id(&self) -> FileSystemId {
        self.id
    }

    fn primary_path(&self) -> &Utf8Path {
        &self.primary
    }

    fn read_attributes(&self, path: &LogicalPath) -> union_fs::Result<BasicAttributes> {
        self.attributes(path).map(|(_, attrs)| attrs)
    }

    fn read(&self, path: &LogicalPath) -> union_fs::Result<Vec<u8>> {
        let rel = self.file(path)?;
        self.root.read(&rel)
    }

    fn open(&self, path: &LogicalPath) -> union_fs::Result<Box<dyn Read + Send>> {
        let rel = self.file(path)?;
        self.root.open_entry(&rel)
    }

    fn list(&self, path: &LogicalPath) -> union_fs::Result<Vec<DirEntry>> {
        let (rel, attrs) = self.attributes(path)?;
        if !attrs.is_directory() {
            return Err(Error::NotADirectory(path.to_string()));
        }
        let mut entries = self.root.list(&rel)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn locate(&self, path: &LogicalPath) -> union_fs::Result<Option<Location>> {
        let rel = entry_name(self.id, path)?;
        if self.root.attributes(&rel)?.is_none() {
            return Ok(None);
        }
        Ok(Some(Location {
            root: self.primary.clone(),
            entry: rel,
            archive: self.root.is_archive(),
        }))
    }
}

impl std::fmt::Debug for SimpleFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleFileSystem")
            .field("id", &self.id)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// The two shapes a jar's filesystem can take.
#[derive(Debug)]
pub enum JarFileSystem {
    /// Exactly one root.
    Simple(SimpleFileSystem),
    /// Several roots merged under the masking predicate.
    Union(UnionFileSystem),
}

impl JarFileSystem {
    /// One root gives [`Simple`](Self::Simple), more give [`Union`](Self::Union).
    pub fn open(paths: &[Utf8PathBuf], filter: Option<PathFilter>) -> union_fs::Result<Self> {
        match paths {
            [single] => Ok(Self::Simple(SimpleFileSystem::open(single, filter)?)),
            _ => Ok(Self::Union(UnionFileSystem::new(
                filter.unwrap_or_else(accept_all),
                paths,
            )?)),
        }
    }

    /// The masking predicate, if one was supplied.
    pub fn filter(&self) -> Option<&PathFilter> {
        match self {
            Self::Simple(fs) => fs.filter(),
            Self::Union(fs) => Some(fs.filter()),
        }
    }

    fn inner(&self) -> &dyn FileSystem {
        match self {
            Self::Simple(fs) => fs,
            Self::Union(fs) => fs,
        }
    }
}

impl FileSystem for JarFileSystem {
    fn id(&self) -> FileSystemId {
        self.inner().id()
    }

    fn primary_path(&self) -> &Utf8Path {
        self.inner().primary_path()
    }

    fn read_attributes(&self, path: &LogicalPath) -> union_fs::Result<BasicAttributes> {
        self.inner().read_attributes(path)
    }

    fn read(&self, path: &LogicalPath) -> union_fs::Result<Vec<u8>> {
        self.inner().read(path)
    }

    fn open(&self, path: &LogicalPath) -> union_fs::Result<Box<dyn Read + Send>> {
        self.inner().open(path)
    }

    fn list(&self, path: &LogicalPath) -> union_fs::Result<Vec<DirEntry>> {
        self.inner().list(path)
    }

    fn locate(&self, path: &LogicalPath) -> union_fs::Result<Option<Location>> {
        self.inner().locate(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tree(files: &[(&str, &str)]) -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_single_root_is_unfiltered() {
        let (_d, path) = tree(&[("a.txt", "a"), ("hidden.txt", "h")]);
        let filter: PathFilter = Arc::new(|p: &str, _: &str| p != "hidden.txt");
        let fs = JarFileSystem::open(&[path], Some(filter)).unwrap();

        assert!(matches!(fs, JarFileSystem::Simple(_)));
        assert!(fs.filter().is_some());
        assert!(fs.exists(&fs.get_path("hidden.txt")));
        let names: Vec<String> = fs.list(&fs.root()).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["a.txt", "hidden.txt"]);
    }

    #[test]
    fn test_many_roots_are_filtered() {
        let (_a, a) = tree(&[("a.txt", "a"), ("hidden.txt", "h")]);
        let (_b, b) = tree(&[("b.txt", "b")]);
        let filter: PathFilter = Arc::new(|p: &str, _: &str| p != "hidden.txt");
        let fs = JarFileSystem::open(&[a, b], Some(filter)).unwrap();

        assert!(matches!(fs, JarFileSystem::Union(_)));
        assert!(!fs.exists(&fs.get_path("hidden.txt")));
        assert!(fs.exists(&fs.get_path("b.txt")));
    }

    #[test]
    fn test_simple_errors() {
        let (_d, path) = tree(&[("d/x.txt", "x")]);
        let fs = JarFileSystem::open(&[path.clone()], None).unwrap();
        assert!(matches!(fs.list(&fs.get_path("d/x.txt")), Err(Error::NotADirectory(_))));
        assert!(matches!(fs.read(&fs.get_path("d/y.txt")), Err(Error::NotFound(_))));
        assert!(fs.read(&fs.get_path("d")).is_err());
        assert_eq!(fs.primary_path(), path);

        let location = fs.locate(&fs.get_path("/d/x.txt")).unwrap().unwrap();
        assert_eq!(location.to_string(), format!("{path}/d/x.txt"));
        assert!(fs.locate(&fs.get_path("d/y.txt")).unwrap().is_none());
    }
}
