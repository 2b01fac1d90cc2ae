//! Priority lookup and listing merge across the root source table.
//!
//! Roots are declared lowest priority first. Lookups walk them from the last
//! declared to the first and stop at the first root where the entry both
//! exists and passes the masking predicate. A path is only visible in a root
//! if every ancestor directory passes too, tested in trailing-slash form.

use crate::attributes::BasicAttributes;
use crate::error::{Error, Result};
use crate::filesystem::{DirEntry, FileSystem, Location};
use crate::source::{join, PathFilter, RootSource};
use std::collections::BTreeMap;

pub struct OverlayResolver {
    roots: Vec<RootSource>,
    filter: PathFilter,
}

impl OverlayResolver {
    pub fn new(roots: Vec<RootSource>, filter: PathFilter) -> Self {
        Self { roots, filter }
    }

    /// Roots in declaration order (lowest priority first).
    pub fn roots(&self) -> &[RootSource] {
        &self.roots
    }

    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    fn by_priority(&self) -> impl Iterator<Item = &RootSource> {
        self.roots.iter().rev()
    }

    /// Whether every proper ancestor of `rel` is visible in a root with `identity`.
    fn ancestors_visible(&self, rel: &str, identity: &str) -> bool {
        rel.match_indices('/')
            .all(|(idx, _)| (self.filter)(&rel[..=idx], identity))
    }

    fn entry_visible(&self, rel: &str, is_dir: bool, identity: &str) -> bool {
        if rel.is_empty() {
            return true;
        }
        if is_dir {
            (self.filter)(&format!("{rel}/"), identity)
        } else {
            (self.filter)(rel, identity)
        }
    }

    /// The highest-priority root that exposes `rel`, with the entry's attributes.
    pub fn resolve(&self, rel: &str) -> Result<Option<(&RootSource, BasicAttributes)>> {
        for root in self.by_priority() {
            let identity = root.identity();
            if !self.ancestors_visible(rel, &identity) {
                continue;
            }
            let Some(attrs) = root.attributes(rel)? else {
                continue;
            };
            if self.entry_visible(rel, attrs.is_directory(), &identity) {
                return Ok(Some((root, attrs)));
            }
            tracing::trace!("'{}' masked in {}", rel, identity);
        }
        Ok(None)
    }

    /// Where the bytes of `rel` physically live, following nested overlays.
    pub fn locate(&self, rel: &str) -> Result<Option<Location>> {
        let Some((root, _)) = self.resolve(rel)? else {
            return Ok(None);
        };
        match root {
            RootSource::Union(fs) => fs.locate(&fs.get_path(rel).to_absolute()),
            other => Ok(Some(Location {
                root: other.physical_path().to_path_buf(),
                entry: rel.to_string(),
                archive: other.is_archive(),
            })),
        }
    }

    /// Merge the immediate children of directory `rel` across all roots.
    ///
    /// Each name is contributed once, by the highest-priority root whose copy
    /// survives masking. Fails with `NotFound` if no root exposes `rel`, or
    /// `NotADirectory` if the highest-priority visible entry is not a directory.
    pub fn list_children(&self, rel: &str) -> Result<Vec<DirEntry>> {
        let mut merged: BTreeMap<String, DirEntry> = BTreeMap::new();
        let mut seen_as_dir = false;

        for root in self.by_priority() {
            let identity = root.identity();
            if !self.ancestors_visible(rel, &identity) {
                continue;
            }
            let Some(attrs) = root.attributes(rel)? else {
                continue;
            };
            if !self.entry_visible(rel, attrs.is_directory(), &identity) {
                continue;
            }
            if !attrs.is_directory() {
                if !seen_as_dir {
                    return Err(Error::NotADirectory(format!("/{rel}")));
                }
                continue;
            }
            seen_as_dir = true;

            for entry in root.list(rel)? {
                if merged.contains_key(&entry.name) {
                    continue;
                }
                let child = join(rel, &entry.name);
                if self.entry_visible(&child, entry.kind.is_directory(), &identity) {
                    merged.insert(entry.name.clone(), entry);
                }
            }
        }

        if !seen_as_dir {
            return Err(Error::NotFound(format!("/{rel}")));
        }
        Ok(merged.into_values().collect())
    }
}

impl std::fmt::Debug for OverlayResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayResolver")
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::accept_all;
    use camino::Utf8PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn dir_root(files: &[(&str, &str)]) -> (TempDir, RootSource) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, RootSource::open(&path).unwrap())
    }

    #[test]
    fn test_last_root_wins() {
        let (_a, a) = dir_root(&[("x.txt", "a"), ("only_a.txt", "a")]);
        let (_b, b) = dir_root(&[("x.txt", "b")]);
        let b_id = b.identity();
        let resolver = OverlayResolver::new(vec![a, b], accept_all());

        let (root, _) = resolver.resolve("x.txt").unwrap().unwrap();
        assert_eq!(root.identity(), b_id);
        assert_eq!(root.read("x.txt").unwrap(), b"b");

        let (root, _) = resolver.resolve("only_a.txt").unwrap().unwrap();
        assert_eq!(root.read("only_a.txt").unwrap(), b"a");
        assert!(resolver.resolve("nope.txt").unwrap().is_none());
    }

    #[test]
    fn test_masked_entry_falls_back() {
        let (_a, a) = dir_root(&[("x.txt", "a")]);
        let (_b, b) = dir_root(&[("x.txt", "b")]);
        let b_id = b.identity();
        let filter: PathFilter = Arc::new(move |path: &str, source: &str| !(path == "x.txt" && source == b_id));
        let resolver = OverlayResolver::new(vec![a, b], filter);

        let (root, _) = resolver.resolve("x.txt").unwrap().unwrap();
        assert_eq!(root.read("x.txt").unwrap(), b"a");
    }

    #[test]
    fn test_masked_directory_hides_descendants() {
        let (_a, a) = dir_root(&[("hidden/deep/f.txt", "f"), ("shown/g.txt", "g")]);
        let filter: PathFilter = Arc::new(|path: &str, _: &str| path != "hidden/");
        let resolver = OverlayResolver::new(vec![a], filter);

        assert!(resolver.resolve("hidden").unwrap().is_none());
        assert!(resolver.resolve("hidden/deep/f.txt").unwrap().is_none());
        assert!(resolver.resolve("shown/g.txt").unwrap().is_some());

        let names: Vec<String> = resolver
            .list_children("")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["shown"]);
        assert!(matches!(
            resolver.list_children("hidden/deep"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_listing_merges_by_name() {
        let (_a, a) = dir_root(&[("d/one.txt", "1"), ("d/both.txt", "a")]);
        let (_b, b) = dir_root(&[("d/two.txt", "2"), ("d/both.txt", "b")]);
        let resolver = OverlayResolver::new(vec![a, b], accept_all());

        let names: Vec<String> = resolver
            .list_children("d")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["both.txt", "one.txt", "two.txt"]);
        assert!(matches!(
            resolver.list_children("d/one.txt"),
            Err(Error::NotADirectory(_))
        ));
    }

    #[test]
    fn test_locate_directory_root() {
        let (_a, a) = dir_root(&[("sub/x.txt", "x")]);
        let base = a.physical_path().to_path_buf();
        let resolver = OverlayResolver::new(vec![a], accept_all());

        let location = resolver.locate("sub/x.txt").unwrap().unwrap();
        assert_eq!(location.root, base);
        assert_eq!(location.entry, "sub/x.txt");
        assert!(!location.archive);
        assert_eq!(location.to_string(), format!("{base}/sub/x.txt"));
        assert!(resolver.locate("sub/y.txt").unwrap().is_none());
    }
}
