//! Version overlay lookup for multi-release jars.
//!
//! Entries under `META-INF/versions/<N>/` replace the base entry of the same
//! relative name. For each name the table keeps the highest `N` present, and
//! only when that maximum is below the configured release version. A name
//! whose highest overlay is too new gets no redirect at all, even if a lower
//! overlay would apply.

use crate::error::Result;
use std::collections::HashMap;
use union_fs::FileSystem;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiReleaseTable {
    overrides: HashMap<String, u32>,
}

impl MultiReleaseTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Scan `prefix` on `fs`. A missing prefix directory gives an empty table.
    pub fn build(fs: &dyn FileSystem, prefix: &str, release_version: u32) -> Result<Self> {
        let versions = fs.get_path(prefix);
        if !fs.is_directory(&versions) {
            tracing::debug!("No {} directory, multi-release table is empty", prefix);
            return Ok(Self::empty());
        }
        let skip = versions.name_count();

        let mut max_versions: HashMap<String, u32> = HashMap::new();
        for path in fs.walk(&versions)? {
            if path.name_count() <= skip + 1 || fs.is_directory(&path) {
                continue;
            }
            let segments = &path.segments()[skip..];
            let Ok(version) = segments[0].parse::<u32>() else {
                tracing::warn!("Skipping {}: '{}' is not a version number", path, segments[0]);
                continue;
            };
            let name = segments[1..].join("/");
            max_versions
                .entry(name)
                .and_modify(|v| *v = (*v).max(version))
                .or_insert(version);
        }

        let overrides: HashMap<String, u32> = max_versions
            .into_iter()
            .filter(|(_, version)| *version < release_version)
            .collect();
        tracing::debug!(
            "Multi-release table: {} override(s) below release {}",
            overrides.len(),
            release_version
        );
        Ok(Self { overrides })
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.overrides.get(name).copied()
    }

    /// The name to read for `name`: `<prefix>/<version>/<name>` if overridden.
    pub fn redirect(&self, prefix: &str, name: &str) -> String {
        match self.get(name) {
            Some(version) => format!("{prefix}/{version}/{name}"),
            None => name.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.overrides.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
