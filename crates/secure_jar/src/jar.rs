//! Jar assembly, version-overlay lookup and per-entry trust tracking.

use crate::cache::LazyCache;
use crate::config::JarConfig;
use crate::error::{Error, Result};
use crate::filesystem::JarFileSystem;
use crate::manifest::{Attributes, Manifest};
use crate::metadata::{JarMetadata, SimpleJarMetadata};
use crate::multi_release::MultiReleaseTable;
use crate::provider::Provider;
use crate::signature::{ArchiveScanner, JarSignatureScanner, SignerSet};
use crate::verifier::ManifestVerifier;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use union_fs::{entry_name, FileSystem, Location, LogicalPath, PathFilter};

const META_INF: &str = "META-INF";
const SERVICES_DIR: &str = "META-INF/services";
const CLASS_SUFFIX: &str = ".class";

/// Trust outcome for one entry name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    /// The jar has no security data, so nothing is ever checked.
    Unverified,
    /// The jar is signed but this entry has not been verified yet.
    NotYetChecked,
    /// Digests matched. `None` when no signer vouched for the entry.
    Verified(Option<SignerSet>),
    /// A declared digest did not match the entry's bytes.
    Invalid,
}

impl EntryStatus {
    pub fn signers(&self) -> Option<&SignerSet> {
        match self {
            Self::Verified(signers) => signers.as_ref(),
            _ => None,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }
}

/// Signer bookkeeping, always updated together under one lock.
#[derive(Debug, Default)]
struct SecurityState {
    pending: HashMap<String, SignerSet>,
    verified: HashMap<String, SignerSet>,
    status: HashMap<String, EntryStatus>,
}

impl SecurityState {
    fn has_data(&self) -> bool {
        !self.pending.is_empty() || !self.verified.is_empty()
    }
}

type DefaultManifestFn = Box<dyn FnOnce() -> Manifest>;
type MetadataFn = Box<dyn FnOnce(&Jar) -> Arc<dyn JarMetadata>>;

/// An artifact assembled from one or more directory or archive roots.
///
/// Roots are given lowest priority first. A single root is read as is;
/// several are merged into an overlay under the masking predicate.
#[derive(Debug)]
pub struct Jar {
    filesystem: JarFileSystem,
    config: JarConfig,
    manifest: Manifest,
    verifier: ManifestVerifier,
    security: Mutex<SecurityState>,
    name_overrides: MultiReleaseTable,
    is_multi_release: bool,
    packages: LazyCache<BTreeSet<String>>,
    providers: LazyCache<Vec<Provider>>,
    metadata: Arc<dyn JarMetadata>,
}

impl Jar {
    /// Assemble a jar with the default configuration and signature scanner.
    ///
    /// `default_manifest` is used when no root carries a manifest.
    /// `metadata` runs once the jar is otherwise complete.
    pub fn new<M, F>(
        default_manifest: M,
        metadata: F,
        filter: Option<PathFilter>,
        paths: &[Utf8PathBuf],
    ) -> Result<Self>
    where
        M: FnOnce() -> Manifest + 'static,
        F: FnOnce(&Jar) -> Arc<dyn JarMetadata> + 'static,
    {
        JarBuilder::new(paths.to_vec())
            .with_filter_opt(filter)
            .with_default_manifest(default_manifest)
            .with_metadata(metadata)
            .build()
    }

    /// Location of `name`, after multi-release redirection. `None` if absent.
    pub fn find_file(&self, name: &str) -> Result<Option<Location>> {
        let name = self.filesystem.get_path(name).relative_str();
        let target = self
            .name_overrides
            .redirect(&self.config.versions_prefix, &name);
        let path = self.filesystem.root().resolve_str(&target);
        Ok(self.filesystem.locate(&path)?)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Signers of the manifest itself, if it was signed.
    pub fn manifest_signers(&self) -> Option<SignerSet> {
        self.lock_security()
            .status
            .get(&self.config.manifest_name)
            .and_then(EntryStatus::signers)
            .cloned()
    }

    /// Verify `bytes` as the content of `name` and return its signers.
    ///
    /// Returns `None` for unsigned jars, invalid entries, and entries that
    /// verified without a signer. The outcome is memoized per name; later
    /// calls return it without recomputing.
    pub fn verify_and_get_signers(&self, name: &str, bytes: &[u8]) -> Result<Option<SignerSet>> {
        let mut security = self.lock_security();
        if !security.has_data() {
            return Ok(None);
        }
        if let Some(status) = security.status.get(name) {
            return Ok(status.signers().cloned());
        }

        let SecurityState {
            pending,
            verified,
            status,
        } = &mut *security;
        let state = self
            .verifier
            .verify(&self.manifest, pending, verified, name, bytes)?;

        let signers = state.signers().cloned();
        let entry = if state.is_valid() {
            EntryStatus::Verified(signers.clone())
        } else {
            tracing::debug!("{}: {} is invalid", self, name);
            EntryStatus::Invalid
        };
        status.insert(name.to_string(), entry);
        Ok(signers)
    }

    /// Read and verify the entry at `path`, returning its status.
    pub fn verify_path(&self, path: &LogicalPath) -> Result<EntryStatus> {
        let id = self.filesystem.id();
        if path.file_system() != id {
            return Err(Error::WrongFileSystem(format!(
                "'{path}' does not belong to {self}"
            )));
        }
        let name = entry_name(id, path)?;
        if self.lock_security().status.contains_key(&name) {
            return Ok(self.get_file_status(&name));
        }

        let bytes = self.filesystem.read(path)?;
        self.verify_and_get_signers(&name, &bytes)?;
        Ok(self.get_file_status(&name))
    }

    pub fn get_file_status(&self, name: &str) -> EntryStatus {
        let security = self.lock_security();
        if !security.has_data() {
            return EntryStatus::Unverified;
        }
        security
            .status
            .get(name)
            .cloned()
            .unwrap_or(EntryStatus::NotYetChecked)
    }

    /// The manifest section for `name`, unless the manifest is signed by a
    /// different number of signers than the entry.
    ///
    /// Only the signer counts are compared, not their identities.
    pub fn get_trusted_manifest_attributes(&self, name: &str) -> Option<Attributes> {
        let attrs = self.manifest.attributes(name)?;
        let security = self.lock_security();
        let Some(manifest_signers) = security
            .status
            .get(&self.config.manifest_name)
            .and_then(EntryStatus::signers)
        else {
            return Some(attrs.clone());
        };

        let entry_signers = security
            .status
            .get(name)
            .and_then(EntryStatus::signers)
            .map_or(0, SignerSet::len);
        (manifest_signers.len() == entry_signers).then(|| attrs.clone())
    }

    pub fn has_security_data(&self) -> bool {
        self.lock_security().has_data()
    }

    /// Packages holding at least one `.class` file outside `META-INF`.
    pub fn packages(&self) -> Result<&BTreeSet<String>> {
        self.packages.get_or_try_init(|| -> Result<BTreeSet<String>> {
            let fs = &self.filesystem;
            let mut packages = BTreeSet::new();
            for path in fs.walk(&fs.root())? {
                let is_class = path.name(0).is_some_and(|first| first != META_INF)
                    && path
                        .file_name()
                        .is_some_and(|file| file.ends_with(CLASS_SUFFIX));
                if !is_class || !fs.is_regular_file(&path) {
                    continue;
                }
                let package = path
                    .parent()
                    .map(|parent| parent.relative_str().replace('/', "."))
                    .unwrap_or_default();
                if !package.is_empty() {
                    packages.insert(package);
                }
            }
            tracing::debug!("{}: {} package(s)", self, packages.len());
            Ok(packages)
        })
    }

    /// Service providers declared under `META-INF/services`.
    pub fn providers(&self) -> Result<&[Provider]> {
        let providers = self.providers.get_or_try_init(|| -> Result<Vec<Provider>> {
            let fs = &self.filesystem;
            let services = fs.root().resolve_str(SERVICES_DIR);
            if !fs.exists(&services) {
                return Ok(Vec::new());
            }
            fs.walk(&services)?
                .into_iter()
                .filter(|path| !fs.is_directory(path))
                .map(|path| Provider::from_path(fs, &path, fs.filter()))
                .collect()
        })?;
        Ok(providers)
    }

    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    pub fn metadata(&self) -> &dyn JarMetadata {
        self.metadata.as_ref()
    }

    pub fn primary_path(&self) -> &Utf8Path {
        self.filesystem.primary_path()
    }

    /// The empty relative path; entries resolve against it.
    pub fn root_path(&self) -> LogicalPath {
        LogicalPath::empty(self.filesystem.id())
    }

    pub fn get_path(&self, path: &str) -> LogicalPath {
        self.filesystem.get_path(path)
    }

    pub fn filesystem(&self) -> &JarFileSystem {
        &self.filesystem
    }

    pub fn is_multi_release(&self) -> bool {
        self.is_multi_release
    }

    /// Multi-release overrides in effect, empty unless the jar is multi-release.
    pub fn name_overrides(&self) -> &MultiReleaseTable {
        &self.name_overrides
    }

    pub fn config(&self) -> &JarConfig {
        &self.config
    }

    fn lock_security(&self) -> MutexGuard<'_, SecurityState> {
        self.security.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Display for Jar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Jar[{}]", self.primary_path())
    }
}

/// Builder for [`Jar`].
///
/// ```no_run
/// use camino::Utf8PathBuf;
/// use secure_jar::JarBuilder;
///
/// # fn main() -> secure_jar::Result<()> {
/// let jar = JarBuilder::new(vec![Utf8PathBuf::from("libs/example-1.0.jar")]).build()?;
/// for package in jar.packages()? {
///     println!("{package}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct JarBuilder {
    paths: Vec<Utf8PathBuf>,
    filter: Option<PathFilter>,
    default_manifest: Option<DefaultManifestFn>,
    metadata: Option<MetadataFn>,
    config: JarConfig,
    scanner: Arc<dyn ArchiveScanner>,
}

impl JarBuilder {
    /// Start a jar over `paths`, lowest priority first. Paths that do not exist are skipped.
    pub fn new(paths: Vec<Utf8PathBuf>) -> Self {
        Self {
            paths,
            filter: None,
            default_manifest: None,
            metadata: None,
            config: JarConfig::default(),
            scanner: Arc::new(JarSignatureScanner),
        }
    }

    /// Set the masking predicate applied when several roots are merged.
    pub fn with_filter(mut self, filter: PathFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    fn with_filter_opt(mut self, filter: Option<PathFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Manifest to use when no root has one. Defaults to [`Manifest::new`].
    pub fn with_default_manifest<M>(mut self, supplier: M) -> Self
    where
        M: FnOnce() -> Manifest + 'static,
    {
        self.default_manifest = Some(Box::new(supplier));
        self
    }

    /// Compute metadata from the assembled jar. Defaults to [`SimpleJarMetadata::from_jar`].
    pub fn with_metadata<F>(mut self, metadata: F) -> Self
    where
        F: FnOnce(&Jar) -> Arc<dyn JarMetadata> + 'static,
    {
        self.metadata = Some(Box::new(metadata));
        self
    }

    pub fn with_config(mut self, config: JarConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the archive scanner that recovers manifests and signers.
    pub fn with_scanner(mut self, scanner: Arc<dyn ArchiveScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn build(self) -> Result<Jar> {
        let Self {
            paths,
            filter,
            default_manifest,
            metadata,
            config,
            scanner,
        } = self;

        let valid: Vec<Utf8PathBuf> = paths.iter().filter(|p| p.exists()).cloned().collect();
        if valid.is_empty() {
            return Err(Error::NoValidPaths(
                paths.iter().map(|p| p.to_string()).collect(),
            ));
        }

        let filesystem = JarFileSystem::open(&valid, filter)?;

        // The last declared root is scanned first.
        let mut security = SecurityState::default();
        let mut found: Option<(Manifest, &Utf8PathBuf)> = None;
        for path in valid.iter().rev() {
            if path.is_dir() {
                let manifest_file = path.join(&config.manifest_name);
                if manifest_file.is_file() {
                    found = Some((Manifest::parse(&fs::read(&manifest_file)?)?, path));
                    break;
                }
                continue;
            }

            let scan = scanner.scan(path, &config)?;
            if scan.signatures_present {
                security.pending.extend(scan.pending_signers);
                if let Some(signers) = scan.manifest_signers {
                    security
                        .verified
                        .insert(config.manifest_name.clone(), signers);
                }
                let signers = security.verified.get(&config.manifest_name).cloned();
                security
                    .status
                    .insert(config.manifest_name.clone(), EntryStatus::Verified(signers));
            }
            if let Some(manifest) = scan.manifest {
                found = Some((manifest, path));
                break;
            }
        }

        let manifest = match found {
            Some((manifest, origin)) => {
                tracing::debug!("Manifest loaded from {}", origin);
                manifest
            }
            None => {
                tracing::debug!("No manifest in {:?}, using default", valid);
                default_manifest.map_or_else(Manifest::new, |supplier| supplier())
            }
        };

        let is_multi_release = manifest.is_multi_release();
        let name_overrides = if is_multi_release {
            MultiReleaseTable::build(&filesystem, &config.versions_prefix, config.release_version)?
        } else {
            MultiReleaseTable::empty()
        };

        let mut jar = Jar {
            metadata: Arc::new(SimpleJarMetadata::from_path(filesystem.primary_path())),
            filesystem,
            config,
            manifest,
            verifier: ManifestVerifier::new(),
            security: Mutex::new(security),
            name_overrides,
            is_multi_release,
            packages: LazyCache::new(),
            providers: LazyCache::new(),
        };
        let metadata = metadata.unwrap_or_else(|| {
            Box::new(|jar: &Jar| Arc::new(SimpleJarMetadata::from_jar(jar)) as Arc<dyn JarMetadata>)
        });
        jar.metadata = metadata(&jar);

        tracing::info!(
            "Assembled {} from {} root(s), multi-release: {}, {} override(s), signed: {}",
            jar,
            valid.len(),
            jar.is_multi_release,
            jar.name_overrides.len(),
            jar.has_security_data()
        );
        Ok(jar)
    }
}

impl fmt::Debug for JarBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JarBuilder")
            .field("paths", &self.paths)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_status_signers() {
        let signers = SignerSet::new(Vec::new());
        assert_eq!(
            EntryStatus::Verified(Some(signers.clone())).signers(),
            Some(&signers)
        );
        assert_eq!(EntryStatus::Verified(None).signers(), None);
        assert_eq!(EntryStatus::Invalid.signers(), None);
        assert!(EntryStatus::Verified(None).is_verified());
        assert!(!EntryStatus::NotYetChecked.is_verified());
    }

    #[test]
    fn test_security_state_has_data() {
        let mut state = SecurityState::default();
        assert!(!state.has_data());
        state
            .verified
            .insert("a".to_string(), SignerSet::new(Vec::new()));
        assert!(state.has_data());
    }
}
