//! Jar handling configuration.

use crate::error::Result;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;

/// Environment variable that overrides [`JarConfig::release_version`].
pub const RELEASE_VERSION_ENV: &str = "SECURE_JAR_RELEASE_VERSION";

pub const DEFAULT_RELEASE_VERSION: u32 = 21;
pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";
pub const VERSIONS_PREFIX: &str = "META-INF/versions";

/// Settings that shape jar assembly, usually read from a `secure_jar.toml`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct JarConfig {
    /// Platform feature version that multi-release overlays are compared against.
    pub release_version: u32,
    /// Location of the manifest inside each root.
    pub manifest_name: String,
    /// Directory holding `<N>/...` version overlays.
    pub versions_prefix: String,
}

impl Default for JarConfig {
    fn default() -> Self {
        Self {
            release_version: DEFAULT_RELEASE_VERSION,
            manifest_name: MANIFEST_NAME.to_string(),
            versions_prefix: VERSIONS_PREFIX.to_string(),
        }
    }
}

impl JarConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Apply `SECURE_JAR_RELEASE_VERSION` if it is set to a number.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = env::var(RELEASE_VERSION_ENV) {
            match value.trim().parse() {
                Ok(version) => self.release_version = version,
                Err(_) => tracing::warn!(
                    "Ignoring {}={:?}: not a version number",
                    RELEASE_VERSION_ENV,
                    value
                ),
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn test_defaults() {
        let cfg = JarConfig::default();
        assert_eq!(cfg.release_version, 21);
        assert_eq!(cfg.manifest_name, "META-INF/MANIFEST.MF");
        assert_eq!(cfg.versions_prefix, "META-INF/versions");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = JarConfig::from_toml_str("release_version = 17\n").unwrap();
        assert_eq!(cfg.release_version, 17);
        assert_eq!(cfg.manifest_name, MANIFEST_NAME);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(JarConfig::from_toml_str("release_version = \"x\"").is_err());
    }

    #[test]
    fn test_load_and_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("secure_jar.toml")).unwrap();

        assert_eq!(JarConfig::load(&path).unwrap(), JarConfig::default());

        let cfg = JarConfig {
            release_version: 11,
            ..JarConfig::default()
        };
        std::fs::write(&path, toml::to_string_pretty(&cfg).unwrap()).unwrap();
        assert_eq!(JarConfig::load(&path).unwrap(), cfg);
    }
}
