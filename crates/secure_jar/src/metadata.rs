//! Artifact name and version.

use camino::Utf8Path;

/// Identity of an assembled jar.
pub trait JarMetadata: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn version(&self) -> Option<&str>;
}

/// Name and version derived from a file name such as `name-1.2.3.jar`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleJarMetadata {
    name: String,
    version: Option<String>,
}

impl SimpleJarMetadata {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Split the file stem at the first `-` that is followed by a digit.
    ///
    /// `guava-31.1-jre.jar` gives `guava` / `31.1-jre`; a stem without such a
    /// dash is all name.
    pub fn from_path(path: &Utf8Path) -> Self {
        let file_name = path.file_name().unwrap_or(path.as_str());
        let stem = match file_name.len().checked_sub(4) {
            Some(at) if file_name[at..].eq_ignore_ascii_case(".jar") => &file_name[..at],
            _ => file_name,
        };

        let split = stem
            .char_indices()
            .find(|&(i, c)| c == '-' && stem[i + 1..].starts_with(|n: char| n.is_ascii_digit()))
            .map(|(i, _)| i);

        match split {
            Some(i) if i > 0 => Self::new(&stem[..i], Some(stem[i + 1..].to_string())),
            _ => Self::new(stem, None),
        }
    }

    /// Metadata for a jar, derived from its primary path.
    pub fn from_jar(jar: &crate::Jar) -> Self {
        Self::from_path(jar.primary_path())
    }
}

impl JarMetadata for SimpleJarMetadata {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        let cases = [
            ("libs/name-1.2.3.jar", "name", Some("1.2.3")),
            ("guava-31.1-jre.jar", "guava", Some("31.1-jre")),
            ("my-lib-2.0.JAR", "my-lib", Some("2.0")),
            ("plain.jar", "plain", None),
            ("build/classes", "classes", None),
            ("-1.0.jar", "-1.0", None),
        ];
        for (path, name, version) in cases {
            let meta = SimpleJarMetadata::from_path(Utf8Path::new(path));
            assert_eq!(meta.name(), name, "{path}");
            assert_eq!(meta.version(), version, "{path}");
        }
    }
}
