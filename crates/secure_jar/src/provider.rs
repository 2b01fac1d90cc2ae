//! Service provider declarations from `META-INF/services/<service>` files.

use crate::error::Result;
use union_fs::{FileSystem, LogicalPath, PathFilter};

/// One service interface and the implementation classes declared for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub service_name: String,
    pub providers: Vec<String>,
}

impl Provider {
    /// Read a services file.
    ///
    /// Lines are trimmed; blank lines and `#` comment lines are dropped. When a
    /// filter is given, a class is kept only if the filter admits its
    /// `/`-separated form with an empty source identity.
    pub fn from_path(
        fs: &dyn FileSystem,
        path: &LogicalPath,
        filter: Option<&PathFilter>,
    ) -> Result<Self> {
        let service_name = path.file_name().unwrap_or_default().to_string();
        let content = fs.read_to_string(path)?;
        Ok(Self {
            service_name,
            providers: parse_providers(&content, filter),
        })
    }
}

fn parse_providers(content: &str, filter: Option<&PathFilter>) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|class| match filter {
            Some(f) => f(&class.replace('.', "/"), ""),
            None => true,
        })
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const SERVICES: &str = "# providers\n\
        com.example.First\n\
        \n\
        \t com.example.internal.Second  \n\
        #com.example.Disabled\n\
        com.example.Third\r\n";

    #[test]
    fn test_parse_without_filter() {
        assert_eq!(
            parse_providers(SERVICES, None),
            [
                "com.example.First",
                "com.example.internal.Second",
                "com.example.Third"
            ]
        );
    }

    #[test]
    fn test_parse_with_filter() {
        let filter: PathFilter = Arc::new(|path: &str, source: &str| {
            assert_eq!(source, "");
            !path.starts_with("com/example/internal/")
        });
        assert_eq!(
            parse_providers(SERVICES, Some(&filter)),
            ["com.example.First", "com.example.Third"]
        );
    }
}
