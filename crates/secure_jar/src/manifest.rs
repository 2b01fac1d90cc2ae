//! Jar manifest model and parser.
//!
//! The format is a sequence of sections separated by blank lines. The first
//! section holds the main attributes; each later section starts with a
//! `Name:` header naming the entry it describes. Headers are `Key: Value`,
//! and a line starting with a single space continues the previous value.
//! Lines end in CR, LF or CRLF.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;

pub const MANIFEST_VERSION: &str = "Manifest-Version";
pub const MULTI_RELEASE: &str = "Multi-Release";
pub const NAME: &str = "Name";

/// Maximum encoded line length, continuation lines included.
const LINE_WIDTH: usize = 72;

/// An ordered set of manifest headers with case-insensitive keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: Vec<(String, String)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Insert or replace `key`. An existing key keeps its original spelling.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn merge(&mut self, other: Attributes) {
        for (k, v) in other.entries {
            self.insert(k, v);
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut attrs = Attributes::new();
        for (k, v) in iter {
            attrs.insert(k, v);
        }
        attrs
    }
}

/// A parsed manifest: main attributes plus per-entry sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    main: Attributes,
    entries: BTreeMap<String, Attributes>,
    raw_main: Vec<u8>,
    raw_sections: BTreeMap<String, Vec<u8>>,
}

impl Manifest {
    /// An empty manifest carrying only `Manifest-Version: 1.0`.
    pub fn new() -> Self {
        let mut manifest = Self::default();
        manifest.main.insert(MANIFEST_VERSION, "1.0");
        manifest
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut manifest = Manifest::default();
        let mut first = true;

        for section in split_sections(bytes) {
            let attrs = parse_headers(section.lines)?;
            if first {
                first = false;
                manifest.main = attrs;
                manifest.raw_main = section.raw.to_vec();
                continue;
            }
            if attrs.is_empty() {
                continue;
            }
            let Some(name) = attrs.get(NAME).map(str::to_string) else {
                return Err(Error::InvalidManifest(
                    "entry section without a Name header".to_string(),
                ));
            };
            let mut attrs = attrs;
            attrs.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(NAME));

            manifest
                .raw_sections
                .entry(name.clone())
                .or_default()
                .extend_from_slice(section.raw);
            manifest.entries.entry(name).or_default().merge(attrs);
        }

        Ok(manifest)
    }

    pub fn main_attributes(&self) -> &Attributes {
        &self.main
    }

    pub fn main_attributes_mut(&mut self) -> &mut Attributes {
        &mut self.main
    }

    /// Attributes of the section for `name`, if the manifest has one.
    pub fn attributes(&self, name: &str) -> Option<&Attributes> {
        self.entries.get(name)
    }

    pub fn entries(&self) -> &BTreeMap<String, Attributes> {
        &self.entries
    }

    /// Add (or merge into) the section for `name`.
    pub fn insert_entry(&mut self, name: impl Into<String>, attrs: Attributes) {
        self.entries.entry(name.into()).or_default().merge(attrs);
    }

    /// `Multi-Release: true`, compared case-insensitively.
    pub fn is_multi_release(&self) -> bool {
        self.main
            .get(MULTI_RELEASE)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    /// The bytes the main section was parsed from, terminating blank line included.
    pub fn raw_main_section(&self) -> &[u8] {
        &self.raw_main
    }

    /// The bytes the section for `name` was parsed from, terminating blank line included.
    pub fn raw_section(&self, name: &str) -> Option<&[u8]> {
        self.raw_sections.get(name).map(Vec::as_slice)
    }

    /// Encode in the manifest format with `\r\n` line endings and 72-byte lines.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (k, v) in self.main.iter() {
            write_header(&mut out, k, v);
        }
        out.extend_from_slice(b"\r\n");
        for (name, attrs) in &self.entries {
            write_header(&mut out, NAME, name);
            for (k, v) in attrs.iter() {
                write_header(&mut out, k, v);
            }
            out.extend_from_slice(b"\r\n");
        }
        out
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}

fn write_header(out: &mut Vec<u8>, key: &str, value: &str) {
    let line = format!("{key}: {value}");
    let bytes = line.as_bytes();
    let mut start = 0;
    let mut width = LINE_WIDTH;
    while bytes.len() - start > width {
        let mut end = start + width;
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        out.extend_from_slice(&bytes[start..end]);
        out.extend_from_slice(b"\r\n ");
        start = end;
        width = LINE_WIDTH - 1;
    }
    out.extend_from_slice(&bytes[start..]);
    out.extend_from_slice(b"\r\n");
}

struct Section<'a> {
    lines: Vec<&'a [u8]>,
    raw: &'a [u8],
}

/// Split into lines on CR, LF or CRLF. Each line comes without its terminator,
/// paired with the offset just past the terminator.
fn lines(bytes: &[u8]) -> Vec<(&[u8], usize)> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                out.push((&bytes[start..i], i + 1));
                i += 1;
                start = i;
            }
            b'\r' => {
                let end = if bytes.get(i + 1) == Some(&b'\n') { i + 2 } else { i + 1 };
                out.push((&bytes[start..i], end));
                i = end;
                start = i;
            }
            _ => i += 1,
        }
    }
    if start < bytes.len() {
        out.push((&bytes[start..], bytes.len()));
    }
    out
}

fn split_sections(bytes: &[u8]) -> Vec<Section<'_>> {
    let mut sections = Vec::new();
    let mut current: Vec<&[u8]> = Vec::new();
    let mut section_start = 0;

    for (line, end) in lines(bytes) {
        if line.is_empty() {
            sections.push(Section {
                lines: std::mem::take(&mut current),
                raw: &bytes[section_start..end],
            });
            section_start = end;
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() || sections.is_empty() {
        sections.push(Section {
            lines: current,
            raw: &bytes[section_start..],
        });
    }
    sections
}

fn flush_header(attrs: &mut Attributes, header: Option<(String, Vec<u8>)>) -> Result<()> {
    if let Some((key, value)) = header {
        let value = String::from_utf8(value)
            .map_err(|_| Error::InvalidManifest(format!("value of {key} is not UTF-8")))?;
        attrs.insert(key, value);
    }
    Ok(())
}

fn parse_headers(lines: Vec<&[u8]>) -> Result<Attributes> {
    let mut attrs = Attributes::new();
    let mut last: Option<(String, Vec<u8>)> = None;

    for line in lines {
        if let Some(rest) = line.strip_prefix(b" ") {
            match last.as_mut() {
                Some((_, value)) => value.extend_from_slice(rest),
                None => {
                    return Err(Error::InvalidManifest(
                        "continuation line without a header".to_string(),
                    ))
                }
            }
            continue;
        }

        let Some(colon) = line.windows(2).position(|w| w == b": ") else {
            return Err(Error::InvalidManifest(format!(
                "invalid header line: {}",
                String::from_utf8_lossy(line)
            )));
        };
        let key = &line[..colon];
        if key.is_empty()
            || !key
                .iter()
                .all(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_')
        {
            return Err(Error::InvalidManifest(format!(
                "invalid header name: {}",
                String::from_utf8_lossy(key)
            )));
        }
        flush_header(&mut attrs, last.take())?;
        last = Some((
            String::from_utf8_lossy(key).into_owned(),
            line[colon + 2..].to_vec(),
        ));
    }
    flush_header(&mut attrs, last.take())?;
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Manifest-Version: 1.0\r\n\
        Multi-Release: TRUE\r\n\
        Created-By: test\r\n\
        \r\n\
        Name: com/example/A.class\r\n\
        SHA-256-Digest: abc=\r\n\
        \r\n\
        Name: com/example/a-very-long-name-that-is-continued/onto-the-next-li\r\n \
        ne/B.class\r\n\
        SHA-256-Digest: def=\r\n\
        \r\n";

    #[test]
    fn test_parse_sections() {
        let manifest = Manifest::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(manifest.main_attributes().get("manifest-version"), Some("1.0"));
        assert!(manifest.is_multi_release());
        assert_eq!(manifest.entries().len(), 2);

        let a = manifest.attributes("com/example/A.class").unwrap();
        assert_eq!(a.get("SHA-256-Digest"), Some("abc="));
        assert_eq!(a.get(NAME), None);

        let long = "com/example/a-very-long-name-that-is-continued/onto-the-next-line/B.class";
        assert_eq!(manifest.attributes(long).unwrap().get("sha-256-digest"), Some("def="));
    }

    #[test]
    fn test_raw_sections_keep_terminator() {
        let manifest = Manifest::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(
            manifest.raw_section("com/example/A.class").unwrap(),
            b"Name: com/example/A.class\r\nSHA-256-Digest: abc=\r\n\r\n"
        );
        assert!(manifest.raw_main_section().starts_with(b"Manifest-Version"));
        assert!(manifest.raw_main_section().ends_with(b"\r\n\r\n"));
    }

    #[test]
    fn test_line_endings() {
        for text in [
            "Manifest-Version: 1.0\nA: b\n\nName: x\nK: v\n",
            "Manifest-Version: 1.0\rA: b\r\rName: x\rK: v\r",
            "Manifest-Version: 1.0\r\nA: b\r\n\r\nName: x\r\nK: v",
        ] {
            let manifest = Manifest::parse(text.as_bytes()).unwrap();
            assert_eq!(manifest.main_attributes().get("A"), Some("b"), "{text:?}");
            assert_eq!(manifest.attributes("x").unwrap().get("K"), Some("v"));
        }
    }

    #[test]
    fn test_multi_release_flag() {
        let mut manifest = Manifest::new();
        assert!(!manifest.is_multi_release());
        manifest.main_attributes_mut().insert(MULTI_RELEASE, "yes");
        assert!(!manifest.is_multi_release());
        manifest.main_attributes_mut().insert("multi-release", "True");
        assert!(manifest.is_multi_release());
        assert_eq!(manifest.main_attributes().len(), 2);
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(
            Manifest::parse(b"Manifest-Version 1.0\r\n"),
            Err(Error::InvalidManifest(_))
        ));
        assert!(matches!(
            Manifest::parse(b" continued\r\n"),
            Err(Error::InvalidManifest(_))
        ));
        assert!(matches!(
            Manifest::parse(b"Manifest-Version: 1.0\r\n\r\nKey: no-name\r\n"),
            Err(Error::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_encode_wraps_long_lines() {
        let mut manifest = Manifest::new();
        let name = "a/".repeat(60) + "Z.class";
        manifest.insert_entry(
            name.clone(),
            Attributes::from_iter([("SHA-256-Digest", "xyz=")]),
        );
        let bytes = manifest.to_bytes();
        for line in bytes.split(|b| *b == b'\n') {
            assert!(line.len() <= LINE_WIDTH + 1, "{}", String::from_utf8_lossy(line));
        }
        let parsed = Manifest::parse(&bytes).unwrap();
        assert_eq!(parsed.attributes(&name).unwrap().get("SHA-256-Digest"), Some("xyz="));
    }

    #[test]
    fn test_empty_input() {
        let manifest = Manifest::parse(b"").unwrap();
        assert!(manifest.main_attributes().is_empty());
        assert!(manifest.entries().is_empty());
    }
}
