//! metadata.txt parsing and in-place rewriting
//!
//! metadata.txt is an INI document with a `[general]` section. Parsing
//! follows the conventions QGIS plugin authors rely on:
//!
//! - `key = value` or `key: value`, keys are case-preserving
//! - indented lines continue the previous value (joined with `\n`)
//! - lines starting with `#` or `;` are comments, as is ` ;…` after a value
//!
//! Rewriting never re-serializes the parsed document. It substitutes a
//! single `key = value` line in the original bytes so comments and layout
//! survive for the downstream ecosystem.

use regex::bytes::{Captures, Regex};
use thiserror::Error;

/// Section holding plugin metadata
pub const GENERAL_SECTION: &str = "general";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("File contains no section headers (line {line})")]
    MissingSectionHeader { line: usize },

    #[error("Line {line} is not a key/value pair: {content:?}")]
    Malformed { line: usize, content: String },
}

/// A parsed INI document, sections and keys in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl Manifest {
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let mut manifest = Manifest::default();
        let mut current_key: Option<String> = None;

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim_end();

            if line.trim().is_empty() {
                current_key = None;
                continue;
            }
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            // Continuation of the previous value
            if line.starts_with(|c: char| c == ' ' || c == '\t') {
                if let (Some(key), Some((_, entries))) =
                    (current_key.as_ref(), manifest.sections.last_mut())
                {
                    if let Some((_, value)) = entries.iter_mut().find(|(k, _)| k == key) {
                        value.push('\n');
                        value.push_str(trimmed);
                        continue;
                    }
                }
            }

            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                let name = trimmed[1..trimmed.len() - 1].trim().to_string();
                manifest.sections.push((name, Vec::new()));
                current_key = None;
                continue;
            }

            let Some((_, entries)) = manifest.sections.last_mut() else {
                return Err(ManifestError::MissingSectionHeader { line: line_no });
            };

            let Some(sep) = trimmed.find(|c: char| c == '=' || c == ':') else {
                return Err(ManifestError::Malformed {
                    line: line_no,
                    content: trimmed.to_string(),
                });
            };
            let key = trimmed[..sep].trim().to_string();
            if key.is_empty() {
                return Err(ManifestError::Malformed {
                    line: line_no,
                    content: trimmed.to_string(),
                });
            }
            let value = strip_inline_comment(trimmed[sep + 1..].trim()).to_string();

            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some((_, existing)) => *existing = value,
                None => entries.push((key.clone(), value)),
            }
            current_key = Some(key);
        }

        Ok(manifest)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.iter().any(|(n, _)| n == name)
    }

    /// Key/value pairs of a section in file order
    pub fn items(&self, section: &str) -> Option<&[(String, String)]> {
        self.sections
            .iter()
            .find(|(n, _)| n == section)
            .map(|(_, entries)| entries.as_slice())
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.items(section)?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b';' && i > 0 && bytes[i - 1].is_ascii_whitespace() {
            return value[..i].trim_end();
        }
    }
    value
}

/// Replace the value of a single `key = old` line in raw metadata.txt bytes.
///
/// Only a whole line whose value equals `old` matches; leading indentation,
/// the separator, an inline ` ;` comment and trailing whitespace are kept.
/// Returns `None` when no such line exists.
pub fn replace_value(raw: &[u8], key: &str, old: &str, new: &str) -> Option<Vec<u8>> {
    let pattern = format!(
        r"(?m)^([ \t]*{}[ \t]*[=:][ \t]*){}((?:[ \t]+;[^\r\n]*)?[ \t]*\r?)$",
        regex::escape(key),
        regex::escape(old)
    );
    let re = Regex::new(&pattern).ok()?;
    if !re.is_match(raw) {
        return None;
    }
    let replaced = re.replacen(raw, 1, |caps: &Captures| {
        let mut out = caps[1].to_vec();
        out.extend_from_slice(new.as_bytes());
        out.extend_from_slice(&caps[2]);
        out
    });
    Some(replaced.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA: &str = "\
# This file contains metadata for your plugin.
[general]
name=GeoServer Explorer
qgisMinimumVersion = 2.8
description: Browse GeoServer catalogs
version=1.0
author=Boundless
about=A longer description
    spanning two lines
tags=WFS, WMS ; indexed by the hub
experimental=False
";

    #[test]
    fn test_parse_general_section() {
        let m = Manifest::parse(METADATA).unwrap();
        assert!(m.has_section(GENERAL_SECTION));
        assert_eq!(m.get("general", "name"), Some("GeoServer Explorer"));
        assert_eq!(m.get("general", "qgisMinimumVersion"), Some("2.8"));
        assert_eq!(m.get("general", "description"), Some("Browse GeoServer catalogs"));
        assert_eq!(
            m.get("general", "about"),
            Some("A longer description\nspanning two lines")
        );
        assert_eq!(m.get("general", "tags"), Some("WFS, WMS"));
        assert_eq!(m.items("general").unwrap()[0].0, "name");
    }

    #[test]
    fn test_parse_requires_section_header() {
        let err = Manifest::parse("name=foo\n").unwrap_err();
        assert_eq!(err, ManifestError::MissingSectionHeader { line: 1 });
    }

    #[test]
    fn test_parse_rejects_garbage_line() {
        let err = Manifest::parse("[general]\nnot a pair\n").unwrap_err();
        assert!(matches!(err, ManifestError::Malformed { line: 2, .. }));
    }

    #[test]
    fn test_replace_value_preserves_layout() {
        let out = replace_value(METADATA.as_bytes(), "version", "1.0", "1.0-202401011200").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\nversion=1.0-202401011200\n"));
        assert!(text.starts_with("# This file contains metadata"));
        assert!(text.contains("qgisMinimumVersion = 2.8"));
    }

    #[test]
    fn test_replace_value_matches_whole_line_only() {
        let raw = b"[general]\nname=Foo\nauthor_name=Foo\n";
        let out = replace_value(raw, "name", "Foo", "Foo DEV").unwrap();
        assert_eq!(out, b"[general]\nname=Foo DEV\nauthor_name=Foo\n".to_vec());
        assert!(replace_value(raw, "name", "Bar", "Bar DEV").is_none());
    }

    #[test]
    fn test_replace_value_keeps_inline_comment() {
        let raw = b"[general]\nname=Foo ; display name\r\n";
        let out = replace_value(raw, "name", "Foo", "Foo BETA").unwrap();
        assert_eq!(out, b"[general]\nname=Foo BETA ; display name\r\n".to_vec());
    }

    #[test]
    fn test_replace_value_escapes_regex_metacharacters() {
        let raw = b"[general]\nversion = 1.2\nother=1x2\n";
        let out = replace_value(raw, "version", "1.2", "1.2-1").unwrap();
        assert_eq!(out, b"[general]\nversion = 1.2-1\nother=1x2\n".to_vec());
    }
}
