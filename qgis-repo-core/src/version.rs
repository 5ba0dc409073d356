//! Dotted version normalization
//!
//! Plugin versions are compared as fixed-width strings: each dotted
//! component is right-justified to a common width so that plain byte-wise
//! comparison orders them numerically.
//!
//! ```text
//! 1.12  ->  "  1. 12.~~~.~~~"
//! 1.1   ->  "  1.  1.~~~.~~~"
//! ```
//!
//! This is a fixed-point lexical trick, not a semver comparator. Components
//! wider than the configured width are kept whole and may miscompare; use
//! [`VersionKey::strict`] where that must be reported instead.

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Default number of extra components (a version has `levels + 1` parts)
pub const DEFAULT_LEVELS: usize = 3;

/// Default width of each component
pub const DEFAULT_WIDTH: usize = 3;

/// Fill used for components that were missing from the input.
///
/// Sorts after spaces, digits and letters so that an incomplete version
/// lands after complete ones sharing its prefix.
pub const EMPTY_FILL: char = '~';

const DELIM: char = '.';

/// Options for [`normalize`]
#[derive(Debug, Clone, Copy)]
pub struct Normalize {
    pub levels: usize,
    pub width: usize,
    pub fill: char,
    pub zero_pad: bool,
}

impl Default for Normalize {
    fn default() -> Self {
        Self {
            levels: DEFAULT_LEVELS,
            width: DEFAULT_WIDTH,
            fill: ' ',
            zero_pad: false,
        }
    }
}

impl Normalize {
    /// Zero-padded mode, for versions that must compare as complete
    pub fn zero_padded() -> Self {
        Self {
            zero_pad: true,
            ..Self::default()
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("version '{version}' has component '{component}' wider than {width} characters")]
    ComponentTooWide {
        version: String,
        component: String,
        width: usize,
    },
}

/// Normalize a dotted version string for lexical comparison
pub fn normalize(version: &str, opts: Normalize) -> String {
    if version.is_empty() {
        return String::new();
    }

    let mut padded = version.to_string();
    let dots = version.matches(DELIM).count();
    if dots < opts.levels {
        let extra = if opts.zero_pad { ".0" } else { "." };
        padded.push_str(&extra.repeat(opts.levels - dots));
    }

    padded
        .split(DELIM)
        .take(opts.levels + 1)
        .map(|part| {
            let fill = if part.is_empty() { EMPTY_FILL } else { opts.fill };
            rjust(part, opts.width, fill)
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Pad a min/max engine version out to a complete `x.y.z`.
///
/// `3` becomes `3.0.0`, `3.16` becomes `3.16.0`; nothing is right-justified.
pub fn complete(version: &str) -> String {
    normalize(
        version,
        Normalize {
            levels: 2,
            width: 0,
            fill: ' ',
            zero_pad: true,
        },
    )
}

fn rjust(part: &str, width: usize, fill: char) -> String {
    let len = part.chars().count();
    if len >= width {
        return part.to_string();
    }
    let mut out = String::with_capacity(width);
    out.extend(std::iter::repeat(fill).take(width - len));
    out.push_str(part);
    out
}

/// A normalized, comparable version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionKey(String);

impl VersionKey {
    /// Build a key with the default options, tolerating wide components
    pub fn new(version: &str) -> Self {
        Self::with_options(version, Normalize::default())
    }

    pub fn with_options(version: &str, opts: Normalize) -> Self {
        if let Some(component) = wide_component(version, opts.width) {
            tracing::debug!(
                version,
                component,
                width = opts.width,
                "version component exceeds key width; ordering may be lexical"
            );
        }
        VersionKey(normalize(version, opts))
    }

    /// Build a key, failing if any component is wider than the key width
    pub fn strict(version: &str, opts: Normalize) -> Result<Self, VersionError> {
        if let Some(component) = wide_component(version, opts.width) {
            return Err(VersionError::ComponentTooWide {
                version: version.to_string(),
                component: component.to_string(),
                width: opts.width,
            });
        }
        Ok(VersionKey(normalize(version, opts)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn wide_component(version: &str, width: usize) -> Option<&str> {
    version
        .split(DELIM)
        .find(|part| part.chars().count() > width)
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compare two raw version strings by their default keys
pub fn compare(a: &str, b: &str) -> Ordering {
    VersionKey::new(a).cmp(&VersionKey::new(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_pads_components() {
        assert_eq!(normalize("1.12", Normalize::default()), "  1. 12.~~~.~~~");
        assert_eq!(normalize("1.1", Normalize::default()), "  1.  1.~~~.~~~");
        assert_eq!(normalize("1.2.3.4", Normalize::default()), "  1.  2.  3.  4");
    }

    #[test]
    fn test_normalize_empty_is_identity() {
        assert_eq!(normalize("", Normalize::default()), "");
        assert_eq!(complete(""), "");
    }

    #[test]
    fn test_zero_padded() {
        assert_eq!(normalize("2.18", Normalize::zero_padded()), "  2. 18.  0.  0");
        assert_eq!(complete("3"), "3.0.0");
        assert_eq!(complete("3.16"), "3.16.0");
        assert_eq!(complete("2.99.0"), "2.99.0");
        assert_eq!(complete("3.4.5.6"), "3.4.5");
    }

    #[test]
    fn test_numeric_ordering_same_field_count() {
        let versions = [
            "0.0.1", "0.0.9", "0.1.0", "0.2.0", "0.10.0", "0.99.0", "1.0.0", "1.2.3", "1.12.0",
            "9.0.0", "10.0.0", "99.9.9", "100.0.0", "999.999.999",
        ];
        for (i, a) in versions.iter().enumerate() {
            for (j, b) in versions.iter().enumerate() {
                assert_eq!(
                    VersionKey::new(a) <= VersionKey::new(b),
                    i <= j,
                    "{a} vs {b}"
                );
            }
        }
    }

    #[test]
    fn test_incomplete_sorts_after_complete_prefix() {
        assert!(VersionKey::new("1.0") > VersionKey::new("1.0.5"));
        assert!(VersionKey::new("1.0") < VersionKey::new("1.1"));
    }

    #[test]
    fn test_strict_rejects_wide_components() {
        let err = VersionKey::strict("1.2020.0", Normalize::default()).unwrap_err();
        assert!(matches!(err, VersionError::ComponentTooWide { ref component, .. } if component == "2020"));
        assert!(VersionKey::strict("1.202.0", Normalize::default()).is_ok());
    }

    #[test]
    fn test_compare_dev_version_after_release() {
        assert_eq!(compare("1.2-202610191200-abcdef1", "1.2"), Ordering::Greater);
        assert_eq!(compare("0.3", "1.0"), Ordering::Less);
    }
}
