//! Plugin metadata schema
//!
//! Field names here are a compatibility surface with the QGIS plugin
//! ecosystem: `metadata.txt` keys inside archives and element tags in
//! plugins.xml. Both the validator and the catalog serializer consult this
//! module, so the tag ↔ key mapping has a single source of truth.

/// Fields every metadata.txt must define with a non-empty value
pub const REQUIRED: &[&str] = &["author", "description", "name", "qgisMinimumVersion", "version"];

/// Fields required unless invalid fields are explicitly allowed
pub const RECOMMENDED: &[&str] = &["about", "repository"];

/// Fields that may be present
pub const OPTIONAL: &[&str] = &[
    "changelog",
    "deprecated",
    "email",
    "experimental",
    "external_deps",
    "homepage",
    "qgisMaximumVersion",
    "server",
    "tags",
    "tracker",
];

/// Fields coerced to booleans during validation
pub const BOOLEAN: &[&str] = &["deprecated", "experimental", "server", "trusted"];

/// Element tags emitted as literal (CDATA) text blocks
pub const LONG_TEXT: &[&str] = &[
    "about",
    "author_name",
    "changelog",
    "description",
    "homepage",
    "repository",
    "tags",
    "tracker",
    "uploaded_by",
];

/// How a manifest value is adjusted when copied into a catalog element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjust {
    /// Copied as is
    None,
    /// Padded to a complete `x.y.z` version
    EngineVersion,
    /// Lowercased, `", "` collapsed to `","`
    Tags,
}

/// Mapping from a plugins.xml element tag to its metadata.txt key
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub tag: &'static str,
    pub key: &'static str,
    pub adjust: Adjust,
}

/// Element tags whose metadata.txt key differs from the tag, or whose value
/// is adjusted on the way into the catalog. Every other tag maps to a key of
/// the same name.
pub const FIELD_MAP: &[FieldMapping] = &[
    FieldMapping {
        tag: "qgis_minimum_version",
        key: "qgisMinimumVersion",
        adjust: Adjust::EngineVersion,
    },
    FieldMapping {
        tag: "qgis_maximum_version",
        key: "qgisMaximumVersion",
        adjust: Adjust::EngineVersion,
    },
    FieldMapping {
        tag: "author_name",
        key: "author",
        adjust: Adjust::None,
    },
    FieldMapping {
        tag: "external_dependencies",
        key: "external_deps",
        adjust: Adjust::None,
    },
    FieldMapping {
        tag: "tags",
        key: "tags",
        adjust: Adjust::Tags,
    },
];

/// Resolve the metadata.txt key and adjustment for an element tag
pub fn mapping_for_tag(tag: &str) -> (&str, Adjust) {
    FIELD_MAP
        .iter()
        .find(|m| m.tag == tag)
        .map(|m| (m.key, m.adjust))
        .unwrap_or((tag, Adjust::None))
}

/// Resolve the element tag for a metadata.txt key
pub fn tag_for_key(key: &str) -> &str {
    FIELD_MAP
        .iter()
        .find(|m| m.key == key)
        .map(|m| m.tag)
        .unwrap_or(key)
}

pub fn is_boolean(key: &str) -> bool {
    BOOLEAN.contains(&key)
}

pub fn is_long_text(tag: &str) -> bool {
    LONG_TEXT.contains(&tag)
}

/// Coerce a metadata flag: case-insensitive `true` or `1`
pub fn parse_flag(value: &str) -> bool {
    let v = value.trim();
    v.eq_ignore_ascii_case("true") || v == "1"
}

/// Render a flag the way plugins.xml spells it
pub fn render_flag(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Normalize a tag list for the catalog
pub fn normalize_tags(tags: &str) -> String {
    tags.to_lowercase().replace(", ", ",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_roundtrip() {
        for m in FIELD_MAP {
            assert_eq!(mapping_for_tag(m.tag).0, m.key);
            assert_eq!(tag_for_key(m.key), m.tag);
        }
        assert_eq!(mapping_for_tag("homepage"), ("homepage", Adjust::None));
        assert_eq!(tag_for_key("homepage"), "homepage");
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("True"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("yes"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn test_normalize_tags() {
        assert_eq!(normalize_tags("Vector, WFS,GeoServer"), "vector,wfs,geoserver");
    }
}
