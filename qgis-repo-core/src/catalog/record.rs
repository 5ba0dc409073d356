//! A single plugin version in the catalog (`<pyqgis_plugin>`)
//!
//! Records keep their attributes and child elements in document order so a
//! catalog that is loaded and saved without changes keeps its shape. Typed
//! accessors read through that element list.

use std::collections::BTreeSet;

use crate::metadata;

/// Element name of a record
pub const RECORD_TAG: &str = "pyqgis_plugin";

pub const ATTR_NAME: &str = "name";
pub const ATTR_VERSION: &str = "version";

pub const FILE_NAME: &str = "file_name";
pub const DOWNLOAD_URL: &str = "download_url";
pub const ICON: &str = "icon";
pub const AUTHOR_NAME: &str = "author_name";
pub const DESCRIPTION: &str = "description";
pub const ABOUT: &str = "about";
pub const HOMEPAGE: &str = "homepage";
pub const TRACKER: &str = "tracker";
pub const REPOSITORY: &str = "repository";
pub const CHANGELOG: &str = "changelog";
pub const TAGS: &str = "tags";
pub const MIN_VERSION: &str = "qgis_minimum_version";
pub const MAX_VERSION: &str = "qgis_maximum_version";
pub const TRUSTED: &str = "trusted";
pub const DEPRECATED: &str = "deprecated";
pub const EXPERIMENTAL: &str = "experimental";
pub const SERVER: &str = "server";
pub const AUTHORIZATION_ROLE: &str = "authorization_role";
pub const CREATE_DATE: &str = "create_date";
pub const UPDATE_DATE: &str = "update_date";
pub const UPLOADED_BY: &str = "uploaded_by";
pub const DOWNLOADS: &str = "downloads";
pub const AVERAGE_VOTE: &str = "average_vote";
pub const RATING_VOTES: &str = "rating_votes";
pub const EXTERNAL_DEPENDENCIES: &str = "external_dependencies";

/// Element text, remembering how it is embedded in the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Text {
    /// Escaped character data
    Plain(String),
    /// Literal block (`<![CDATA[...]]>`), written unescaped
    Literal(String),
}

impl Text {
    /// Wrap a value the way the catalog embeds fields with this tag
    pub fn for_tag(tag: &str, value: impl Into<String>) -> Self {
        if metadata::is_long_text(tag) {
            Text::Literal(value.into())
        } else {
            Text::Plain(value.into())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Text::Plain(s) | Text::Literal(s) => s,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Text::Literal(_))
    }
}

/// A child element of a record; `None` text is an empty element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub tag: String,
    pub text: Option<Text>,
}

/// External identity used to detect duplicates during merge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordIdentity {
    pub name: String,
    pub version: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRecord {
    attributes: Vec<(String, String)>,
    fields: Vec<Field>,
}

impl CatalogRecord {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            attributes: vec![
                (ATTR_NAME.to_string(), name.into()),
                (ATTR_VERSION.to_string(), version.into()),
            ],
            fields: Vec::new(),
        }
    }

    /// Build a record from parsed parts, keeping their order
    pub fn from_parts(attributes: Vec<(String, String)>, fields: Vec<Field>) -> Self {
        Self { attributes, fields }
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attribute(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    /// Display name; empty if the attribute is missing
    pub fn name(&self) -> &str {
        self.attribute(ATTR_NAME).unwrap_or_default()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.set_attribute(ATTR_NAME, name);
    }

    /// Raw version string; empty if the attribute is missing
    pub fn version(&self) -> &str {
        self.attribute(ATTR_VERSION).unwrap_or_default()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, tag: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.tag == tag)
    }

    /// Text of a child element; `Some("")` for an empty element
    pub fn text(&self, tag: &str) -> Option<&str> {
        self.field(tag)
            .map(|f| f.text.as_ref().map(Text::as_str).unwrap_or_default())
    }

    /// Append a child element, even if one with the same tag exists
    pub fn push_field(&mut self, tag: &str, text: Option<Text>) {
        self.fields.push(Field {
            tag: tag.to_string(),
            text,
        });
    }

    /// Replace the first child element with this tag, or append one
    pub fn set_field(&mut self, tag: &str, text: Option<Text>) {
        match self.fields.iter_mut().find(|f| f.tag == tag) {
            Some(field) => field.text = text,
            None => self.push_field(tag, text),
        }
    }

    /// Copy the listed child elements from another record.
    ///
    /// Elements missing from `source` leave the local value untouched.
    pub fn overlay(&mut self, source: &CatalogRecord, tags: &[&str]) -> usize {
        let mut copied = 0;
        for tag in tags {
            if let Some(field) = source.field(tag) {
                self.set_field(tag, field.text.clone());
                copied += 1;
            }
        }
        copied
    }

    pub fn file_name(&self) -> Option<&str> {
        self.text(FILE_NAME)
    }

    pub fn download_url(&self) -> Option<&str> {
        self.text(DOWNLOAD_URL)
    }

    pub fn icon(&self) -> Option<&str> {
        self.text(ICON)
    }

    pub fn author(&self) -> Option<&str> {
        self.text(AUTHOR_NAME)
    }

    pub fn min_engine_version(&self) -> Option<&str> {
        self.text(MIN_VERSION)
    }

    pub fn max_engine_version(&self) -> Option<&str> {
        self.text(MAX_VERSION)
    }

    pub fn authorization_role(&self) -> Option<&str> {
        self.text(AUTHORIZATION_ROLE).filter(|r| !r.is_empty())
    }

    pub fn trusted(&self) -> bool {
        self.flag(TRUSTED)
    }

    pub fn deprecated(&self) -> bool {
        self.flag(DEPRECATED)
    }

    pub fn experimental(&self) -> bool {
        self.flag(EXPERIMENTAL)
    }

    pub fn server(&self) -> bool {
        self.flag(SERVER)
    }

    fn flag(&self, tag: &str) -> bool {
        self.text(tag).map(metadata::parse_flag).unwrap_or(false)
    }

    pub fn downloads(&self) -> u64 {
        self.text(DOWNLOADS)
            .and_then(|d| d.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn tags(&self) -> BTreeSet<String> {
        self.text(TAGS)
            .map(|t| {
                t.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `(name, version, file_name)`, if all three are present
    pub fn identity(&self) -> Option<RecordIdentity> {
        Some(RecordIdentity {
            name: self.attribute(ATTR_NAME)?.to_string(),
            version: self.attribute(ATTR_VERSION)?.to_string(),
            file_name: self.file_name()?.to_string(),
        })
    }
}
