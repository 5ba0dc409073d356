//! The plugin catalog (plugins.xml)
//!
//! # Overview
//!
//! The catalog lists every published plugin version with the metadata a
//! QGIS client needs to offer it for install:
//! - [`CatalogRecord`]: one `<pyqgis_plugin>` element
//! - [`CatalogStore`]: the whole document, with lookup, sort and merge
//!
//! ```text
//! plugins.xml
//!     │
//!     ├── <?xml-stylesheet href="plugins.xsl"?>
//!     └── <plugins>
//!            └── <pyqgis_plugin name=".." version="..">  ← CatalogRecord
//! ```

pub mod record;
mod store;
mod xml;

pub use record::{CatalogRecord, Field, RecordIdentity, Text};
pub use store::{CatalogStore, VersionSelector, DEFAULT_STYLESHEET};
pub use xml::DocumentError;
