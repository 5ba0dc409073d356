//! plugins.xml reading and writing
//!
//! Parsing goes through quick-xml's pull reader. Writing is done by hand so
//! the output layout (declaration, stylesheet instruction, two-space
//! indentation, CDATA for long text) stays stable across releases of the
//! XML crate.

use once_cell::sync::Lazy;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use thiserror::Error;

use super::record::{CatalogRecord, Field, Text, RECORD_TAG};

/// Root element of the catalog document
pub const ROOT_TAG: &str = "plugins";

const DECLARATION: &str = "<?xml version='1.0' encoding='UTF-8'?>";
const STYLESHEET_TARGET: &[u8] = b"xml-stylesheet";
const INDENT: &str = "  ";

static HREF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"href\s*=\s*["']([^"']*)["']"#).expect("valid href pattern")
});

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error(transparent)]
    Syntax(#[from] quick_xml::Error),

    #[error("CDATA in <{tag}> is not valid UTF-8")]
    Encoding { tag: String },

    #[error("root element must be <{ROOT_TAG}>, found <{0}>")]
    UnexpectedRoot(String),

    #[error("document has no <{ROOT_TAG}> element")]
    MissingRoot,
}

/// A parsed catalog document
#[derive(Debug, Default)]
pub struct Document {
    pub stylesheet: Option<String>,
    pub records: Vec<CatalogRecord>,
}

fn tag_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>, DocumentError> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        out.push((key, value));
    }
    Ok(out)
}

/// Parse a catalog document
pub fn parse(text: &str) -> Result<Document, DocumentError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut doc = Document::default();
    let mut seen_root = false;

    loop {
        match reader.read_event()? {
            Event::PI(pi) if !seen_root => {
                if pi.target() == STYLESHEET_TARGET {
                    let content = String::from_utf8_lossy(pi.content());
                    doc.stylesheet = HREF.captures(&content).map(|c| c[1].to_string());
                }
            }
            Event::Start(e) => {
                let name = tag_name(&e);
                if name != ROOT_TAG {
                    return Err(DocumentError::UnexpectedRoot(name));
                }
                seen_root = true;
                doc.records = parse_records(&mut reader)?;
            }
            Event::Empty(e) => {
                let name = tag_name(&e);
                if name != ROOT_TAG {
                    return Err(DocumentError::UnexpectedRoot(name));
                }
                seen_root = true;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(DocumentError::MissingRoot);
    }
    Ok(doc)
}

/// Read `<pyqgis_plugin>` children until the root closes
fn parse_records(reader: &mut Reader<&[u8]>) -> Result<Vec<CatalogRecord>, DocumentError> {
    let mut records = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == RECORD_TAG.as_bytes() => {
                let attrs = attributes(&e)?;
                let fields = parse_fields(reader)?;
                records.push(CatalogRecord::from_parts(attrs, fields));
            }
            Event::Empty(e) if e.name().as_ref() == RECORD_TAG.as_bytes() => {
                records.push(CatalogRecord::from_parts(attributes(&e)?, Vec::new()));
            }
            Event::Start(e) => {
                tracing::debug!(tag = %tag_name(&e), "skipping unknown catalog element");
                reader.read_to_end(e.name())?;
            }
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
    }
    Ok(records)
}

/// Read the child elements of one record
fn parse_fields(reader: &mut Reader<&[u8]>) -> Result<Vec<Field>, DocumentError> {
    let mut fields = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let tag = tag_name(&e);
                let text = parse_text(reader, &tag)?;
                fields.push(Field { tag, text });
            }
            Event::Empty(e) => fields.push(Field {
                tag: tag_name(&e),
                text: None,
            }),
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
    }
    Ok(fields)
}

/// Collect the text of a leaf element, which may be split across several
/// text and CDATA events
fn parse_text(reader: &mut Reader<&[u8]>, tag: &str) -> Result<Option<Text>, DocumentError> {
    let mut value: Option<String> = None;
    let mut literal = false;
    loop {
        match reader.read_event()? {
            Event::Text(t) => {
                value.get_or_insert_with(String::new).push_str(&t.unescape()?);
            }
            Event::CData(c) => {
                let s = std::str::from_utf8(&c).map_err(|_| DocumentError::Encoding {
                    tag: tag.to_string(),
                })?;
                value.get_or_insert_with(String::new).push_str(s);
                literal = true;
            }
            Event::Start(e) => {
                // Fields are leaves; nested markup is dropped
                reader.read_to_end(e.name())?;
            }
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
    }
    Ok(value.map(|v| if literal { Text::Literal(v) } else { Text::Plain(v) }))
}

fn cdata(value: &str) -> String {
    format!("<![CDATA[{}]]>", value.replace("]]>", "]]]]><![CDATA[>"))
}

/// Append one indented line
fn line(out: &mut String, depth: usize, text: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(text);
    out.push('\n');
}

/// Serialize a catalog document
pub fn write(stylesheet: Option<&str>, records: &[CatalogRecord]) -> String {
    let mut out = String::new();
    line(&mut out, 0, DECLARATION);
    if let Some(href) = stylesheet {
        let pi = format!("<?xml-stylesheet type=\"text/xsl\" href=\"{}\" ?>", escape(href));
        line(&mut out, 0, &pi);
    }

    if records.is_empty() {
        line(&mut out, 0, &format!("<{ROOT_TAG}/>"));
        return out;
    }

    line(&mut out, 0, &format!("<{ROOT_TAG}>"));
    for record in records {
        write_record(&mut out, record);
    }
    line(&mut out, 0, &format!("</{ROOT_TAG}>"));
    out
}

fn write_record(out: &mut String, record: &CatalogRecord) {
    let mut open = format!("<{RECORD_TAG}");
    for (key, value) in record.attributes() {
        open.push_str(&format!(" {}=\"{}\"", key, escape(value.as_str())));
    }
    if record.fields().is_empty() {
        open.push_str("/>");
        line(out, 1, &open);
        return;
    }
    open.push('>');
    line(out, 1, &open);

    for field in record.fields() {
        let tag = &field.tag;
        let element = match &field.text {
            None => format!("<{tag}/>"),
            Some(Text::Plain(v)) if v.is_empty() => format!("<{tag}/>"),
            Some(Text::Plain(v)) => format!("<{tag}>{}</{tag}>", escape(v.as_str())),
            Some(Text::Literal(v)) => format!("<{tag}>{}</{tag}>", cdata(v)),
        };
        line(out, 2, &element);
    }
    line(out, 1, &format!("</{RECORD_TAG}>"));
}
