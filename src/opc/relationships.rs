//! Relationship parts (`.rels`)

use crate::error::{Error, Result};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use urlencoding::decode;

/// Relationships namespace
pub const RELATIONSHIPS_NAMESPACE: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships";

/// Keystore relationship type (2019/07)
pub const KEYSTORE_REL_TYPE_2019_07: &str =
    "http://schemas.microsoft.com/3dmanufacturing/2019/07/keystore";

/// Keystore relationship type (2019/04, accepted on read)
pub const KEYSTORE_REL_TYPE_2019_04: &str =
    "http://schemas.microsoft.com/3dmanufacturing/2019/04/keystore";

/// Must-preserve relationship type
pub const MUST_PRESERVE_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/mustpreserve";

/// Encrypted file relationship type
pub const ENCRYPTEDFILE_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/encryptedfile";

/// A single `<Relationship>` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Relationship id, unique within its `.rels` part
    pub id: String,
    /// Relationship type URI
    pub rel_type: String,
    /// Target part name (percent-decoded, with leading `/`)
    pub target: String,
}

impl Relationship {
    /// Create a relationship
    pub fn new(id: impl Into<String>, rel_type: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rel_type: rel_type.into(),
            target: target.into(),
        }
    }

    /// Whether this relationship points at a keystore
    pub fn is_keystore(&self) -> bool {
        self.rel_type == KEYSTORE_REL_TYPE_2019_07 || self.rel_type == KEYSTORE_REL_TYPE_2019_04
    }
}

/// Path of the `.rels` part describing `part`
///
/// `/3D/model.model` maps to `3D/_rels/model.model.rels`.
pub fn rels_path_for(part: &str) -> String {
    let part = part.strip_prefix('/').unwrap_or(part);
    match part.rsplit_once('/') {
        Some((dir, name)) => format!("{}/_rels/{}.rels", dir, name),
        None => format!("_rels/{}.rels", part),
    }
}

/// Folder that relative targets of `rels_part` resolve against
///
/// `3D/_rels/model.model.rels` describes `3D/model.model`, so its targets
/// resolve against `3D`; the package root `_rels/.rels` resolves against the
/// root.
fn source_folder(rels_part: &str) -> &str {
    let rels_part = rels_part.strip_prefix('/').unwrap_or(rels_part);
    match rels_part.rsplit_once("/_rels/") {
        Some((folder, _)) => folder,
        None => "",
    }
}

/// Turn a decoded target into an absolute part name
fn resolve_target(folder: &str, target: &str) -> String {
    if target.starts_with('/') {
        return target.to_string();
    }
    if target.contains("://") {
        // External target
        return target.to_string();
    }

    let mut segments: Vec<&str> = folder.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Parse a `.rels` part
///
/// `rels_part` is the name of the part being parsed; relative targets are
/// resolved against the folder of the part it describes.
pub fn parse_relationships(xml: &str, rels_part: &str) -> Result<Vec<Relationship>> {
    let folder = source_folder(rels_part);
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut relationships = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => {
                let name = e.name();
                let name_str = std::str::from_utf8(name.as_ref())
                    .map_err(|e| Error::InvalidXml(e.to_string()))?;

                if name_str.ends_with("Relationship") {
                    let mut id = None;
                    let mut target = None;
                    let mut rel_type = None;

                    for attr in e.attributes() {
                        let attr = attr?;
                        let key = std::str::from_utf8(attr.key.as_ref())
                            .map_err(|e| Error::InvalidXml(e.to_string()))?;
                        let value = std::str::from_utf8(&attr.value)
                            .map_err(|e| Error::InvalidXml(e.to_string()))?;

                        match key {
                            "Id" => id = Some(value.to_string()),
                            "Target" => target = Some(value.to_string()),
                            "Type" => rel_type = Some(value.to_string()),
                            _ => {}
                        }
                    }

                    let target = target.ok_or_else(|| Error::missing_attribute("Relationship", "Target"))?;
                    let rel_type = rel_type.ok_or_else(|| Error::missing_attribute("Relationship", "Type"))?;
                    if rel_type.contains('?') || rel_type.contains('#') {
                        return Err(Error::InvalidFormat(format!(
                            "Relationship Type cannot contain query string or fragment: {}",
                            rel_type
                        )));
                    }

                    // Targets are percent-encoded in XML but stored decoded in the ZIP
                    let decoded = decode(&target)
                        .map(|s| s.into_owned())
                        .unwrap_or(target);
                    let decoded = resolve_target(folder, &decoded);

                    relationships.push(Relationship {
                        id: id.unwrap_or_default(),
                        rel_type,
                        target: decoded,
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(relationships)
}

/// Serialize relationships into a `.rels` part
pub fn write_relationships(relationships: &[Relationship]) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| Error::xml_write(format!("Failed to write XML declaration: {}", e)))?;

    let mut root = BytesStart::new("Relationships");
    root.push_attribute(("xmlns", RELATIONSHIPS_NAMESPACE));
    writer
        .write_event(Event::Start(root))
        .map_err(|e| Error::xml_write(format!("Failed to write Relationships element: {}", e)))?;

    for rel in relationships {
        let mut elem = BytesStart::new("Relationship");
        elem.push_attribute(("Target", rel.target.as_str()));
        elem.push_attribute(("Id", rel.id.as_str()));
        elem.push_attribute(("Type", rel.rel_type.as_str()));
        writer
            .write_event(Event::Empty(elem))
            .map_err(|e| Error::xml_write(format!("Failed to write Relationship element: {}", e)))?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("Relationships")))
        .map_err(|e| Error::xml_write(format!("Failed to close Relationships element: {}", e)))?;

    Ok(writer.into_inner())
}
