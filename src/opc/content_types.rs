//! `[Content_Types].xml` parsing and writing

use crate::error::{Error, Result};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};

/// Content types namespace
pub const CONTENT_TYPES_NAMESPACE: &str =
    "http://schemas.openxmlformats.org/package/2006/content-types";

/// Relationships content type
pub const RELATIONSHIPS_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-package.relationships+xml";

/// Keystore content type
pub const KEYSTORE_CONTENT_TYPE: &str = "application/vnd.ms-package.3dmanufacturing-keystore+xml";

/// Default and override content type declarations of a package
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentTypes {
    /// `(extension, content type)` pairs
    pub defaults: Vec<(String, String)>,
    /// `(part name, content type)` pairs; part names carry a leading `/`
    pub overrides: Vec<(String, String)>,
}

impl ContentTypes {
    /// Declare a content type for an extension; an existing entry is kept
    pub fn add_default(&mut self, extension: &str, content_type: &str) {
        if !self
            .defaults
            .iter()
            .any(|(e, _)| e.eq_ignore_ascii_case(extension))
        {
            self.defaults
                .push((extension.to_string(), content_type.to_string()));
        }
    }

    /// Declare a content type for one part, replacing an existing override
    pub fn add_override(&mut self, part_name: &str, content_type: &str) {
        let part_name = if part_name.starts_with('/') {
            part_name.to_string()
        } else {
            format!("/{}", part_name)
        };
        self.overrides.retain(|(p, _)| *p != part_name);
        self.overrides.push((part_name, content_type.to_string()));
    }

    /// Content type of a part: override first, then extension default
    pub fn lookup(&self, path: &str) -> Option<&str> {
        let path = path.strip_prefix('/').unwrap_or(path);
        if let Some((_, ct)) = self
            .overrides
            .iter()
            .find(|(p, _)| p.strip_prefix('/').unwrap_or(p) == path)
        {
            return Some(ct.as_str());
        }
        let extension = path.rsplit_once('.').map(|(_, ext)| ext)?;
        self.defaults
            .iter()
            .find(|(e, _)| e.eq_ignore_ascii_case(extension))
            .map(|(_, ct)| ct.as_str())
    }

    /// Parse `[Content_Types].xml`
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        let mut types = ContentTypes::default();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => {
                    let name = e.name();
                    let name_str = std::str::from_utf8(name.as_ref())
                        .map_err(|e| Error::InvalidXml(e.to_string()))?;

                    let is_default = name_str.ends_with("Default");
                    let is_override = name_str.ends_with("Override");

                    if is_default || is_override {
                        let mut key_value = None;
                        let mut content_type = None;
                        for attr in e.attributes() {
                            let attr = attr?;
                            let key = std::str::from_utf8(attr.key.as_ref())
                                .map_err(|e| Error::InvalidXml(e.to_string()))?;
                            let value = std::str::from_utf8(&attr.value)
                                .map_err(|e| Error::InvalidXml(e.to_string()))?;

                            match key {
                                "Extension" if is_default => key_value = Some(value.to_string()),
                                "PartName" if is_override => key_value = Some(value.to_string()),
                                "ContentType" => content_type = Some(value.to_string()),
                                _ => {}
                            }
                        }

                        if let (Some(k), Some(ct)) = (key_value, content_type) {
                            if is_default {
                                types.defaults.push((k, ct));
                            } else {
                                types.overrides.push((k, ct));
                            }
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(Error::Xml(e)),
                _ => {}
            }
            buf.clear();
        }

        Ok(types)
    }

    /// Serialize to `[Content_Types].xml`
    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| Error::xml_write(format!("Failed to write XML declaration: {}", e)))?;

        let mut root = BytesStart::new("Types");
        root.push_attribute(("xmlns", CONTENT_TYPES_NAMESPACE));
        writer
            .write_event(Event::Start(root))
            .map_err(|e| Error::xml_write(format!("Failed to write Types element: {}", e)))?;

        for (extension, content_type) in &self.defaults {
            let mut elem = BytesStart::new("Default");
            elem.push_attribute(("Extension", extension.as_str()));
            elem.push_attribute(("ContentType", content_type.as_str()));
            writer
                .write_event(Event::Empty(elem))
                .map_err(|e| Error::xml_write(format!("Failed to write Default element: {}", e)))?;
        }

        for (part_name, content_type) in &self.overrides {
            let mut elem = BytesStart::new("Override");
            elem.push_attribute(("PartName", part_name.as_str()));
            elem.push_attribute(("ContentType", content_type.as_str()));
            writer
                .write_event(Event::Empty(elem))
                .map_err(|e| Error::xml_write(format!("Failed to write Override element: {}", e)))?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("Types")))
            .map_err(|e| Error::xml_write(format!("Failed to close Types element: {}", e)))?;

        Ok(writer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_prefers_override() {
        let mut types = ContentTypes::default();
        types.add_default("xml", "application/xml");
        types.add_override("Secure/keystore.xml", KEYSTORE_CONTENT_TYPE);
        assert_eq!(types.lookup("/Secure/keystore.xml"), Some(KEYSTORE_CONTENT_TYPE));
        assert_eq!(types.lookup("Metadata/info.XML"), Some("application/xml"));
        assert_eq!(types.lookup("3D/model.bin"), None);
    }

    #[test]
    fn test_serialize_and_parse() {
        let mut types = ContentTypes::default();
        types.add_default("rels", RELATIONSHIPS_CONTENT_TYPE);
        types.add_default("RELS", "ignored/duplicate");
        types.add_override("/Secure/keystore.xml", KEYSTORE_CONTENT_TYPE);
        let xml = String::from_utf8(types.to_xml().unwrap()).unwrap();
        assert!(xml.contains("Extension=\"rels\""));
        assert_eq!(ContentTypes::parse(&xml).unwrap(), types);
    }
}
