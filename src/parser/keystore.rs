//! Keystore manifest parsing
//!
//! Turns `Secure/keystore.xml` into a [`KeyStore`]. Structural rules of the
//! SecureContent extension are checked here; whether the referenced parts
//! exist is checked by the package reader, which knows the archive.

use crate::error::{Error, Result};
use crate::model::secure_content::{VALID_DIGEST_METHODS, VALID_MGF_ALGORITHMS};
use crate::model::{
    AccessRight, CEKParams, Compression, Consumer, EncryptionAlgorithm, KEKParams, KeyStore,
    ResourceData, ResourceDataGroup, WrappingAlgorithm,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;

use super::get_local_name;

/// Default buffer capacity for XML parsing (4KB)
const XML_BUFFER_CAPACITY: usize = 4096;

/// Parse a keystore manifest
///
/// Checks performed while parsing:
/// - algorithm, MGF and digest URIs are known
/// - consumer ids are unique and access rights point at existing consumers
/// - resource data sits inside a group and its path is unique and not an
///   OPC relationship part
/// - IV and tag lengths match the content encryption algorithm
///
/// # Example
///
/// ```
/// use lib3mf_securecontent::parser::parse_keystore;
///
/// let xml = r#"<keystore xmlns="http://schemas.microsoft.com/3dmanufacturing/securecontent/2019/07"
///     UUID="b7aa9c5b-4a37-4a1f-9c5e-1b6f4c7d0a11">
///   <consumer consumerid="C1"/>
/// </keystore>"#;
/// let keystore = parse_keystore(xml).unwrap();
/// assert_eq!(keystore.consumers().len(), 1);
/// assert!(keystore.is_empty());
/// ```
pub fn parse_keystore(xml: &str) -> Result<KeyStore> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::with_capacity(XML_BUFFER_CAPACITY);
    let mut state = ParseState::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                state.start(e)?;
            }
            Ok(Event::Empty(ref e)) => {
                // Self-closing: open and close in one step
                let local_name = state.start(e)?;
                state.end(&local_name)?;
            }
            Ok(Event::Text(ref e)) => {
                let text = std::str::from_utf8(e).map_err(|e| Error::InvalidXml(e.to_string()))?;
                state.text_buffer.push_str(text);
            }
            Ok(Event::End(ref e)) => {
                let name = e.name();
                let name_str = std::str::from_utf8(name.as_ref())
                    .map_err(|e| Error::InvalidXml(e.to_string()))?;
                state.end(get_local_name(name_str))?;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::InvalidXml(format!(
                    "Error parsing keystore.xml: {}",
                    e
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    state.finish()
}

/// Nesting state of the keystore event loop
#[derive(Default)]
struct ParseState {
    keystore: KeyStore,
    seen_keystore: bool,
    current_consumer: Option<Consumer>,
    current_group: Option<usize>,
    current_access_right: Option<AccessRight>,
    current_resource_data: Option<ResourceData>,
    text_buffer: String,
}

impl ParseState {
    /// Handle an opening tag, returning its local name
    fn start(&mut self, e: &BytesStart) -> Result<String> {
        let name = e.name();
        let name_str =
            std::str::from_utf8(name.as_ref()).map_err(|e| Error::InvalidXml(e.to_string()))?;
        let local_name = get_local_name(name_str).to_string();

        match local_name.as_str() {
            "keystore" => {
                let attrs = read_attributes(e, "keystore")?;
                let uuid = attrs
                    .get("UUID")
                    .ok_or_else(|| Error::missing_attribute("keystore", "UUID"))?;
                self.keystore.set_uuid(uuid.as_str());
                self.seen_keystore = true;
            }
            "consumer" => {
                let mut attrs = read_attributes(e, "consumer")?;
                let consumer_id = attrs
                    .remove("consumerid")
                    .ok_or_else(|| Error::missing_attribute("consumer", "consumerid"))?;
                let mut consumer = Consumer::new(consumer_id);
                consumer.key_id = attrs.remove("keyid");
                self.current_consumer = Some(consumer);
            }
            "resourcedatagroup" => {
                let mut attrs = read_attributes(e, "resourcedatagroup")?;
                let key_uuid = attrs
                    .remove("keyuuid")
                    .ok_or_else(|| Error::missing_attribute("resourcedatagroup", "keyuuid"))?;
                if self.keystore.find_group(&key_uuid).is_some() {
                    return Err(Error::DuplicateResource(format!(
                        "resource data group '{}'",
                        key_uuid
                    )));
                }
                let index = self
                    .keystore
                    .push_loaded_group(ResourceDataGroup::loaded(key_uuid));
                self.current_group = Some(index);
            }
            "accessright" => {
                if self.current_group.is_none() {
                    return Err(Error::InvalidSecureContent(
                        "accessright element outside of a resourcedatagroup".to_string(),
                    ));
                }
                let attrs = read_attributes(e, "accessright")?;
                let index_str = attrs
                    .get("consumerindex")
                    .ok_or_else(|| Error::missing_attribute("accessright", "consumerindex"))?;
                let consumer_index = index_str.parse::<usize>().map_err(|_| {
                    Error::InvalidSecureContent(format!(
                        "Invalid consumer index '{}' (must be a valid number)",
                        index_str
                    ))
                })?;
                self.current_access_right = Some(AccessRight::loaded(
                    consumer_index,
                    KEKParams::default(),
                    Vec::new(),
                ));
            }
            "kekparams" => {
                let attrs = read_attributes(e, "kekparams")?;
                let kek_params = parse_kek_params(attrs)?;
                if let Some(ref mut access_right) = self.current_access_right {
                    access_right.kek_params = kek_params;
                }
            }
            "resourcedata" => {
                let Some(group_index) = self.current_group else {
                    return Err(Error::GroupNotFound(
                        "resourcedata element outside of a resourcedatagroup".to_string(),
                    ));
                };
                let mut attrs = read_attributes(e, "resourcedata")?;
                let path = attrs
                    .remove("path")
                    .ok_or_else(|| Error::missing_attribute("resourcedata", "path"))?;
                validate_resource_path(&path)?;
                let path = if path.starts_with('/') {
                    path
                } else {
                    format!("/{}", path)
                };
                self.current_resource_data = Some(ResourceData {
                    path,
                    group_index,
                    cek_params: CEKParams::default(),
                });
            }
            "cekparams" => {
                let attrs = read_attributes(e, "cekparams")?;
                let cek_params = parse_cek_params(attrs)?;
                if let Some(ref mut resource_data) = self.current_resource_data {
                    resource_data.cek_params = cek_params;
                }
            }
            "keyvalue" | "CipherValue" | "iv" | "tag" | "aad" => {
                self.text_buffer.clear();
            }
            _ => {}
        }

        Ok(local_name)
    }

    /// Handle a closing tag
    fn end(&mut self, local_name: &str) -> Result<()> {
        match local_name {
            "consumer" => {
                if let Some(consumer) = self.current_consumer.take() {
                    self.keystore.add_consumer(consumer)?;
                }
            }
            "keyvalue" => {
                if let Some(ref mut consumer) = self.current_consumer {
                    consumer.key_value = Some(self.text_buffer.trim().to_string());
                }
            }
            "resourcedatagroup" => {
                self.current_group = None;
            }
            "accessright" => {
                if let (Some(access_right), Some(group_index)) =
                    (self.current_access_right.take(), self.current_group)
                {
                    let group = self.keystore.group_mut(group_index).ok_or_else(|| {
                        Error::GroupNotFound(format!("group index {}", group_index))
                    })?;
                    if group.find_access_right(access_right.consumer_index).is_some() {
                        return Err(Error::DuplicateResource(format!(
                            "access right for consumer index {} in group '{}'",
                            access_right.consumer_index, group.key_uuid
                        )));
                    }
                    group.access_rights.push(access_right);
                }
            }
            "CipherValue" => {
                let value = decode_base64("CipherValue", &self.text_buffer)?;
                if let Some(ref mut access_right) = self.current_access_right {
                    access_right.cipher_value = value;
                }
            }
            "iv" | "tag" | "aad" => {
                let value = decode_base64(local_name, &self.text_buffer)?;
                if let Some(ref mut resource_data) = self.current_resource_data {
                    let cek = &mut resource_data.cek_params;
                    match local_name {
                        "iv" => cek.iv = value,
                        "tag" => cek.tag = value,
                        _ => cek.aad = value,
                    }
                }
            }
            "resourcedata" => {
                if let Some(resource_data) = self.current_resource_data.take() {
                    check_cek_sizes(&resource_data)?;
                    self.keystore.insert_resource_data(resource_data)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Cross-record checks once the whole document is read
    fn finish(self) -> Result<KeyStore> {
        if !self.seen_keystore {
            return Err(Error::InvalidSecureContent(
                "Missing keystore root element".to_string(),
            ));
        }

        let keystore = self.keystore;
        let consumer_count = keystore.consumers().len();

        if !keystore.groups().is_empty() && consumer_count == 0 {
            return Err(Error::InvalidSecureContent(
                "Keystore has resourcedatagroup elements but no consumer elements".to_string(),
            ));
        }

        for group in keystore.groups() {
            for access_right in &group.access_rights {
                if access_right.consumer_index >= consumer_count {
                    return Err(Error::ConsumerNotFound(format!(
                        "consumer index {} in group '{}', only {} consumer(s) defined",
                        access_right.consumer_index, group.key_uuid, consumer_count
                    )));
                }
            }
        }

        Ok(keystore)
    }
}

/// Collect the attributes of an element by (unprefixed) name
fn read_attributes(e: &BytesStart, element: &str) -> Result<HashMap<String, String>> {
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| {
            Error::InvalidXml(format!("Invalid attribute in {}: {}", element, e))
        })?;
        let attr_name = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| Error::InvalidXml(e.to_string()))?;
        let attr_value = std::str::from_utf8(&attr.value)
            .map_err(|e| Error::InvalidXml(e.to_string()))?
            .to_string();
        attrs.insert(get_local_name(attr_name).to_string(), attr_value);
    }
    Ok(attrs)
}

fn parse_kek_params(mut attrs: HashMap<String, String>) -> Result<KEKParams> {
    let wrapping = attrs
        .remove("wrappingalgorithm")
        .ok_or_else(|| Error::missing_attribute("kekparams", "wrappingalgorithm"))?;
    let wrapping_algorithm = WrappingAlgorithm::from_uri(&wrapping).ok_or_else(|| {
        Error::InvalidSecureContent(format!(
            "Invalid wrapping algorithm '{}'. Must be either '{}' or '{}'",
            wrapping,
            WrappingAlgorithm::RsaOaepMgf1p.uri(),
            WrappingAlgorithm::RsaOaep.uri()
        ))
    })?;

    let mgf_algorithm = attrs.remove("mgfalgorithm");
    if let Some(ref mgf) = mgf_algorithm
        && !VALID_MGF_ALGORITHMS.contains(&mgf.as_str())
    {
        return Err(Error::InvalidSecureContent(format!(
            "Invalid mgfalgorithm '{}'. Must be one of mgf1sha1, mgf1sha256, mgf1sha384, or mgf1sha512",
            mgf
        )));
    }

    let digest_method = attrs.remove("digestmethod");
    if let Some(ref digest) = digest_method
        && !VALID_DIGEST_METHODS.contains(&digest.as_str())
    {
        return Err(Error::InvalidSecureContent(format!(
            "Invalid digestmethod '{}'. Must be one of sha1, sha256, sha384, or sha512",
            digest
        )));
    }

    Ok(KEKParams {
        wrapping_algorithm,
        mgf_algorithm,
        digest_method,
    })
}

fn parse_cek_params(mut attrs: HashMap<String, String>) -> Result<CEKParams> {
    let algorithm = attrs
        .remove("encryptionalgorithm")
        .ok_or_else(|| Error::missing_attribute("cekparams", "encryptionalgorithm"))?;
    let encryption_algorithm = EncryptionAlgorithm::from_uri(&algorithm).ok_or_else(|| {
        Error::InvalidSecureContent(format!(
            "Invalid encryption algorithm '{}'. Must be '{}'",
            algorithm,
            EncryptionAlgorithm::Aes256Gcm.uri()
        ))
    })?;

    let compression = match attrs.remove("compression") {
        None => Compression::None,
        Some(value) => Compression::parse(&value).ok_or_else(|| {
            Error::InvalidSecureContent(format!(
                "Invalid compression '{}'. Must be 'none' or 'deflate'",
                value
            ))
        })?,
    };

    Ok(CEKParams {
        encryption_algorithm,
        compression,
        ..Default::default()
    })
}

/// Encrypted paths must name a regular part
fn validate_resource_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::InvalidSecureContent(
            "Resource data path attribute cannot be empty".to_string(),
        ));
    }

    let path_lower = path.to_lowercase();
    if path_lower.contains("/_rels/") || path_lower.ends_with(".rels") {
        return Err(Error::InvalidSecureContent(format!(
            "Invalid encrypted file path '{}'. OPC relationship files cannot be encrypted",
            path
        )));
    }
    Ok(())
}

fn check_cek_sizes(resource_data: &ResourceData) -> Result<()> {
    let cek = &resource_data.cek_params;
    let algorithm = cek.encryption_algorithm;
    crate::crypto::check_size("IV", &resource_data.path, algorithm.iv_size(), cek.iv.len())?;
    crate::crypto::check_size("tag", &resource_data.path, algorithm.tag_size(), cek.tag.len())
}

fn decode_base64(element: &str, text: &str) -> Result<Vec<u8>> {
    // Producers may wrap long values over several lines
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64.decode(compact.as_bytes()).map_err(|e| {
        Error::InvalidSecureContent(format!("Invalid base64 in <{}>: {}", element, e))
    })
}
