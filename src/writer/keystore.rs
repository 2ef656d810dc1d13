//! Keystore manifest serialization

use crate::error::{Error, Result};
use crate::model::secure_content::{SECURE_CONTENT_NAMESPACE, XML_ENCRYPTION_NAMESPACE};
use crate::model::{AccessRight, Consumer, KeyStore, ResourceData};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Write as IoWrite;

/// Write a keystore manifest to `writer`
///
/// Records are emitted in keystore order: consumers first, then each group
/// with its access rights followed by its resource data.
pub fn write_keystore_xml<W: IoWrite>(keystore: &KeyStore, writer: W) -> Result<()> {
    let mut xml_writer = Writer::new_with_indent(writer, b' ', 2);

    xml_writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| Error::xml_write(format!("Failed to write XML declaration: {}", e)))?;

    let mut root = BytesStart::new("keystore");
    root.push_attribute(("xmlns", SECURE_CONTENT_NAMESPACE));
    root.push_attribute(("xmlns:xenc", XML_ENCRYPTION_NAMESPACE));
    root.push_attribute(("UUID", keystore.uuid()));
    xml_writer
        .write_event(Event::Start(root))
        .map_err(|e| Error::xml_write(format!("Failed to write keystore element: {}", e)))?;

    for consumer in keystore.consumers() {
        write_consumer(&mut xml_writer, consumer)?;
    }

    for (group_index, group) in keystore.groups().iter().enumerate() {
        let mut elem = BytesStart::new("resourcedatagroup");
        elem.push_attribute(("keyuuid", group.key_uuid.as_str()));
        xml_writer
            .write_event(Event::Start(elem))
            .map_err(|e| Error::xml_write(format!("Failed to write resourcedatagroup: {}", e)))?;

        for access_right in &group.access_rights {
            write_access_right(&mut xml_writer, access_right)?;
        }
        for index in keystore.group_members(group_index) {
            write_resource_data(&mut xml_writer, &keystore.resource_data()[index])?;
        }

        xml_writer
            .write_event(Event::End(BytesEnd::new("resourcedatagroup")))
            .map_err(|e| Error::xml_write(format!("Failed to close resourcedatagroup: {}", e)))?;
    }

    xml_writer
        .write_event(Event::End(BytesEnd::new("keystore")))
        .map_err(|e| Error::xml_write(format!("Failed to close keystore element: {}", e)))?;

    Ok(())
}

/// Serialize a keystore manifest into a buffer
pub fn write_keystore(keystore: &KeyStore) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    write_keystore_xml(keystore, &mut buffer)?;
    Ok(buffer)
}

fn write_consumer<W: IoWrite>(writer: &mut Writer<W>, consumer: &Consumer) -> Result<()> {
    let mut elem = BytesStart::new("consumer");
    elem.push_attribute(("consumerid", consumer.consumer_id.as_str()));
    if let Some(ref key_id) = consumer.key_id {
        elem.push_attribute(("keyid", key_id.as_str()));
    }

    match consumer.key_value {
        None => writer
            .write_event(Event::Empty(elem))
            .map_err(|e| Error::xml_write(format!("Failed to write consumer: {}", e))),
        Some(ref key_value) => {
            writer
                .write_event(Event::Start(elem))
                .map_err(|e| Error::xml_write(format!("Failed to write consumer: {}", e)))?;
            write_text_element(writer, "keyvalue", key_value)?;
            writer
                .write_event(Event::End(BytesEnd::new("consumer")))
                .map_err(|e| Error::xml_write(format!("Failed to close consumer: {}", e)))
        }
    }
}

fn write_access_right<W: IoWrite>(writer: &mut Writer<W>, access_right: &AccessRight) -> Result<()> {
    let mut elem = BytesStart::new("accessright");
    elem.push_attribute(("consumerindex", access_right.consumer_index.to_string().as_str()));
    writer
        .write_event(Event::Start(elem))
        .map_err(|e| Error::xml_write(format!("Failed to write accessright: {}", e)))?;

    let kek = &access_right.kek_params;
    let mut kek_elem = BytesStart::new("kekparams");
    kek_elem.push_attribute(("wrappingalgorithm", kek.wrapping_algorithm.uri()));
    if let Some(ref mgf) = kek.mgf_algorithm {
        kek_elem.push_attribute(("mgfalgorithm", mgf.as_str()));
    }
    if let Some(ref digest) = kek.digest_method {
        kek_elem.push_attribute(("digestmethod", digest.as_str()));
    }
    writer
        .write_event(Event::Empty(kek_elem))
        .map_err(|e| Error::xml_write(format!("Failed to write kekparams: {}", e)))?;

    writer
        .write_event(Event::Start(BytesStart::new("cipherdata")))
        .map_err(|e| Error::xml_write(format!("Failed to write cipherdata: {}", e)))?;
    write_text_element(
        writer,
        "xenc:CipherValue",
        &BASE64.encode(&access_right.cipher_value),
    )?;
    writer
        .write_event(Event::End(BytesEnd::new("cipherdata")))
        .map_err(|e| Error::xml_write(format!("Failed to close cipherdata: {}", e)))?;

    writer
        .write_event(Event::End(BytesEnd::new("accessright")))
        .map_err(|e| Error::xml_write(format!("Failed to close accessright: {}", e)))?;
    Ok(())
}

fn write_resource_data<W: IoWrite>(writer: &mut Writer<W>, resource_data: &ResourceData) -> Result<()> {
    let mut elem = BytesStart::new("resourcedata");
    elem.push_attribute(("path", resource_data.path.as_str()));
    writer
        .write_event(Event::Start(elem))
        .map_err(|e| Error::xml_write(format!("Failed to write resourcedata: {}", e)))?;

    let cek = &resource_data.cek_params;
    let mut cek_elem = BytesStart::new("cekparams");
    cek_elem.push_attribute(("encryptionalgorithm", cek.encryption_algorithm.uri()));
    cek_elem.push_attribute(("compression", cek.compression.as_str()));
    writer
        .write_event(Event::Start(cek_elem))
        .map_err(|e| Error::xml_write(format!("Failed to write cekparams: {}", e)))?;

    write_text_element(writer, "iv", &BASE64.encode(&cek.iv))?;
    write_text_element(writer, "tag", &BASE64.encode(&cek.tag))?;
    if !cek.aad.is_empty() {
        write_text_element(writer, "aad", &BASE64.encode(&cek.aad))?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("cekparams")))
        .map_err(|e| Error::xml_write(format!("Failed to close cekparams: {}", e)))?;
    writer
        .write_event(Event::End(BytesEnd::new("resourcedata")))
        .map_err(|e| Error::xml_write(format!("Failed to close resourcedata: {}", e)))?;
    Ok(())
}

fn write_text_element<W: IoWrite>(writer: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(|e| Error::xml_write(format!("Failed to write {}: {}", name, e)))?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(|e| Error::xml_write(format!("Failed to write {} text: {}", name, e)))?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(|e| Error::xml_write(format!("Failed to close {}: {}", name, e)))?;
    Ok(())
}
