//! Writing parts and metadata into a package

use super::content_types::{ContentTypes, RELATIONSHIPS_CONTENT_TYPE};
use super::relationships::{Relationship, rels_path_for, write_relationships};
use super::validation::{normalize_path, validate_opc_part_name};
use super::{CONTENT_TYPES_PATH, RELS_PATH};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Seek, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Package being written
///
/// Parts are streamed straight into the ZIP. Content types and
/// relationships are collected and written by [`PackageWriter::finish`].
pub struct PackageWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    content_types: ContentTypes,
    root_relationships: Vec<Relationship>,
    part_relationships: BTreeMap<String, Vec<Relationship>>,
    parts: BTreeSet<String>,
}

/// Raw stream of one part being written
///
/// Borrowing the package writer keeps a single part open at a time.
pub struct PartStream<'a, W: Write + Seek> {
    zip: &'a mut ZipWriter<W>,
}

impl<W: Write + Seek> Write for PartStream<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.zip.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.zip.flush()
    }
}

impl<W: Write + Seek> PackageWriter<W> {
    /// Start a package on `writer`
    pub fn new(writer: W) -> Self {
        let mut content_types = ContentTypes::default();
        content_types.add_default("rels", RELATIONSHIPS_CONTENT_TYPE);
        Self {
            zip: ZipWriter::new(writer),
            content_types,
            root_relationships: Vec::new(),
            part_relationships: BTreeMap::new(),
            parts: BTreeSet::new(),
        }
    }

    /// Start a deflate-compressed part
    pub fn add_part(&mut self, path: &str) -> Result<PartStream<'_, W>> {
        self.start_part(path, CompressionMethod::Deflated)
    }

    /// Start a part stored without ZIP compression
    ///
    /// Used for ciphertext, which does not compress.
    pub fn add_stored_part(&mut self, path: &str) -> Result<PartStream<'_, W>> {
        self.start_part(path, CompressionMethod::Stored)
    }

    fn start_part(&mut self, path: &str, method: CompressionMethod) -> Result<PartStream<'_, W>> {
        validate_opc_part_name(path)?;
        let name = normalize_path(path);
        if !self.parts.insert(name.to_string()) {
            return Err(Error::DuplicateResource(format!("part '{}'", path)));
        }
        let options = SimpleFileOptions::default().compression_method(method);
        self.zip
            .start_file(name, options)
            .map_err(|e| Error::xml_write(format!("Failed to create part '{}': {}", path, e)))?;
        Ok(PartStream { zip: &mut self.zip })
    }

    /// Whether a part with this name was already written
    pub fn has_part(&self, path: &str) -> bool {
        self.parts.contains(normalize_path(path))
    }

    /// Declare a content type for an extension
    pub fn add_content_type_default(&mut self, extension: &str, content_type: &str) {
        self.content_types.add_default(extension, content_type);
    }

    /// Declare a content type for one part
    pub fn add_content_type_override(&mut self, path: &str, content_type: &str) {
        self.content_types.add_override(path, content_type);
    }

    /// Add a package-level relationship, returning its id
    pub fn add_root_relationship(&mut self, rel_type: &str, target: &str) -> String {
        push_relationship(&mut self.root_relationships, rel_type, target)
    }

    /// Add a relationship sourced at `part`, returning its id
    pub fn add_part_relationship(&mut self, part: &str, rel_type: &str, target: &str) -> String {
        let rels = self
            .part_relationships
            .entry(normalize_path(part).to_string())
            .or_default();
        push_relationship(rels, rel_type, target)
    }

    /// Write content types and relationship parts and close the archive
    pub fn finish(mut self) -> Result<W> {
        let content_types = self.content_types.to_xml()?;
        self.write_metadata_part(CONTENT_TYPES_PATH, &content_types)?;

        let root = write_relationships(&self.root_relationships)?;
        self.write_metadata_part(RELS_PATH, &root)?;

        let part_relationships = std::mem::take(&mut self.part_relationships);
        for (part, rels) in &part_relationships {
            let xml = write_relationships(rels)?;
            self.write_metadata_part(&rels_path_for(part), &xml)?;
        }

        self.zip
            .finish()
            .map_err(|e| Error::xml_write(format!("Failed to finalize ZIP archive: {}", e)))
    }

    fn write_metadata_part(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.zip
            .start_file(name, SimpleFileOptions::default())
            .map_err(|e| Error::xml_write(format!("Failed to create '{}': {}", name, e)))?;
        self.zip
            .write_all(data)
            .map_err(|e| Error::xml_write(format!("Failed to write '{}': {}", name, e)))
    }
}

fn push_relationship(rels: &mut Vec<Relationship>, rel_type: &str, target: &str) -> String {
    let target = if target.starts_with('/') {
        target.to_string()
    } else {
        format!("/{}", target)
    };
    if let Some(existing) = rels
        .iter()
        .find(|r| r.rel_type == rel_type && r.target == target)
    {
        return existing.id.clone();
    }
    let id = format!("rel{}", rels.len());
    rels.push(Relationship::new(id.clone(), rel_type, target));
    id
}
