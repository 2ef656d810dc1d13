//! Reading parts and metadata from a package

use super::content_types::ContentTypes;
use super::relationships::{Relationship, parse_relationships, rels_path_for};
use super::validation::{normalize_path, validate_opc_part_name};
use super::{CONTENT_TYPES_PATH, RELS_PATH};
use crate::error::{Error, Result};
use std::io::{Read, Seek};
use zip::ZipArchive;

/// An opened OPC package
pub struct Package<R: Read> {
    archive: ZipArchive<R>,
}

impl<R: Read + Seek> Package<R> {
    /// Open a package and check its mandatory OPC structure
    pub fn open(reader: R) -> Result<Self> {
        let archive = ZipArchive::new(reader)?;
        let mut package = Self { archive };
        package.validate_opc_structure()?;
        Ok(package)
    }

    fn validate_opc_structure(&mut self) -> Result<()> {
        for required in [CONTENT_TYPES_PATH, RELS_PATH] {
            if !self.has_file(required) {
                return Err(Error::invalid_format_context(
                    "OPC package structure",
                    &format!(
                        "Missing required file '{}'. \
                         The package may be corrupt or improperly formatted.",
                        required
                    ),
                ));
            }
        }

        for rel in self.root_relationships()? {
            validate_opc_part_name(&rel.target)?;
            if !self.has_file(&rel.target) {
                return Err(Error::InvalidFormat(format!(
                    "Relationship points to non-existent file: {}",
                    rel.target
                )));
            }
        }

        Ok(())
    }

    /// Check if a part exists (leading `/` optional)
    pub fn has_file(&mut self, name: &str) -> bool {
        self.archive.by_name(normalize_path(name)).is_ok()
    }

    /// Number of ZIP entries
    pub fn len(&self) -> usize {
        self.archive.len()
    }

    /// Whether the archive has no entries
    pub fn is_empty(&self) -> bool {
        self.archive.is_empty()
    }

    /// Names of all ZIP entries, in archive order
    pub fn file_names(&mut self) -> Vec<String> {
        (0..self.archive.len())
            .filter_map(|i| self.archive.by_index(i).ok().map(|f| f.name().to_string()))
            .collect()
    }

    /// Raw stream of a part
    pub fn part_reader(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
        let file = self
            .archive
            .by_name(normalize_path(name))
            .map_err(|_| Error::MissingFile(name.to_string()))?;
        Ok(Box::new(file))
    }

    /// Read a part as UTF-8 text
    pub fn get_file(&mut self, name: &str) -> Result<String> {
        let mut content = String::new();
        self.part_reader(name)?.read_to_string(&mut content)?;
        Ok(content)
    }

    /// Read a part as bytes
    pub fn get_file_binary(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        self.part_reader(name)?.read_to_end(&mut content)?;
        Ok(content)
    }

    /// Relationships of the package root (`_rels/.rels`)
    pub fn root_relationships(&mut self) -> Result<Vec<Relationship>> {
        let xml = self.get_file(RELS_PATH)?;
        parse_relationships(&xml, RELS_PATH)
    }

    /// Relationships whose source is `part`; empty when it has no `.rels` part
    pub fn part_relationships(&mut self, part: &str) -> Result<Vec<Relationship>> {
        let rels_path = rels_path_for(part);
        if !self.has_file(&rels_path) {
            return Ok(Vec::new());
        }
        let xml = self.get_file(&rels_path)?;
        parse_relationships(&xml, &rels_path)
    }

    /// Parsed `[Content_Types].xml`
    pub fn content_types(&mut self) -> Result<ContentTypes> {
        let xml = self.get_file(CONTENT_TYPES_PATH)?;
        ContentTypes::parse(&xml)
    }

    /// Content type of a part, if declared
    pub fn content_type(&mut self, path: &str) -> Result<Option<String>> {
        Ok(self.content_types()?.lookup(path).map(str::to_string))
    }
}
