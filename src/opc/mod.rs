//! OPC (Open Packaging Conventions) container handling
//!
//! 3MF files are ZIP archives following the OPC standard. This module is the
//! thin container layer the secure engines sit on: parts, relationships and
//! content types.

mod content_types;
mod reader;
mod relationships;
mod validation;
mod writer;

pub use content_types::{
    CONTENT_TYPES_NAMESPACE, ContentTypes, KEYSTORE_CONTENT_TYPE, RELATIONSHIPS_CONTENT_TYPE,
};
pub use reader::Package;
pub use relationships::{
    ENCRYPTEDFILE_REL_TYPE, KEYSTORE_REL_TYPE_2019_04, KEYSTORE_REL_TYPE_2019_07,
    MUST_PRESERVE_REL_TYPE, RELATIONSHIPS_NAMESPACE, Relationship, parse_relationships,
    rels_path_for, write_relationships,
};
pub use validation::{is_package_metadata, normalize_path, validate_opc_part_name};
pub use writer::{PackageWriter, PartStream};

/// Content types file path
pub const CONTENT_TYPES_PATH: &str = "[Content_Types].xml";

/// Relationships file path
pub const RELS_PATH: &str = "_rels/.rels";

/// Default keystore part name
pub const KEYSTORE_PATH: &str = "/Secure/keystore.xml";

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    #[test]
    fn test_package_from_empty_zip() {
        let zip = ZipWriter::new(Cursor::new(Vec::new()));
        let cursor = zip.finish().unwrap();

        // Missing [Content_Types].xml and _rels/.rels
        let result = Package::open(cursor);
        assert!(
            matches!(result, Err(crate::Error::InvalidFormat(_))),
            "Expected package validation to fail for empty ZIP"
        );
    }

    #[test]
    fn test_write_then_read_package() {
        let mut writer = PackageWriter::new(Cursor::new(Vec::new()));
        writer
            .add_part("/3D/3dmodel.model")
            .unwrap()
            .write_all(b"<model/>")
            .unwrap();
        writer
            .add_stored_part("/3D/mesh.bin")
            .unwrap()
            .write_all(&[1, 2, 3])
            .unwrap();
        writer.add_content_type_default("model", "application/vnd.ms-package.3dmanufacturing-3dmodel+xml");
        writer.add_content_type_override("/3D/mesh.bin", "application/octet-stream");
        let id = writer.add_root_relationship(
            "http://schemas.microsoft.com/3dmanufacturing/2013/01/3dmodel",
            "/3D/3dmodel.model",
        );
        assert_eq!(id, "rel0");
        writer.add_part_relationship("/3D/3dmodel.model", ENCRYPTEDFILE_REL_TYPE, "/3D/mesh.bin");
        let cursor = writer.finish().unwrap();

        let mut package = Package::open(cursor).unwrap();
        assert!(package.has_file("/3D/mesh.bin"));
        assert_eq!(package.get_file_binary("3D/mesh.bin").unwrap(), vec![1, 2, 3]);
        assert_eq!(package.get_file("/3D/3dmodel.model").unwrap(), "<model/>");
        assert_eq!(
            package.content_type("/3D/mesh.bin").unwrap().as_deref(),
            Some("application/octet-stream")
        );
        let rels = package.part_relationships("/3D/3dmodel.model").unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].target, "/3D/mesh.bin");
        assert_eq!(package.root_relationships().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_part_rejected() {
        let mut writer = PackageWriter::new(Cursor::new(Vec::new()));
        writer.add_part("/a.bin").unwrap();
        assert!(matches!(
            writer.add_part("a.bin"),
            Err(crate::Error::DuplicateResource(_))
        ));
    }

    #[test]
    fn test_dangling_root_relationship_rejected() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        zip.start_file("[Content_Types].xml", options).unwrap();
        zip.write_all(b"<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\"/>")
            .unwrap();
        zip.start_file("_rels/.rels", options).unwrap();
        zip.write_all(
            b"<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">
  <Relationship Target=\"/Secure/keystore.xml\" Id=\"rel0\" Type=\"http://schemas.microsoft.com/3dmanufacturing/2019/07/keystore\"/>
</Relationships>",
        )
        .unwrap();
        let cursor = zip.finish().unwrap();

        assert!(matches!(Package::open(cursor), Err(crate::Error::InvalidFormat(_))));
    }
}
