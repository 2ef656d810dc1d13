//! OPC part name rules

use crate::error::{Error, Result};

/// Validate a part name against the OPC naming constraints
///
/// Non-ASCII characters are accepted as-is; many producers store them
/// unencoded.
pub fn validate_opc_part_name(part_name: &str) -> Result<()> {
    if part_name.chars().any(|c| c.is_control()) {
        return Err(Error::InvalidFormat(format!(
            "Part name cannot contain control characters: {}",
            part_name.escape_debug()
        )));
    }

    if part_name.contains('#') || part_name.contains('?') {
        return Err(Error::InvalidFormat(format!(
            "Part name cannot contain a fragment or query string: {}",
            part_name
        )));
    }

    let relative = part_name.strip_prefix('/').unwrap_or(part_name);
    if relative.is_empty() {
        return Err(Error::InvalidFormat("Part name cannot be empty".to_string()));
    }

    for segment in relative.split('/') {
        if segment.is_empty() {
            return Err(Error::InvalidFormat(format!(
                "Part name cannot contain empty path segments: {}",
                part_name
            )));
        }
        if segment == "." || segment == ".." || segment.ends_with('.') {
            return Err(Error::InvalidFormat(format!(
                "Part name segments cannot be '.', '..' or end with '.': {}",
                part_name
            )));
        }
    }

    Ok(())
}

/// Strip the leading slash of a part name, giving the ZIP entry name
pub fn normalize_path(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Whether a part name denotes a relationship part or the content types part
pub fn is_package_metadata(path: &str) -> bool {
    let path = normalize_path(path);
    path.eq_ignore_ascii_case(super::CONTENT_TYPES_PATH)
        || path.to_ascii_lowercase().ends_with(".rels")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_part_names() {
        assert!(validate_opc_part_name("/3D/3dmodel.model").is_ok());
        assert!(validate_opc_part_name("Secure/keystore.xml").is_ok());
        assert!(validate_opc_part_name("/2D/testÆfile.model").is_ok());
    }

    #[test]
    fn test_invalid_part_names() {
        for name in ["/", "/3D//a.bin", "/3D/../a.bin", "/3D./a.bin", "/a.bin#x", "/a?b", "/a\nb"] {
            assert!(validate_opc_part_name(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn test_package_metadata() {
        assert!(is_package_metadata("/_rels/.rels"));
        assert!(is_package_metadata("3D/_rels/3dmodel.model.RELS"));
        assert!(is_package_metadata("[Content_Types].xml"));
        assert!(!is_package_metadata("/3D/model.bin"));
    }
}
