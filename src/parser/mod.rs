//! XML parsing for secure package parts

mod keystore;

pub use keystore::parse_keystore;

/// Strip the namespace prefix from a qualified element or attribute name
///
/// # Examples
///
/// - `"xenc:CipherValue"` returns `"CipherValue"`
/// - `"keystore"` returns `"keystore"`
pub(crate) fn get_local_name(name_str: &str) -> &str {
    if let Some(pos) = name_str.rfind(':') {
        &name_str[pos + 1..]
    } else {
        name_str
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_local_name() {
        assert_eq!(get_local_name("xenc:CipherValue"), "CipherValue");
        assert_eq!(get_local_name("keystore"), "keystore");
    }
}
