//! 8.3 short-name encoding.
//!
//! Canonicalization happens once, here; directory lookups afterwards are
//! always an exact 11-byte compare.

use alloc::string::String;

use crate::fs::{FileSystemError, FileSystemErrorKind, Result};

pub const SHORT_NAME_LEN: usize = 11;
pub const BASE_LEN: usize = 8;
pub const EXT_LEN: usize = 3;

/// Canonicalize `name` into the space-padded 11-byte on-disk form.
///
/// Letters are uppercased. The extension starts at the last `.` that is
/// followed by an alphanumeric character; a trailing or empty extension is
/// ignored. `"."` and `".."` keep their literal dot forms.
pub fn encode_short_name(name: &str) -> Result<[u8; SHORT_NAME_LEN]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return Err(FileSystemError {
            kind: FileSystemErrorKind::InvalidPath,
            message: "empty name component",
        });
    }

    let mut encoded = [b' '; SHORT_NAME_LEN];

    if name == "." || name == ".." {
        encoded[..bytes.len()].copy_from_slice(bytes);
        return Ok(encoded);
    }

    let mut split = None;
    for i in (0..bytes.len()).rev() {
        if bytes[i] == b'.' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_alphanumeric() {
            split = Some(i);
            break;
        }
    }

    let (base, ext) = match split {
        Some(i) => (&bytes[..i], &bytes[i + 1..]),
        None => (bytes, &bytes[..0]),
    };

    for (i, &b) in base.iter().take(BASE_LEN).enumerate() {
        encoded[i] = b.to_ascii_uppercase();
    }
    for (i, &b) in ext.iter().take(EXT_LEN).enumerate() {
        encoded[BASE_LEN + i] = b.to_ascii_uppercase();
    }

    Ok(encoded)
}

/// Render an on-disk name back into `BASE.EXT` form for listings.
pub fn decode_short_name(raw: &[u8; SHORT_NAME_LEN]) -> String {
    let base_end = raw[..BASE_LEN]
        .iter()
        .rposition(|&b| b != b' ')
        .map_or(0, |i| i + 1);
    let ext_end = raw[BASE_LEN..]
        .iter()
        .rposition(|&b| b != b' ')
        .map_or(0, |i| i + 1);

    let mut name = String::new();
    for &b in &raw[..base_end] {
        name.push(b as char);
    }
    if ext_end > 0 {
        name.push('.');
        for &b in &raw[BASE_LEN..BASE_LEN + ext_end] {
            name.push(b as char);
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_base_and_extension() {
        assert_eq!(&encode_short_name("README.TXT").unwrap(), b"README  TXT");
        assert_eq!(&encode_short_name("a").unwrap(), b"A          ");
        assert_eq!(&encode_short_name("kernel.bin").unwrap(), b"KERNEL  BIN");
    }

    #[test]
    fn test_encode_dot_entries() {
        assert_eq!(&encode_short_name(".").unwrap(), b".          ");
        assert_eq!(&encode_short_name("..").unwrap(), b"..         ");
    }

    #[test]
    fn test_trailing_dot_is_not_an_extension() {
        assert_eq!(&encode_short_name("noext.").unwrap(), b"NOEXT.     ");
        // Only the last qualifying dot splits the extension.
        assert_eq!(&encode_short_name("a.b.c").unwrap(), b"A.B     C  ");
    }

    #[test]
    fn test_overlong_parts_truncate() {
        assert_eq!(
            &encode_short_name("longfilename.text").unwrap(),
            b"LONGFILETEX"
        );
    }

    #[test]
    fn test_decode_short_name() {
        assert_eq!(decode_short_name(b"README  TXT"), "README.TXT");
        assert_eq!(decode_short_name(b"A          "), "A");
        assert_eq!(decode_short_name(b"..         "), "..");
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(encode_short_name("").is_err());
    }
}
