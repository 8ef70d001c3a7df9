//! Opaque scan resume pointers.
//!
//! A pointer is the URL-safe base64 of a version byte followed by the raw key
//! bytes of the last position a scan advanced over. It decodes back to exactly
//! that key. An empty or absent pointer means "start of range".

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use snafu::Snafu;

/// Pointer format version for forward compatibility.
const POINTER_VERSION: u8 = 1;

/// Errors that can occur decoding a pointer.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum PointerError {
    /// Pointer is not valid base64.
    #[snafu(display("pointer is not valid base64"))]
    InvalidFormat,
    /// Pointer was produced by an incompatible version.
    #[snafu(display("unsupported pointer version {version}"))]
    UnsupportedVersion {
        /// Version byte found in the pointer.
        version: u8,
    },
}

/// Encodes a resume key into an opaque pointer.
#[must_use]
pub fn encode_pointer(key: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(key.len() + 1);
    bytes.push(POINTER_VERSION);
    bytes.extend_from_slice(key);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes a pointer back into its resume key.
///
/// Returns `Ok(None)` for an empty pointer.
///
/// # Errors
///
/// Returns [`PointerError`] if the pointer is malformed or from another version.
pub fn decode_pointer(pointer: &str) -> Result<Option<Vec<u8>>, PointerError> {
    if pointer.is_empty() {
        return Ok(None);
    }
    let bytes = URL_SAFE_NO_PAD.decode(pointer).map_err(|_| PointerError::InvalidFormat)?;
    match bytes.split_first() {
        Some((&POINTER_VERSION, key)) => Ok(Some(key.to_vec())),
        Some((&version, _)) => Err(PointerError::UnsupportedVersion { version }),
        None => Err(PointerError::InvalidFormat),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_pointer_is_url_safe() {
        let pointer = encode_pointer(b"12\x02foo/bar?\x02\x02a+b");
        assert!(pointer.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_empty_pointer_is_start() {
        assert_eq!(decode_pointer("").unwrap(), None);
    }

    #[test]
    fn test_invalid_pointer() {
        assert_eq!(decode_pointer("not base64!"), Err(PointerError::InvalidFormat));
    }

    #[test]
    fn test_wrong_version() {
        let pointer = URL_SAFE_NO_PAD.encode([9u8, b'a']);
        assert_eq!(decode_pointer(&pointer), Err(PointerError::UnsupportedVersion { version: 9 }));
    }

    proptest! {
        #[test]
        fn prop_pointer_decodes_to_key(key in proptest::collection::vec(any::<u8>(), 0..64)) {
            let decoded = decode_pointer(&encode_pointer(&key)).unwrap();
            prop_assert_eq!(decoded, Some(key));
        }
    }
}
