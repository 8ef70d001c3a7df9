//! Fuzz target for resume pointer parsing.
//!
//! `decode_pointer` must never panic on arbitrary strings, and pointers from
//! `encode_pointer` must decode back to the exact key.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tagindex_storage::pointer::{decode_pointer, encode_pointer};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let payload = &data[1..];
    if data[0] % 2 == 0 {
        if let Ok(text) = std::str::from_utf8(payload) {
            let _ = decode_pointer(text);
        }
    } else {
        let pointer = encode_pointer(payload);
        assert!(
            pointer.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'),
            "pointer is not URL-safe: {pointer}"
        );
        assert_eq!(decode_pointer(&pointer), Ok(Some(payload.to_vec())), "roundtrip mismatch");
    }
});
