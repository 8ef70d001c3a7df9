//! Fuzz target for index key encoding/decoding.
//!
//! `decode_key` must never panic on arbitrary bytes, and keys produced by
//! `encode_index_key` must decode back to their components.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tagindex_storage::keys::{decode_key, encode_index_key, logical_prefix};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let payload = &data[1..];
    if data[0] % 2 == 0 {
        let _ = decode_key(payload);
        let _ = logical_prefix(payload);
    } else {
        fuzz_roundtrip(payload);
    }
});

fn fuzz_roundtrip(data: &[u8]) {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // Components are carved from the input at a separator the codec never accepts.
    let parts: Vec<&str> = text.splitn(5, '\u{1f}').collect();
    let [item_token, value, self_id, rest @ ..] = parts.as_slice() else {
        return;
    };
    let distkey = match rest {
        [dk_token, dk_value] => Some((*dk_token, *dk_value)),
        _ => None,
    };

    let Ok(key) = encode_index_key(item_token, value, distkey, self_id) else {
        return;
    };
    let decoded = decode_key(&key);
    assert!(decoded.is_ok(), "encoded key failed to decode: {key:?}");
    if let Ok(decoded) = decoded {
        assert_eq!(decoded.item_token, *item_token);
        assert_eq!(decoded.value, *value);
        assert_eq!(decoded.self_id, *self_id);
        assert_eq!(
            decoded.distkey,
            distkey.map(|(token, value)| (token.to_string(), value.to_string()))
        );
    }
}
