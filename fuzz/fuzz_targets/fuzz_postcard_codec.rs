//! Fuzz target for postcard codec roundtrip.
//!
//! Arbitrary bytes fed to `decode` for stored types must never panic, and
//! successfully decoded values must roundtrip.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tagindex_storage::AncestorRecord;
use tagindex_types::{
    EntitySnapshot, IndexEntry,
    codec::{decode, encode},
};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let payload = &data[1..];
    match data[0] % 3 {
        0 => try_roundtrip::<AncestorRecord>(payload),
        1 => try_roundtrip::<IndexEntry>(payload),
        _ => try_roundtrip::<EntitySnapshot>(payload),
    }
});

fn try_roundtrip<T>(data: &[u8])
where
    T: serde::Serialize + serde::de::DeserializeOwned + PartialEq + std::fmt::Debug,
{
    let Ok(value) = decode::<T>(data) else {
        return;
    };
    let Ok(encoded) = encode(&value) else {
        panic!("encode failed after successful decode: {value:?}");
    };
    match decode::<T>(&encoded) {
        Ok(again) => assert_eq!(value, again, "roundtrip mismatch"),
        Err(e) => panic!("re-decode failed: {e}"),
    }
}
