//! Ordered index key encoding.
//!
//! Index key layout:
//!
//! ```text
//! {item_token} SEP {value} SEP [{dk_token} DSEP {dk_value}] SEP {self_id}
//! ```
//!
//! Application strings may not contain characters below U+0020, so every
//! sentinel sorts below every legal character and a byte-wise scan visits all
//! records of one item, then one value, then one DISTKEY partition contiguously.
//! [`HIGH`] is not valid UTF-8 and only ever appears in scan bounds.

use snafu::ensure;

use crate::error::{CorruptSnafu, InvalidKeySnafu, Result};

/// Marks the start of an item's value range.
pub const VALUE_START: u8 = 0x01;
/// Separates key components.
pub const SEP: u8 = 0x02;
/// Terminates an upper bound that must include its own value.
pub const LESS_THAN: u8 = 0x03;
/// Separates a DISTKEY token from its value.
pub const DSEP: u8 = 0x04;
/// Sorts above every UTF-8 byte; used for forward-match range ends.
pub const HIGH: u8 = 0xFF;

/// Decoded components of an index key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKey {
    /// Shortened item token.
    pub item_token: String,
    /// Indexed value.
    pub value: String,
    /// DISTKEY token and value, if the record belongs to a partition.
    pub distkey: Option<(String, String)>,
    /// Self id of the entity.
    pub self_id: String,
}

pub(crate) fn check_component(name: &str, component: &str) -> Result<()> {
    if let Some(c) = component.chars().find(|c| (*c as u32) < 0x20) {
        return InvalidKeySnafu {
            message: format!("{name} contains control character U+{:04X}", c as u32),
        }
        .fail();
    }
    Ok(())
}

fn check_token(name: &str, token: &str) -> Result<()> {
    ensure!(!token.is_empty(), InvalidKeySnafu { message: format!("{name} is empty") });
    check_component(name, token)
}

/// Encodes an index key.
///
/// # Errors
///
/// Returns [`StoreError::InvalidKey`](crate::StoreError::InvalidKey) if a token
/// or the self id is empty, or any component contains a character below U+0020.
pub fn encode_index_key(
    item_token: &str,
    value: &str,
    distkey: Option<(&str, &str)>,
    self_id: &str,
) -> Result<Vec<u8>> {
    check_token("item token", item_token)?;
    check_component("value", value)?;
    check_token("self id", self_id)?;

    let mut key = value_prefix(item_token, value);
    if let Some((dk_token, dk_value)) = distkey {
        check_token("distkey token", dk_token)?;
        check_component("distkey value", dk_value)?;
        key.extend_from_slice(dk_token.as_bytes());
        key.push(DSEP);
        key.extend_from_slice(dk_value.as_bytes());
    }
    key.push(SEP);
    key.extend_from_slice(self_id.as_bytes());
    Ok(key)
}

/// Decodes an index key into its components.
///
/// # Errors
///
/// Returns [`StoreError::Corrupt`](crate::StoreError::Corrupt) if the key is not
/// UTF-8 or does not have the index key layout.
pub fn decode_key(key: &[u8]) -> Result<DecodedKey> {
    let text = key_str(key)?;
    let parts: Vec<&str> = text.split(SEP as char).collect();
    let [item_token, value, distkey, self_id] = parts.as_slice() else {
        return CorruptSnafu {
            message: format!("index key has {} components, expected 4: {text:?}", parts.len()),
        }
        .fail();
    };
    let distkey = if distkey.is_empty() {
        None
    } else {
        let Some((token, value)) = distkey.split_once(DSEP as char) else {
            return CorruptSnafu { message: format!("distkey component lacks DSEP: {text:?}") }
                .fail();
        };
        Some((token.to_string(), value.to_string()))
    };
    Ok(DecodedKey {
        item_token: (*item_token).to_string(),
        value: (*value).to_string(),
        distkey,
        self_id: (*self_id).to_string(),
    })
}

/// Interprets stored key bytes as UTF-8.
///
/// # Errors
///
/// Returns [`StoreError::Corrupt`](crate::StoreError::Corrupt) on invalid UTF-8.
pub fn key_str(key: &[u8]) -> Result<&str> {
    std::str::from_utf8(key)
        .map_err(|e| CorruptSnafu { message: format!("key is not UTF-8: {e}") }.build())
}

/// Smallest key greater than every key starting with `prefix`.
///
/// Increments the last byte that is not `0xFF` and truncates after it. An
/// all-`0xFF` prefix has no successor within its length, so [`HIGH`] is appended.
#[must_use]
pub fn range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(&last) = end.last() {
        if last < 0xFF {
            if let Some(b) = end.last_mut() {
                *b = last + 1;
            }
            return end;
        }
        end.pop();
    }
    let mut end = prefix.to_vec();
    end.push(HIGH);
    end
}

/// `{token} SEP {value} SEP`: every record of one value.
#[must_use]
pub fn value_prefix(item_token: &str, value: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(item_token.len() + value.len() + 2);
    key.extend_from_slice(item_token.as_bytes());
    key.push(SEP);
    key.extend_from_slice(value.as_bytes());
    key.push(SEP);
    key
}

/// `{token} SEP {value} SEP {dk_token} DSEP {dk_value} SEP`: one DISTKEY partition of one value.
#[must_use]
pub fn distkey_prefix(item_token: &str, value: &str, dk_token: &str, dk_value: &str) -> Vec<u8> {
    let mut key = value_prefix(item_token, value);
    key.extend_from_slice(dk_token.as_bytes());
    key.push(DSEP);
    key.extend_from_slice(dk_value.as_bytes());
    key.push(SEP);
    key
}

/// `{token} SEP VALUE_START`: sorts before every record of the item.
#[must_use]
pub fn item_start(item_token: &str) -> Vec<u8> {
    let mut key = item_token.as_bytes().to_vec();
    key.push(SEP);
    key.push(VALUE_START);
    key
}

/// Exclusive end of every record of the item.
#[must_use]
pub fn item_end(item_token: &str) -> Vec<u8> {
    let mut key = item_token.as_bytes().to_vec();
    key.push(SEP);
    range_end(&key)
}

/// `{token} SEP {partial}`: start of a forward match.
#[must_use]
pub fn forward_match_start(item_token: &str, partial: &str) -> Vec<u8> {
    let mut key = item_token.as_bytes().to_vec();
    key.push(SEP);
    key.extend_from_slice(partial.as_bytes());
    key
}

/// `{token} SEP {partial} HIGH`: exclusive end of a forward match.
#[must_use]
pub fn forward_match_end(item_token: &str, partial: &str) -> Vec<u8> {
    let mut key = forward_match_start(item_token, partial);
    key.push(HIGH);
    key
}

/// `{token} SEP {value} LESS_THAN`: exclusive end that keeps every record of `value`.
#[must_use]
pub fn less_than_end(item_token: &str, value: &str) -> Vec<u8> {
    let mut key = forward_match_start(item_token, value);
    key.push(LESS_THAN);
    key
}

/// The logical prefix of a key: everything before the second [`SEP`].
///
/// For an index key this is `{token} SEP {value}`. For a bound ending in
/// [`LESS_THAN`] or [`SEP`] the terminator is trimmed, so a bound and the
/// records of its value share a logical prefix.
#[must_use]
pub fn logical_prefix(key: &[u8]) -> &[u8] {
    let mut seps = key.iter().enumerate().filter(|(_, b)| **b == SEP).map(|(i, _)| i);
    let first = seps.next();
    match (first, seps.next()) {
        (_, Some(second)) => &key[..second],
        (Some(_), None) => match key.last() {
            Some(&LESS_THAN) => &key[..key.len() - 1],
            _ => key,
        },
        (None, None) => key,
    }
}

/// Whether the key's DISTKEY partition equals `(dk_token, dk_value)`.
///
/// Works on raw bytes so partition filtering never allocates.
#[must_use]
pub fn has_distkey(key: &[u8], dk_token: &str, dk_value: &str) -> bool {
    let mut parts = key.split(|b| *b == SEP);
    let component = parts.nth(2).unwrap_or_default();
    let mut expected = dk_token.as_bytes().to_vec();
    expected.push(DSEP);
    expected.extend_from_slice(dk_value.as_bytes());
    component == expected.as_slice()
}
