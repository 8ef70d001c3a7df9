//! Proptest strategies for tagindex domain types.
//!
//! Reusable generators for property-based testing across crates. Strategies produce
//! well-formed key components while exploring edge cases through random variation.
//!
//! # Usage
//!
//! ```no_run
//! use tagindex_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(value in strategies::arb_value()) {
//!         // test invariant with a randomly generated value
//!     }
//! }
//! ```

use proptest::prelude::*;
use tagindex_types::IndexValue;

/// Generates a shortening token: a positive decimal integer.
pub fn arb_token() -> impl Strategy<Value = String> {
    (1u64..100_000).prop_map(|t| t.to_string())
}

/// Generates an indexable text value of 0-24 characters.
///
/// Includes spaces, punctuation and non-ASCII letters; never a character below U+0020.
pub fn arb_value() -> impl Strategy<Value = String> {
    "[ a-zA-Z0-9_./:#éü漢-]{0,24}"
}

/// Generates an entity self id of 1-16 characters.
pub fn arb_self_id() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9_-]{0,15}"
}

/// Generates two typed index values of the same variant, smaller first.
///
/// Covers text, any integer, and finite floats including both zeros.
pub fn arb_ordered_value_pair() -> impl Strategy<Value = (IndexValue, IndexValue)> {
    let float = prop_oneof![Just(-0.0f64), Just(0.0f64), -1.0e12f64..1.0e12];
    prop_oneof![
        (arb_value(), arb_value()).prop_map(|(x, y)| {
            let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
            (IndexValue::Text(lo), IndexValue::Text(hi))
        }),
        (any::<i64>(), any::<i64>())
            .prop_map(|(x, y)| (IndexValue::Integer(x.min(y)), IndexValue::Integer(x.max(y)))),
        (float.clone(), float).prop_map(|(x, y)| {
            let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
            (IndexValue::Float(lo), IndexValue::Float(hi))
        }),
    ]
}

/// Generates a distinct, sorted set of self ids.
pub fn arb_self_id_set(max: usize) -> impl Strategy<Value = Vec<String>> {
    proptest::collection::btree_set(arb_self_id(), 1..=max).prop_map(|s| s.into_iter().collect())
}
