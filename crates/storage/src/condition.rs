//! Query conditions compiled into scan ranges.

use tagindex_types::Operator;

use crate::{
    error::{InvalidKeySnafu, Result},
    keys::{
        self, distkey_prefix, forward_match_end, forward_match_start, item_end, item_start,
        less_than_end, logical_prefix, range_end, value_prefix,
    },
};

/// Bounds and filters of one scan.
///
/// A key is in range when `start <= key < end`, and additionally:
/// - with `exclude_start`, its logical prefix differs from the start's
/// - with `exclude_end`, its logical prefix differs from the end's
/// - with `distkey`, it belongs to that DISTKEY partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRange {
    /// Inclusive lower bound.
    pub start: Vec<u8>,
    /// Exclusive upper bound.
    pub end: Vec<u8>,
    /// Skip records sharing the start bound's logical prefix.
    pub exclude_start: bool,
    /// Skip records sharing the end bound's logical prefix.
    pub exclude_end: bool,
    /// DISTKEY token and value to restrict to.
    pub distkey: Option<(String, String)>,
}

impl ScanRange {
    /// Every key starting with `prefix`.
    #[must_use]
    pub fn prefix(prefix: Vec<u8>) -> Self {
        let end = range_end(&prefix);
        Self { start: prefix, end, exclude_start: false, exclude_end: false, distkey: None }
    }

    /// Whether the scan must stop at `key`.
    #[must_use]
    pub fn is_past_end(&self, key: &[u8]) -> bool {
        key >= self.end.as_slice()
    }

    /// Whether `key` lies inside the bounds but is filtered out.
    #[must_use]
    pub fn is_excluded(&self, key: &[u8]) -> bool {
        if self.exclude_start && logical_prefix(key) == logical_prefix(&self.start) {
            return true;
        }
        if self.exclude_end && logical_prefix(key) == logical_prefix(&self.end) {
            return true;
        }
        match &self.distkey {
            Some((token, value)) => !keys::has_distkey(key, token, value),
            None => false,
        }
    }
}

/// A condition on one item, with tokens already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Comparison operator.
    pub operator: Operator,
    /// Rendered comparison value (or full-text term).
    pub value: Option<String>,
    /// DISTKEY token and value to restrict to.
    pub distkey: Option<(String, String)>,
}

impl Condition {
    /// Creates a condition without a DISTKEY restriction.
    #[must_use]
    pub fn new(operator: Operator, value: Option<String>) -> Self {
        Self { operator, value, distkey: None }
    }

    /// Restricts the condition to one DISTKEY partition.
    #[must_use]
    pub fn with_distkey(mut self, token: impl Into<String>, value: impl Into<String>) -> Self {
        self.distkey = Some((token.into(), value.into()));
        self
    }

    /// Compiles the condition into scan bounds over `item_token`'s records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`](crate::StoreError::InvalidKey) if a
    /// comparison operator has no value or the value contains control characters.
    pub fn compile(&self, item_token: &str) -> Result<ScanRange> {
        let value = match (self.operator, &self.value) {
            (Operator::Exists, _) => "",
            (_, Some(value)) => value.as_str(),
            (op, None) => {
                return InvalidKeySnafu {
                    message: format!("operator {} requires a value", op.as_str()),
                }
                .fail();
            },
        };
        keys::check_component("condition value", value)?;

        let mut range = match self.operator {
            Operator::Eq | Operator::FullText => match &self.distkey {
                Some((dk_token, dk_value)) => {
                    ScanRange::prefix(distkey_prefix(item_token, value, dk_token, dk_value))
                },
                None => ScanRange::prefix(value_prefix(item_token, value)),
            },
            Operator::Gt => {
                self.bounded(range_end(&value_prefix(item_token, value)), item_end(item_token))
            },
            Operator::Ge => self.bounded(value_prefix(item_token, value), item_end(item_token)),
            Operator::Lt => ScanRange {
                exclude_end: true,
                ..self.bounded(item_start(item_token), less_than_end(item_token, value))
            },
            Operator::Le => self.bounded(item_start(item_token), less_than_end(item_token, value)),
            Operator::ForwardMatch => self.bounded(
                forward_match_start(item_token, value),
                forward_match_end(item_token, value),
            ),
            Operator::Exists => self.bounded(item_start(item_token), item_end(item_token)),
        };
        range.distkey.clone_from(&self.distkey);
        Ok(range)
    }

    fn bounded(&self, start: Vec<u8>, end: Vec<u8>) -> ScanRange {
        ScanRange { start, end, exclude_start: false, exclude_end: false, distkey: None }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::keys::encode_index_key;

    /// Keys of `values` under token "5", each with self id "a" and "b".
    fn keys_for(values: &[&str]) -> Vec<(String, Vec<u8>)> {
        values
            .iter()
            .flat_map(|v| {
                ["a", "b"].into_iter().map(move |id| {
                    (v.to_string(), encode_index_key("5", v, None, id).unwrap())
                })
            })
            .collect()
    }

    fn matching(condition: &Condition, values: &[&str]) -> Vec<String> {
        let range = condition.compile("5").unwrap();
        let mut matched: Vec<String> = keys_for(values)
            .into_iter()
            .filter(|(_, key)| {
                key.as_slice() >= range.start.as_slice()
                    && !range.is_past_end(key)
                    && !range.is_excluded(key)
            })
            .map(|(v, _)| v)
            .collect();
        matched.dedup();
        matched
    }

    const VALUES: [&str; 6] = ["", "fo", "foo", "foo bar", "fop", "g"];

    fn cond(op: Operator, v: &str) -> Condition {
        Condition::new(op, Some(v.to_string()))
    }

    #[test]
    fn test_eq() {
        assert_eq!(matching(&cond(Operator::Eq, "foo"), &VALUES), vec!["foo"]);
    }

    #[test]
    fn test_gt_excludes_equal_value_for_every_self_id() {
        assert_eq!(matching(&cond(Operator::Gt, "foo"), &VALUES), vec!["foo bar", "fop", "g"]);
    }

    #[test]
    fn test_gt_starts_past_every_record_of_the_value() {
        let range = cond(Operator::Gt, "foo").compile("5").unwrap();
        assert!(!range.exclude_start);
        for id in ["a", "zzzz"] {
            let equal = encode_index_key("5", "foo", Some(("9", "us")), id).unwrap();
            assert!(equal.as_slice() < range.start.as_slice());
        }
        let next = encode_index_key("5", "foo bar", None, "a").unwrap();
        assert!(next.as_slice() >= range.start.as_slice());
    }

    #[test]
    fn test_exclude_start_skips_records_of_the_start_value() {
        let range = ScanRange {
            exclude_start: true,
            ..ScanRange::prefix(forward_match_start("5", "foo"))
        };
        let equal = encode_index_key("5", "foo", None, "a").unwrap();
        let longer = encode_index_key("5", "foo bar", None, "a").unwrap();
        assert!(range.is_excluded(&equal));
        assert!(!range.is_excluded(&longer));
    }

    #[test]
    fn test_ge() {
        assert_eq!(matching(&cond(Operator::Ge, "foo"), &VALUES), vec!["foo", "foo bar", "fop", "g"]);
    }

    #[test]
    fn test_lt_excludes_equal_value() {
        assert_eq!(matching(&cond(Operator::Lt, "foo"), &VALUES), vec!["", "fo"]);
    }

    #[test]
    fn test_le_includes_equal_value() {
        assert_eq!(matching(&cond(Operator::Le, "foo"), &VALUES), vec!["", "fo", "foo"]);
    }

    #[test]
    fn test_forward_match() {
        assert_eq!(matching(&cond(Operator::ForwardMatch, "foo"), &VALUES), vec!["foo", "foo bar"]);
        assert_eq!(
            matching(&cond(Operator::ForwardMatch, "fo"), &VALUES),
            vec!["fo", "foo", "foo bar", "fop"]
        );
    }

    #[test]
    fn test_exists() {
        assert_eq!(matching(&Condition::new(Operator::Exists, None), &VALUES), VALUES.to_vec());
    }

    #[test]
    fn test_other_item_never_matches() {
        let range = Condition::new(Operator::Exists, None).compile("5").unwrap();
        let other = encode_index_key("50", "foo", None, "a").unwrap();
        let in_bounds = other.as_slice() >= range.start.as_slice() && !range.is_past_end(&other);
        assert!(!in_bounds);
    }

    #[test]
    fn test_distkey_filter() {
        let range = cond(Operator::Ge, "a").with_distkey("9", "us").compile("5").unwrap();
        let us = encode_index_key("5", "b", Some(("9", "us")), "x").unwrap();
        let eu = encode_index_key("5", "b", Some(("9", "eu")), "x").unwrap();
        assert!(!range.is_excluded(&us));
        assert!(range.is_excluded(&eu));
    }

    #[test]
    fn test_eq_with_distkey_narrows_range() {
        let range = cond(Operator::Eq, "b").with_distkey("9", "us").compile("5").unwrap();
        let us = encode_index_key("5", "b", Some(("9", "us")), "x").unwrap();
        let eu = encode_index_key("5", "b", Some(("9", "eu")), "x").unwrap();
        assert!(us.as_slice() >= range.start.as_slice() && !range.is_past_end(&us));
        assert!(eu.as_slice() < range.start.as_slice() || range.is_past_end(&eu));
    }

    #[test]
    fn test_missing_value_rejected() {
        assert!(Condition::new(Operator::Eq, None).compile("5").is_err());
        assert!(cond(Operator::Eq, "bad\u{1}").compile("5").is_err());
    }
}
