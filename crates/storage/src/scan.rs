//! Range scans with pagination and a fetch budget.
//!
//! A scan walks a [`ScanRange`] in ascending key order. Every cursor advance
//! inside the bounds costs one unit of the fetch budget, including positions
//! that are filtered or de-duplicated. Running out of budget is a normal
//! outcome: the page comes back with `fetch_exceeded` set and a pointer that
//! resumes at the first unvisited position.

use std::collections::HashMap;

use redb::ReadableTable;
use tagindex_types::{FetchEntry, FetchResult};
use tracing::debug;

use crate::{
    condition::ScanRange,
    error::{CorruptSnafu, Result},
    keys::key_str,
    pointer::encode_pointer,
    store::TableCursor,
};

/// Entity ids already returned while merging several scans.
///
/// Positions are assigned in admission order. An id is skipped when it already
/// holds a position, which is always earlier than or equal to the current one.
#[derive(Debug, Default, Clone)]
pub struct DedupCache {
    positions: HashMap<String, usize>,
}

impl DedupCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id` and returns whether it is new.
    pub fn admit(&mut self, id: &str) -> bool {
        if self.positions.contains_key(id) {
            return false;
        }
        let position = self.positions.len();
        self.positions.insert(id.to_string(), position);
        true
    }

    /// Position assigned to `id`, if admitted.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Number of admitted ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether nothing was admitted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Admits every record of `range` up to and including `through`, in key order.
    ///
    /// Rebuilds the state an earlier page left behind. Nothing is charged to a
    /// fetch budget.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`](crate::StoreError::Corrupt) if a record
    /// value is not UTF-8, or a store error if the cursor fails.
    pub fn replay<T>(&mut self, table: &T, range: &ScanRange, through: Option<&[u8]>) -> Result<()>
    where
        T: ReadableTable<&'static [u8], &'static [u8]>,
    {
        let mut cursor = TableCursor::open(table);
        cursor.seek(&range.start)?;
        while let Some((key, value)) = cursor.next_entry()? {
            if range.is_past_end(&key) || through.is_some_and(|t| key.as_slice() > t) {
                break;
            }
            if range.is_excluded(&key) {
                continue;
            }
            let value = String::from_utf8(value).map_err(|e| {
                CorruptSnafu { message: format!("record value is not UTF-8: {e}") }.build()
            })?;
            self.admit(&value);
        }
        cursor.close();
        Ok(())
    }
}

/// Parameters of one scan call.
#[derive(Debug, Clone, Copy)]
pub struct ScanRequest<'a> {
    /// Bounds and filters.
    pub range: &'a ScanRange,
    /// Key to resume after; `None` starts at the range start.
    pub resume: Option<&'a [u8]>,
    /// Page size; `None` scans until the range or budget ends.
    pub limit: Option<usize>,
    /// Count matches instead of collecting them.
    pub count_only: bool,
}

impl<'a> ScanRequest<'a> {
    /// A request for the whole range with no page limit.
    #[must_use]
    pub fn new(range: &'a ScanRange) -> Self {
        Self { range, resume: None, limit: None, count_only: false }
    }
}

/// One page of scan output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Matched entries in key order; empty for count-only scans.
    pub entries: Vec<FetchEntry>,
    /// Number of matched positions.
    pub matched: u64,
    /// Cursor advances spent.
    pub advanced: u32,
    /// Whether the fetch budget ran out.
    pub fetch_exceeded: bool,
    /// Key to resume after; `None` when the range is exhausted.
    pub resume: Option<Vec<u8>>,
}

impl ScanPage {
    /// Converts the page into its wire form.
    #[must_use]
    pub fn into_fetch_result(self, count_only: bool) -> FetchResult {
        FetchResult {
            entries: self.entries,
            pointer: self.resume.as_deref().map(encode_pointer),
            fetch_exceeded: self.fetch_exceeded,
            count: count_only.then_some(self.matched),
        }
    }
}

/// Cursor-based range scanner.
#[derive(Debug, Clone, Copy)]
pub struct RangeQueryEngine {
    fetch_limit: u32,
}

impl RangeQueryEngine {
    /// Creates a scanner with the given per-call fetch budget.
    #[must_use]
    pub fn new(fetch_limit: u32) -> Self {
        Self { fetch_limit }
    }

    /// Per-call fetch budget.
    #[must_use]
    pub fn fetch_limit(&self) -> u32 {
        self.fetch_limit
    }

    /// Scans one page using the full fetch budget.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`](crate::StoreError::Corrupt) if a visited key
    /// or value is not UTF-8, or a store error if the cursor fails.
    pub fn scan<T>(
        &self,
        table: &T,
        request: ScanRequest<'_>,
        dedup: Option<&mut DedupCache>,
    ) -> Result<ScanPage>
    where
        T: ReadableTable<&'static [u8], &'static [u8]>,
    {
        self.scan_with_budget(table, request, dedup, self.fetch_limit)
    }

    /// Scans one page spending at most `budget` cursor advances.
    ///
    /// # Errors
    ///
    /// See [`scan`](Self::scan).
    pub fn scan_with_budget<T>(
        &self,
        table: &T,
        request: ScanRequest<'_>,
        mut dedup: Option<&mut DedupCache>,
        budget: u32,
    ) -> Result<ScanPage>
    where
        T: ReadableTable<&'static [u8], &'static [u8]>,
    {
        let range = request.range;
        let mut page = ScanPage::default();

        let mut cursor = TableCursor::open(table);
        let resume = request.resume.filter(|k| *k >= range.start.as_slice());
        cursor.seek(resume.unwrap_or(&range.start))?;

        let mut last: Option<Vec<u8>> = None;
        let mut page_full = false;
        while let Some((key, value)) = cursor.next_entry()? {
            if range.is_past_end(&key) {
                break;
            }
            // The resume key itself was counted by the call that returned it.
            if resume.is_some_and(|r| r == key.as_slice()) {
                continue;
            }
            if page.advanced >= budget {
                page.fetch_exceeded = true;
                break;
            }
            page.advanced += 1;
            let key_text = key_str(&key)?.to_string();

            let excluded = range.is_excluded(&key);
            last = Some(key);
            if excluded {
                continue;
            }

            let value = String::from_utf8(value).map_err(|e| {
                CorruptSnafu { message: format!("record value is not UTF-8: {e}") }.build()
            })?;
            if let Some(cache) = dedup.as_deref_mut() {
                if !cache.admit(&value) {
                    continue;
                }
            }

            page.matched += 1;
            if !request.count_only {
                page.entries.push(FetchEntry { key: key_text, value });
            }
            if request.limit.is_some_and(|limit| page.matched as usize >= limit) {
                page_full = true;
                break;
            }
        }
        cursor.close();

        if page_full || page.fetch_exceeded {
            // With no position visited, resume where this call started.
            page.resume = last.or_else(|| Some(resume.unwrap_or(&range.start).to_vec()));
        }
        if page.fetch_exceeded {
            debug!(advanced = page.advanced, matched = page.matched, "Scan fetch budget exhausted");
        }
        Ok(page)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;
    use tagindex_test_utils::strategies::arb_self_id_set;
    use tagindex_types::Operator;

    use super::*;
    use crate::{
        condition::Condition,
        engine::StorageEngine,
        keys::{encode_index_key, value_prefix},
        pointer::decode_pointer,
        tables::Tables,
    };

    fn engine_with(records: &[(&str, &str, Option<(&str, &str)>, &str)]) -> StorageEngine {
        let engine = StorageEngine::open_in_memory().unwrap();
        let txn = engine.begin_write().unwrap();
        {
            let mut table = txn.open_table(Tables::INDEX).unwrap();
            for (token, value, distkey, id) in records {
                let key = encode_index_key(token, value, *distkey, id).unwrap();
                let uri = format!("/docs/{id}");
                table.insert(key.as_slice(), uri.as_bytes()).unwrap();
            }
        }
        txn.commit().unwrap();
        engine
    }

    fn ids(page: &ScanPage) -> Vec<&str> {
        page.entries.iter().map(|e| e.value.trim_start_matches("/docs/")).collect()
    }

    #[test]
    fn test_prefix_search_pages() {
        let engine = engine_with(&[
            ("7", "foo", None, "a"),
            ("7", "foo", None, "b"),
            ("7", "foo", None, "c"),
            ("7", "fop", None, "d"),
        ]);
        let txn = engine.begin_read().unwrap();
        let table = txn.open_table(Tables::INDEX).unwrap();
        let scanner = RangeQueryEngine::new(1000);
        let range = ScanRange::prefix(value_prefix("7", "foo"));

        let first = scanner
            .scan(&table, ScanRequest { limit: Some(2), ..ScanRequest::new(&range) }, None)
            .unwrap();
        assert_eq!(ids(&first), vec!["a", "b"]);
        let pointer = first.clone().into_fetch_result(false).pointer.expect("more pages");
        assert!(!pointer.is_empty());

        let resume = decode_pointer(&pointer).unwrap();
        let second = scanner
            .scan(
                &table,
                ScanRequest { resume: resume.as_deref(), limit: Some(2), ..ScanRequest::new(&range) },
                None,
            )
            .unwrap();
        assert_eq!(ids(&second), vec!["c"]);
        assert_eq!(second.into_fetch_result(false).pointer, None);
    }

    #[test]
    fn test_fetch_budget_partial_result() {
        let records: Vec<(String, String)> =
            (0..10).map(|i| ("v".to_string(), format!("id{i:02}"))).collect();
        let refs: Vec<(&str, &str, Option<(&str, &str)>, &str)> =
            records.iter().map(|(v, id)| ("3", v.as_str(), None, id.as_str())).collect();
        let engine = engine_with(&refs);
        let txn = engine.begin_read().unwrap();
        let table = txn.open_table(Tables::INDEX).unwrap();
        let scanner = RangeQueryEngine::new(4);
        let range = ScanRange::prefix(value_prefix("3", "v"));

        let mut seen = Vec::new();
        let mut resume: Option<Vec<u8>> = None;
        let mut calls = 0;
        loop {
            calls += 1;
            let page = scanner
                .scan(&table, ScanRequest { resume: resume.as_deref(), ..ScanRequest::new(&range) }, None)
                .unwrap();
            assert!(page.advanced <= 4);
            seen.extend(ids(&page).into_iter().map(str::to_string));
            if !page.fetch_exceeded {
                assert!(page.resume.is_none());
                break;
            }
            assert_eq!(page.entries.len(), 4);
            resume = page.resume;
        }
        assert_eq!(calls, 3);
        let expected: Vec<String> = (0..10).map(|i| format!("id{i:02}")).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_filtered_positions_consume_budget() {
        let engine = engine_with(&[
            ("1", "v", Some(("9", "eu")), "a"),
            ("1", "v", Some(("9", "eu")), "b"),
            ("1", "v", Some(("9", "us")), "c"),
        ]);
        let txn = engine.begin_read().unwrap();
        let table = txn.open_table(Tables::INDEX).unwrap();
        let range = Condition::new(Operator::Ge, Some("v".to_string()))
            .with_distkey("9", "us")
            .compile("1")
            .unwrap();

        let page = RangeQueryEngine::new(2).scan(&table, ScanRequest::new(&range), None).unwrap();
        assert!(page.fetch_exceeded);
        assert!(page.entries.is_empty());

        let page = RangeQueryEngine::new(3).scan(&table, ScanRequest::new(&range), None).unwrap();
        assert!(!page.fetch_exceeded);
        assert_eq!(ids(&page), vec!["c"]);
    }

    #[test]
    fn test_gt_spends_no_budget_on_equal_values() {
        let engine = engine_with(&[
            ("1", "v", None, "a"),
            ("1", "v", None, "b"),
            ("1", "v", None, "c"),
            ("1", "w", None, "d"),
        ]);
        let txn = engine.begin_read().unwrap();
        let table = txn.open_table(Tables::INDEX).unwrap();
        let range = Condition::new(Operator::Gt, Some("v".to_string())).compile("1").unwrap();

        let page = RangeQueryEngine::new(1).scan(&table, ScanRequest::new(&range), None).unwrap();
        assert!(!page.fetch_exceeded);
        assert_eq!(page.advanced, 1);
        assert_eq!(ids(&page), vec!["d"]);
    }

    #[test]
    fn test_replay_rebuilds_cache_up_to_key() {
        let engine = engine_with(&[("1", "x", None, "a"), ("1", "x", None, "b"), ("1", "x", None, "c")]);
        let txn = engine.begin_read().unwrap();
        let table = txn.open_table(Tables::INDEX).unwrap();
        let range = ScanRange::prefix(value_prefix("1", "x"));
        let through = encode_index_key("1", "x", None, "b").unwrap();

        let mut cache = DedupCache::new();
        cache.replay(&table, &range, Some(&through)).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.position("/docs/c").is_none());

        let mut all = DedupCache::new();
        all.replay(&table, &range, None).unwrap();
        assert_eq!(all.position("/docs/c"), Some(2));
    }

    #[test]
    fn test_dedup_cache_skips_seen_entities() {
        let engine = engine_with(&[
            ("1", "alpha", None, "a"),
            ("1", "alpha", None, "b"),
            ("1", "beta", None, "b"),
            ("1", "beta", None, "c"),
        ]);
        let txn = engine.begin_read().unwrap();
        let table = txn.open_table(Tables::INDEX).unwrap();
        let scanner = RangeQueryEngine::new(100);
        let mut cache = DedupCache::new();

        let alpha = ScanRange::prefix(value_prefix("1", "alpha"));
        let beta = ScanRange::prefix(value_prefix("1", "beta"));
        let first = scanner.scan(&table, ScanRequest::new(&alpha), Some(&mut cache)).unwrap();
        let second = scanner.scan(&table, ScanRequest::new(&beta), Some(&mut cache)).unwrap();
        assert_eq!(ids(&first), vec!["a", "b"]);
        assert_eq!(ids(&second), vec!["c"]);
        assert_eq!(second.advanced, 2, "deduplicated position still costs budget");
        assert_eq!(cache.position("/docs/c"), Some(2));
    }

    #[test]
    fn test_count_only() {
        let engine = engine_with(&[("1", "x", None, "a"), ("1", "x", None, "b")]);
        let txn = engine.begin_read().unwrap();
        let table = txn.open_table(Tables::INDEX).unwrap();
        let range = ScanRange::prefix(value_prefix("1", "x"));
        let page = RangeQueryEngine::new(100)
            .scan(&table, ScanRequest { count_only: true, ..ScanRequest::new(&range) }, None)
            .unwrap();
        let result = page.into_fetch_result(true);
        assert_eq!(result.count, Some(2));
        assert!(result.entries.is_empty());
    }

    #[test]
    fn test_non_utf8_value_is_corruption() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let key = encode_index_key("1", "x", None, "a").unwrap();
        let txn = engine.begin_write().unwrap();
        {
            let mut table = txn.open_table(Tables::INDEX).unwrap();
            table.insert(key.as_slice(), &[0xffu8, 0xfe][..]).unwrap();
        }
        txn.commit().unwrap();

        let txn = engine.begin_read().unwrap();
        let table = txn.open_table(Tables::INDEX).unwrap();
        let range = ScanRange::prefix(value_prefix("1", "x"));
        let err = RangeQueryEngine::new(10).scan(&table, ScanRequest::new(&range), None).unwrap_err();
        assert!(matches!(err, crate::StoreError::Corrupt { .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_limit_one_pagination_matches_full_scan(
            ids in arb_self_id_set(20),
            other in arb_self_id_set(5),
            fetch_limit in 1u32..8,
        ) {
            let mut records: Vec<(&str, &str, Option<(&str, &str)>, &str)> =
                ids.iter().map(|id| ("4", "same", None, id.as_str())).collect();
            records.extend(other.iter().map(|id| ("4", "samf", None, id.as_str())));
            let engine = engine_with(&records);
            let txn = engine.begin_read().unwrap();
            let table = txn.open_table(Tables::INDEX).unwrap();
            let range = ScanRange::prefix(value_prefix("4", "same"));

            let full = RangeQueryEngine::new(1000)
                .scan(&table, ScanRequest::new(&range), None)
                .unwrap();
            prop_assert!(full.resume.is_none());

            let scanner = RangeQueryEngine::new(fetch_limit);
            let mut paged = Vec::new();
            let mut resume: Option<Vec<u8>> = None;
            for _ in 0..(ids.len() * 4 + 4) {
                let page = scanner.scan(
                    &table,
                    ScanRequest { resume: resume.as_deref(), limit: Some(1), ..ScanRequest::new(&range) },
                    None,
                ).unwrap();
                paged.extend(page.entries);
                match page.resume {
                    Some(next) => resume = Some(next),
                    None => break,
                }
            }
            prop_assert_eq!(paged, full.entries);
        }
    }
}
