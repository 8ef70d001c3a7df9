//! Full-text terms and multi-term scans.
//!
//! Full-text values are split on Unicode word boundaries, lowercased and
//! truncated, and every distinct term becomes one record in the full-text table.
//! A query naming several terms scans them in ascending order against one shared
//! fetch budget and one [`DedupCache`]. A resumed page replays the records before
//! its resume key into the cache, so each entity appears once across all pages.

use std::{cmp::Ordering, collections::BTreeSet};

use redb::ReadableTable;
use tagindex_types::Operator;
use unicode_segmentation::UnicodeSegmentation;

use crate::{
    condition::{Condition, ScanRange},
    error::Result,
    keys::{SEP, key_str},
    scan::{DedupCache, RangeQueryEngine, ScanPage, ScanRequest},
};

/// Truncates `input` to at most `max_len` bytes at a character boundary.
fn truncate_str(input: &str, max_len: usize) -> &str {
    if input.len() <= max_len {
        return input;
    }
    let mut boundary = max_len;
    while boundary > 0 && !input.is_char_boundary(boundary) {
        boundary -= 1;
    }
    &input[..boundary]
}

/// Extracts the distinct terms of `text` in ascending order.
#[must_use]
pub fn tokenize(text: &str, max_len: usize) -> Vec<String> {
    text.unicode_words()
        .map(|word| truncate_str(&word.to_lowercase(), max_len).to_string())
        .filter(|term| !term.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// A full-text query over one item.
#[derive(Debug, Clone)]
pub struct TermQuery<'a> {
    /// Shortened item token.
    pub item_token: &'a str,
    /// Terms to match; any match admits the entity.
    pub terms: Vec<String>,
    /// DISTKEY token and value to restrict to.
    pub distkey: Option<(String, String)>,
}

impl<'a> TermQuery<'a> {
    /// Builds a query from raw query text.
    #[must_use]
    pub fn from_text(item_token: &'a str, text: &str, max_len: usize) -> Self {
        Self { item_token, terms: tokenize(text, max_len), distkey: None }
    }

    /// Scans the terms in order, resuming after `resume`.
    ///
    /// Terms sorting before the term encoded in `resume` were finished by an
    /// earlier page. Their records, and those of the resumed term up to `resume`,
    /// are replayed into the de-dup cache without being returned.
    ///
    /// # Errors
    ///
    /// Returns a store error if a term is not a legal key component or the scan fails.
    pub fn scan<T>(
        &self,
        engine: &RangeQueryEngine,
        table: &T,
        resume: Option<&[u8]>,
        limit: Option<usize>,
        count_only: bool,
    ) -> Result<ScanPage>
    where
        T: ReadableTable<&'static [u8], &'static [u8]>,
    {
        let resume_term = resume.map(resume_term).transpose()?;
        let mut dedup = DedupCache::new();
        let mut page = ScanPage::default();
        let mut resume = resume;

        for term in &self.terms {
            let range = self.term_range(term)?;
            if let (Some(key), Some(current)) = (resume, resume_term) {
                // Entities returned by earlier pages must not come back.
                match term.as_str().cmp(current) {
                    Ordering::Less => {
                        dedup.replay(table, &range, None)?;
                        continue;
                    },
                    Ordering::Equal => dedup.replay(table, &range, Some(key))?,
                    Ordering::Greater => {},
                }
            }

            let budget = engine.fetch_limit().saturating_sub(page.advanced);
            let remaining = limit.map(|l| l.saturating_sub(page.matched as usize));
            let part = engine.scan_with_budget(
                table,
                ScanRequest { range: &range, resume, limit: remaining, count_only },
                Some(&mut dedup),
                budget,
            )?;
            resume = None;

            page.advanced += part.advanced;
            page.matched += part.matched;
            page.entries.extend(part.entries);
            if part.resume.is_some() {
                page.fetch_exceeded = part.fetch_exceeded;
                page.resume = part.resume;
                break;
            }
        }
        Ok(page)
    }

    fn term_range(&self, term: &str) -> Result<ScanRange> {
        let mut condition = Condition::new(Operator::FullText, Some(term.to_string()));
        condition.distkey.clone_from(&self.distkey);
        condition.compile(self.item_token)
    }
}

/// The term a resume key belongs to: the component between the first two separators.
fn resume_term(key: &[u8]) -> Result<&str> {
    let text = key_str(key)?;
    Ok(text.split(SEP as char).nth(1).unwrap_or_default())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{engine::StorageEngine, keys::encode_index_key, tables::Tables};

    #[test]
    fn test_tokenize_words_lowercase_sorted() {
        assert_eq!(tokenize("The quick, brown fox. THE end", 128), vec![
            "brown", "end", "fox", "quick", "the"
        ]);
        assert!(tokenize("  ,.;  ", 128).is_empty());
    }

    #[test]
    fn test_tokenize_truncates_at_char_boundary() {
        assert_eq!(tokenize("abcdef", 3), vec!["abc"]);
        // "é" is two bytes; a 2-byte limit cannot split it.
        assert_eq!(tokenize("aé", 2), vec!["a"]);
        assert_eq!(truncate_str("漢字", 4), "漢");
    }

    fn engine_with(terms: &[(&str, &str)]) -> StorageEngine {
        let engine = StorageEngine::open_in_memory().unwrap();
        let txn = engine.begin_write().unwrap();
        {
            let mut table = txn.open_table(Tables::FULLTEXT).unwrap();
            for (term, id) in terms {
                let key = encode_index_key("8", term, None, id).unwrap();
                let uri = format!("/notes/{id}");
                table.insert(key.as_slice(), uri.as_bytes()).unwrap();
            }
        }
        txn.commit().unwrap();
        engine
    }

    fn values(page: &ScanPage) -> Vec<&str> {
        page.entries.iter().map(|e| e.value.as_str()).collect()
    }

    #[test]
    fn test_multi_term_merge_deduplicates() {
        let engine = engine_with(&[("cat", "a"), ("cat", "b"), ("dog", "b"), ("dog", "c")]);
        let txn = engine.begin_read().unwrap();
        let table = txn.open_table(Tables::FULLTEXT).unwrap();
        let query = TermQuery::from_text("8", "dog CAT", 128);

        let page = query.scan(&RangeQueryEngine::new(100), &table, None, None, false).unwrap();
        assert_eq!(values(&page), vec!["/notes/a", "/notes/b", "/notes/c"]);
        assert!(page.resume.is_none());
    }

    #[test]
    fn test_multi_term_paging_resumes_in_later_term() {
        let engine = engine_with(&[("cat", "a"), ("cat", "b"), ("dog", "c"), ("dog", "d")]);
        let txn = engine.begin_read().unwrap();
        let table = txn.open_table(Tables::FULLTEXT).unwrap();
        let scanner = RangeQueryEngine::new(100);
        let query = TermQuery::from_text("8", "cat dog", 128);

        let first = query.scan(&scanner, &table, None, Some(3), false).unwrap();
        assert_eq!(values(&first), vec!["/notes/a", "/notes/b", "/notes/c"]);
        let resume = first.resume.expect("page is full");

        let second = query.scan(&scanner, &table, Some(&resume), Some(3), false).unwrap();
        assert_eq!(values(&second), vec!["/notes/d"]);
        assert!(second.resume.is_none());
    }

    #[test]
    fn test_single_entry_pages_return_each_entity_once() {
        let engine = engine_with(&[("cat", "a"), ("cat", "b"), ("dog", "a"), ("dog", "c")]);
        let txn = engine.begin_read().unwrap();
        let table = txn.open_table(Tables::FULLTEXT).unwrap();
        let scanner = RangeQueryEngine::new(100);
        let query = TermQuery::from_text("8", "cat dog", 128);

        let full = query.scan(&scanner, &table, None, None, false).unwrap();
        assert_eq!(values(&full), vec!["/notes/a", "/notes/b", "/notes/c"]);

        let mut paged = Vec::new();
        let mut resume: Option<Vec<u8>> = None;
        for _ in 0..10 {
            let page = query.scan(&scanner, &table, resume.as_deref(), Some(1), false).unwrap();
            paged.extend(values(&page).into_iter().map(str::to_string));
            resume = page.resume;
            if resume.is_none() {
                break;
            }
        }
        assert!(resume.is_none(), "paging never finished");
        assert_eq!(paged, values(&full));
    }

    #[test]
    fn test_budget_is_shared_across_terms() {
        let engine = engine_with(&[("cat", "a"), ("cat", "b"), ("dog", "c"), ("dog", "d")]);
        let txn = engine.begin_read().unwrap();
        let table = txn.open_table(Tables::FULLTEXT).unwrap();
        let query = TermQuery::from_text("8", "cat dog", 128);

        let page = query.scan(&RangeQueryEngine::new(3), &table, None, None, false).unwrap();
        assert!(page.fetch_exceeded);
        assert_eq!(page.advanced, 3);
        assert_eq!(values(&page), vec!["/notes/a", "/notes/b", "/notes/c"]);

        let rest = query
            .scan(&RangeQueryEngine::new(3), &table, page.resume.as_deref(), None, false)
            .unwrap();
        assert!(!rest.fetch_exceeded);
        assert_eq!(values(&rest), vec!["/notes/d"]);
    }

    #[test]
    fn test_count_only_counts_distinct_entities() {
        let engine = engine_with(&[("cat", "a"), ("dog", "a"), ("dog", "b")]);
        let txn = engine.begin_read().unwrap();
        let table = txn.open_table(Tables::FULLTEXT).unwrap();
        let query = TermQuery::from_text("8", "cat dog", 128);
        let page = query.scan(&RangeQueryEngine::new(100), &table, None, None, true).unwrap();
        assert_eq!(page.matched, 2);
        assert!(page.entries.is_empty());
    }
}
