//! Table definitions for redb storage.
//!
//! Every namespace environment holds the same set of tables. Index and
//! shortening tables use byte keys; key encoding is handled by the keys module.

use redb::TableDefinition;
use tagindex_types::IndexKind;

/// Byte-keyed table definition.
pub type BytesTable = TableDefinition<'static, &'static [u8], &'static [u8]>;

/// Table definitions for namespace storage.
pub struct Tables;

impl Tables {
    // =========================================================================
    // Index Tables
    // =========================================================================

    /// Plain index: encoded index key → entity URI
    /// Key format: {item_token}SEP{value}SEP[{dk_token}DSEP{dk_value}]SEP{self_id}
    pub const INDEX: BytesTable = TableDefinition::new("index");

    /// Plain index ancestors: entity URI → postcard list of index keys
    pub const INDEX_ANCESTORS: BytesTable = TableDefinition::new("index_ancestors");

    /// Full-text index: encoded term key → entity URI
    /// Same layout as INDEX with the term in the value position.
    pub const FULLTEXT: BytesTable = TableDefinition::new("fulltext");

    /// Full-text ancestors: entity URI → postcard list of term keys
    pub const FULLTEXT_ANCESTORS: BytesTable = TableDefinition::new("fulltext_ancestors");

    /// Manifest: {parent_token}SEPSEPSEP{self_id} → entity URI
    pub const MANIFEST: BytesTable = TableDefinition::new("manifest");

    /// Manifest ancestors: entity URI → postcard list of manifest keys
    pub const MANIFEST_ANCESTORS: BytesTable = TableDefinition::new("manifest_ancestors");

    // =========================================================================
    // Shortening Tables
    // =========================================================================

    /// Item shortening: `parent#item` → decimal token
    pub const ITEM_SHORTENING: BytesTable = TableDefinition::new("item_shortening");

    /// DISTKEY shortening: DISTKEY item name → decimal token
    pub const DISTKEY_SHORTENING: BytesTable = TableDefinition::new("distkey_shortening");

    // =========================================================================
    // Metadata Tables
    // =========================================================================

    /// Sequence counters: key → u64
    /// Keys: "shortening"
    pub const SEQUENCES: TableDefinition<'static, &'static str, u64> =
        TableDefinition::new("sequences");

    /// Record and ancestor tables for an index kind.
    #[must_use]
    pub const fn for_kind(kind: IndexKind) -> (BytesTable, BytesTable) {
        match kind {
            IndexKind::Index => (Self::INDEX, Self::INDEX_ANCESTORS),
            IndexKind::FullText => (Self::FULLTEXT, Self::FULLTEXT_ANCESTORS),
            IndexKind::Manifest => (Self::MANIFEST, Self::MANIFEST_ANCESTORS),
        }
    }

    /// All byte-keyed tables, created when an environment is opened.
    pub const BYTE_TABLES: [BytesTable; 8] = [
        Self::INDEX,
        Self::INDEX_ANCESTORS,
        Self::FULLTEXT,
        Self::FULLTEXT_ANCESTORS,
        Self::MANIFEST,
        Self::MANIFEST_ANCESTORS,
        Self::ITEM_SHORTENING,
        Self::DISTKEY_SHORTENING,
    ];
}
