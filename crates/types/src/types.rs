//! Shared domain types for tagindex.
//!
//! These types cross crate boundaries: the storage layer persists them, the
//! router ships them between shard nodes, and the server exposes them over HTTP.

use std::{collections::BTreeMap, collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Maximum length of a namespace identifier.
pub const MAX_NAMESPACE_LEN: usize = 64;

/// Tenant namespace identifier.
///
/// Each namespace owns exactly one embedded store environment. The identifier
/// doubles as a file name, so it is restricted to `[A-Za-z0-9_.-]` and may not
/// start with a dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NamespaceId(String);

impl NamespaceId {
    /// Creates a validated namespace identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidInput`] if the identifier is empty, too long,
    /// starts with a dot, or contains characters outside `[A-Za-z0-9_.-]`.
    pub fn new(id: impl Into<String>) -> Result<Self, IndexError> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_NAMESPACE_LEN {
            return Err(IndexError::invalid_input(format!(
                "namespace must be 1-{MAX_NAMESPACE_LEN} characters, got {}",
                id.len()
            )));
        }
        if id.starts_with('.') {
            return Err(IndexError::invalid_input(format!("namespace may not start with '.': {id}")));
        }
        if let Some(c) =
            id.chars().find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(IndexError::invalid_input(format!(
                "namespace contains invalid character {c:?}: {id}"
            )));
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NamespaceId {
    type Error = IndexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NamespaceId> for String {
    fn from(value: NamespaceId) -> Self {
        value.0
    }
}

/// Which index family a record belongs to.
///
/// Each kind has its own table pair on a shard node and its own hash ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Equality/range index over item values.
    Index,
    /// Term index over tokenized item text.
    FullText,
    /// Per-parent child listing, served by a single node.
    Manifest,
}

impl IndexKind {
    /// All index kinds, in routing-table order.
    pub const ALL: [IndexKind; 3] = [IndexKind::Index, IndexKind::FullText, IndexKind::Manifest];

    /// Returns the wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            IndexKind::Index => "index",
            IndexKind::FullText => "fulltext",
            IndexKind::Manifest => "manifest",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexKind {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "index" => Ok(IndexKind::Index),
            "fulltext" => Ok(IndexKind::FullText),
            "manifest" => Ok(IndexKind::Manifest),
            other => Err(IndexError::invalid_input(format!("unknown index kind: {other}"))),
        }
    }
}

/// A DISTKEY category: the partition item and its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Distkey {
    /// DISTKEY item name (e.g. `region`).
    pub item: String,
    /// Partition value (e.g. `us`).
    pub value: String,
}

impl Distkey {
    /// Creates a DISTKEY category.
    pub fn new(item: impl Into<String>, value: impl Into<String>) -> Self {
        Self { item: item.into(), value: value.into() }
    }
}

/// Declared type of an indexed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Values compare as strings.
    #[default]
    Text,
    /// Values compare as signed 64-bit integers.
    Integer,
    /// Values compare as IEEE-754 doubles.
    Float,
}

/// A typed indexed value.
///
/// [`IndexValue::render`] produces a string whose byte order matches the
/// application order of the value, so encoded keys sort correctly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexValue {
    /// A text value, rendered verbatim.
    Text(String),
    /// An integer, rendered as sign-flipped 16-digit hex.
    Integer(i64),
    /// A float, rendered as order-preserving 16-digit hex of its bits.
    Float(f64),
}

impl IndexValue {
    /// Parses a raw item value according to its declared type.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidInput`] if the value does not parse as the
    /// declared type, or is a NaN float.
    pub fn parse(value_type: ValueType, raw: &str) -> Result<Self, IndexError> {
        match value_type {
            ValueType::Text => Ok(IndexValue::Text(raw.to_string())),
            ValueType::Integer => raw
                .trim()
                .parse::<i64>()
                .map(IndexValue::Integer)
                .map_err(|e| IndexError::invalid_input(format!("not an integer {raw:?}: {e}"))),
            ValueType::Float => {
                let v = raw
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| IndexError::invalid_input(format!("not a float {raw:?}: {e}")))?;
                if v.is_nan() {
                    return Err(IndexError::invalid_input("NaN cannot be indexed"));
                }
                Ok(IndexValue::Float(v))
            },
        }
    }

    /// Renders the value into its order-preserving key form.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            IndexValue::Text(s) => s.clone(),
            IndexValue::Integer(v) => format!("{:016x}", (*v as u64) ^ (1 << 63)),
            IndexValue::Float(v) => {
                // -0.0 and 0.0 compare equal and must share one key.
                let bits = if *v == 0.0 { 0 } else { v.to_bits() };
                let ordered = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
                format!("{ordered:016x}")
            },
        }
    }

    /// Reverses [`IndexValue::render`] for a known value type.
    #[must_use]
    pub fn from_rendered(value_type: ValueType, rendered: &str) -> Option<Self> {
        match value_type {
            ValueType::Text => Some(IndexValue::Text(rendered.to_string())),
            ValueType::Integer => {
                let raw = u64::from_str_radix(rendered, 16).ok()?;
                Some(IndexValue::Integer((raw ^ (1 << 63)) as i64))
            },
            ValueType::Float => {
                let ordered = u64::from_str_radix(rendered, 16).ok()?;
                let bits = if ordered >> 63 == 1 { ordered & !(1 << 63) } else { !ordered };
                Some(IndexValue::Float(f64::from_bits(bits)))
            },
        }
    }
}

/// A logical index entry produced by the origin node.
///
/// Carries names rather than shortening tokens; the receiving shard node
/// shortens and encodes it. DISTKEY categories are split into one clone per
/// category before routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Index family.
    pub kind: IndexKind,
    /// Parent path of the entity (e.g. `/docs`).
    pub parent_path: String,
    /// Item name; empty for manifest entries.
    pub item: String,
    /// Rendered value (or full-text term).
    pub value: String,
    /// DISTKEY categories carried by the entity.
    #[serde(default)]
    pub distkeys: Vec<Distkey>,
    /// Last URI segment of the entity.
    pub self_id: String,
    /// Full entity URI, stored as the record value.
    pub entity_uri: String,
}

impl IndexEntry {
    /// Name shortened into the item token: `parent#item`, or the bare parent
    /// path for manifest entries.
    #[must_use]
    pub fn item_name(&self) -> String {
        item_name(&self.parent_path, &self.item)
    }

    /// Returns a copy of this entry restricted to a single DISTKEY category.
    #[must_use]
    pub fn with_distkey(&self, distkey: Distkey) -> Self {
        Self { distkeys: vec![distkey], ..self.clone() }
    }

    /// The single DISTKEY category of a split entry, if any.
    #[must_use]
    pub fn distkey(&self) -> Option<&Distkey> {
        self.distkeys.first()
    }
}

/// Builds the full item name shortened into an item token.
#[must_use]
pub fn item_name(parent_path: &str, item: &str) -> String {
    if item.is_empty() { parent_path.to_string() } else { format!("{parent_path}#{item}") }
}

/// Splits an entity URI into `(parent_path, self_id)`.
///
/// Returns `None` for URIs without a parent segment.
#[must_use]
pub fn split_uri(uri: &str) -> Option<(&str, &str)> {
    let idx = uri.rfind('/')?;
    let (parent, self_id) = (&uri[..idx], &uri[idx + 1..]);
    if self_id.is_empty() {
        return None;
    }
    Some((if parent.is_empty() { "/" } else { parent }, self_id))
}

/// One key/value pair returned by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchEntry {
    /// Encoded index key.
    pub key: String,
    /// Stored value (entity URI for index records).
    pub value: String,
}

/// Result of one page of a range scan.
///
/// `entries` are in scan order. `fetch_exceeded` marks a valid partial page
/// cut short by the fetch budget, resumable through `pointer`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResult {
    /// Entries in scan order.
    pub entries: Vec<FetchEntry>,
    /// Resume pointer; `None` when the range is exhausted.
    #[serde(default)]
    pub pointer: Option<String>,
    /// Whether the fetch budget ran out before the range did.
    #[serde(default)]
    pub fetch_exceeded: bool,
    /// Number of matches for count-only queries.
    #[serde(default)]
    pub count: Option<u64>,
}

impl FetchResult {
    /// An empty, exhausted result.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Entity URIs in scan order.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.value.as_str())
    }
}

/// Comparison operator of a query condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Value equals.
    Eq,
    /// Value strictly less than.
    Lt,
    /// Value less than or equal.
    Le,
    /// Value strictly greater than.
    Gt,
    /// Value greater than or equal.
    Ge,
    /// Value starts with.
    #[serde(rename = "fm")]
    ForwardMatch,
    /// Item has any value.
    Exists,
    /// Text contains any of the query terms.
    #[serde(rename = "ft")]
    FullText,
}

impl Operator {
    /// Returns the wire name of this operator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Lt => "lt",
            Operator::Le => "le",
            Operator::Gt => "gt",
            Operator::Ge => "ge",
            Operator::ForwardMatch => "fm",
            Operator::Exists => "exists",
            Operator::FullText => "ft",
        }
    }
}

impl FromStr for Operator {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(Operator::Eq),
            "lt" => Ok(Operator::Lt),
            "le" => Ok(Operator::Le),
            "gt" => Ok(Operator::Gt),
            "ge" => Ok(Operator::Ge),
            "fm" => Ok(Operator::ForwardMatch),
            "exists" => Ok(Operator::Exists),
            "ft" => Ok(Operator::FullText),
            other => Err(IndexError::invalid_input(format!("unknown operator: {other}"))),
        }
    }
}

/// A structured query against one item of one parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Tenant namespace.
    pub namespace: NamespaceId,
    /// Parent path whose children are searched.
    pub parent_path: String,
    /// Item name; empty for manifest listings.
    pub item: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Comparison value; `None` for `Exists` and manifest listings.
    #[serde(default)]
    pub value: Option<IndexValue>,
    /// DISTKEY partition to restrict to.
    #[serde(default)]
    pub distkey: Option<Distkey>,
    /// Page size; `None` uses the configured default.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Resume pointer from a previous page.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Return only the number of matches.
    #[serde(default)]
    pub count_only: bool,
}

impl QueryRequest {
    /// The index family this query reads.
    #[must_use]
    pub fn kind(&self) -> IndexKind {
        if self.item.is_empty() {
            IndexKind::Manifest
        } else if self.operator == Operator::FullText {
            IndexKind::FullText
        } else {
            IndexKind::Index
        }
    }
}

/// Operation that produced an entity mutation notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// A new entity was stored.
    Insert,
    /// An existing entity was replaced or patched.
    Update,
    /// The entity was removed.
    Delete,
}

/// Point-in-time view of an entity's indexable items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Item name to raw values.
    pub items: BTreeMap<String, Vec<String>>,
}

impl EntitySnapshot {
    /// Builds a snapshot from `(item, value)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut items: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (item, value) in pairs {
            items.entry(item.to_string()).or_default().push(value.to_string());
        }
        Self { items }
    }

    /// Raw values of an item, empty when absent.
    #[must_use]
    pub fn values(&self, item: &str) -> &[String] {
        self.items.get(item).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Notification emitted by the primary store after a committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMutation {
    /// Tenant namespace.
    pub namespace: NamespaceId,
    /// Entity URI (e.g. `/docs/a`).
    pub entity_uri: String,
    /// Snapshot before the write, if the entity existed.
    #[serde(default)]
    pub prior: Option<EntitySnapshot>,
    /// Snapshot after the write; `None` for deletes.
    #[serde(default)]
    pub new: Option<EntitySnapshot>,
    /// Kind of write.
    pub operation: OperationKind,
    /// Items touched by a partial update or delete; `None` means the whole entity.
    #[serde(default)]
    pub partial_items: Option<BTreeSet<String>>,
}

impl EntityMutation {
    /// Whether this mutation only touches a subset of items.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.partial_items.is_some()
    }

    /// Whether this mutation deletes (all or some of) the entity's index.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.operation == OperationKind::Delete
    }
}
