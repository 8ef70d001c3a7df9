//! Shard node lists per tenant and index kind.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

use super::ConfigError;
use crate::types::NamespaceId;

/// Maximum virtual nodes per physical node on a hash ring.
const MAX_VIRTUAL_NODES: u32 = 1024;

/// Shard nodes serving one tenant.
///
/// The plain index and full-text index each hash over their own node list.
/// The manifest index is served by a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, bon::Builder)]
pub struct TenantShards {
    /// Nodes on the plain index ring.
    #[serde(default)]
    #[schemars(with = "Vec<String>")]
    #[builder(default)]
    pub index_nodes: Vec<Url>,
    /// Nodes on the full-text ring.
    #[serde(default)]
    #[schemars(with = "Vec<String>")]
    #[builder(default)]
    pub fulltext_nodes: Vec<Url>,
    /// The manifest node.
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub manifest_node: Option<Url>,
    /// Ring positions per physical node.
    #[serde(default = "default_virtual_nodes")]
    #[builder(default = default_virtual_nodes())]
    pub virtual_nodes: u32,
}

impl TenantShards {
    /// Validates node URLs and ring size.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `virtual_nodes` is out of range or
    /// a node URL is not `http`/`https`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.virtual_nodes == 0 || self.virtual_nodes > MAX_VIRTUAL_NODES {
            return Err(ConfigError::Validation {
                message: format!(
                    "virtual_nodes must be 1-{MAX_VIRTUAL_NODES}, got {}",
                    self.virtual_nodes
                ),
            });
        }
        let urls =
            self.index_nodes.iter().chain(&self.fulltext_nodes).chain(self.manifest_node.iter());
        for url in urls {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::Validation {
                    message: format!("shard node URL must be http or https: {url}"),
                });
            }
        }
        Ok(())
    }
}

impl Default for TenantShards {
    fn default() -> Self {
        Self {
            index_nodes: Vec::new(),
            fulltext_nodes: Vec::new(),
            manifest_node: None,
            virtual_nodes: default_virtual_nodes(),
        }
    }
}

fn default_virtual_nodes() -> u32 {
    64
}

/// Shard topology for all tenants.
///
/// Tenants without an entry in `tenants` use `default`.
///
/// # Example
///
/// ```toml
/// [sharding.default]
/// index_nodes = ["http://idx-1:7700", "http://idx-2:7700"]
/// fulltext_nodes = ["http://ft-1:7700"]
/// manifest_node = "http://mf-1:7700"
///
/// [sharding.tenants.acme]
/// index_nodes = ["http://acme-idx:7700"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, bon::Builder)]
pub struct ShardingConfig {
    /// Topology used by tenants without an override.
    #[serde(default)]
    #[builder(default)]
    pub default: TenantShards,
    /// Per-tenant overrides keyed by namespace.
    #[serde(default)]
    #[builder(default)]
    pub tenants: BTreeMap<String, TenantShards>,
}

impl ShardingConfig {
    /// Returns the topology for a namespace.
    #[must_use]
    pub fn for_namespace(&self, namespace: &NamespaceId) -> &TenantShards {
        self.tenants.get(namespace.as_str()).unwrap_or(&self.default)
    }

    /// Validates every topology and tenant key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for an invalid topology or a tenant
    /// key that is not a valid namespace identifier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default.validate()?;
        for (tenant, shards) in &self.tenants {
            if let Err(e) = NamespaceId::new(tenant.as_str()) {
                return Err(ConfigError::Validation {
                    message: format!("invalid tenant key {tenant:?}: {e}"),
                });
            }
            shards.validate()?;
        }
        Ok(())
    }
}
