//! Backend configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AclStoreError, Result};
use crate::resolver::CollectionMode;
use crate::store::DocumentStoreConfig;

pub const DEFAULT_PREFIX: &str = "acl_";

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

/// Settings for an [`AclStore`](crate::AclStore).
///
/// ```toml
/// prefix = "acl_"
/// single_collection = false
/// raw_collection_names = false
///
/// [store]
/// type = "sqlite"
/// path = "/var/lib/acl/acl.db"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AclStoreConfig {
    /// Prepended to every collection name
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Keep every bucket in one shared collection
    pub single_collection: bool,
    /// Use bucket names as collection names without sanitizing them
    pub raw_collection_names: bool,
    /// Document store to connect to
    pub store: DocumentStoreConfig,
}

impl Default for AclStoreConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            single_collection: false,
            raw_collection_names: false,
            store: DocumentStoreConfig::default(),
        }
    }
}

impl AclStoreConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| AclStoreError::InvalidConfig(e.to_string()))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            AclStoreError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn mode(&self) -> CollectionMode {
        if self.single_collection {
            CollectionMode::Single
        } else {
            CollectionMode::PerBucket
        }
    }
}
