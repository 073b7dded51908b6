//! Bucket to collection resolution.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{AclStoreError, Result};
use crate::naming::NameSanitizer;
use crate::record::BucketScope;
use crate::store::{Collection, DocumentDatabase};

/// Collection shared by every bucket in single-collection mode.
pub const SHARED_COLLECTION: &str = "resources";

/// How buckets map onto collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionMode {
    /// One collection per bucket
    #[default]
    PerBucket,
    /// A single collection; rows carry a bucket discriminator
    Single,
}

/// A bucket's collection handle and the scope selecting its rows.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub collection: Arc<dyn Collection>,
    pub scope: BucketScope,
}

/// Resolves and caches collection handles per bucket.
///
/// The mode, prefix and sanitizer are fixed at construction, so the bucket
/// name alone keys the cache.
#[derive(Debug)]
pub struct CollectionResolver {
    database: Arc<dyn DocumentDatabase>,
    prefix: String,
    mode: CollectionMode,
    sanitizer: NameSanitizer,
    cache: RwLock<HashMap<String, Arc<dyn Collection>>>,
}

impl CollectionResolver {
    pub fn new(
        database: Arc<dyn DocumentDatabase>,
        prefix: impl Into<String>,
        mode: CollectionMode,
        sanitizer: NameSanitizer,
    ) -> Self {
        Self {
            database,
            prefix: prefix.into(),
            mode,
            sanitizer,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> CollectionMode {
        self.mode
    }

    pub fn database(&self) -> &Arc<dyn DocumentDatabase> {
        &self.database
    }

    /// Physical collection name for a bucket.
    pub fn collection_name(&self, bucket: &str) -> Result<String> {
        let name = match self.mode {
            CollectionMode::Single => self.sanitizer.sanitize(SHARED_COLLECTION)?,
            CollectionMode::PerBucket => self.sanitizer.sanitize(bucket)?,
        };
        Ok(format!("{}{}", self.prefix, name))
    }

    pub fn scope(&self, bucket: &str) -> BucketScope {
        match self.mode {
            CollectionMode::Single => BucketScope::Shared(bucket.to_string()),
            CollectionMode::PerBucket => BucketScope::Collection,
        }
    }

    pub fn resolve(&self, bucket: &str) -> Result<Resolved> {
        let scope = self.scope(bucket);
        let cache_key = match self.mode {
            CollectionMode::Single => SHARED_COLLECTION,
            CollectionMode::PerBucket => bucket,
        };

        if let Some(collection) = self.cache.read().get(cache_key) {
            return Ok(Resolved {
                collection: collection.clone(),
                scope,
            });
        }

        let name = self.collection_name(bucket)?;
        let collection = self.database.collection(&name).map_err(|source| {
            AclStoreError::CollectionNotFound {
                collection: name.clone(),
                source,
            }
        })?;
        debug!(bucket, collection = %name, "resolved collection");

        self.cache
            .write()
            .insert(cache_key.to_string(), collection.clone());
        Ok(Resolved { collection, scope })
    }

    /// Forget every cached handle.
    pub fn invalidate(&self) {
        self.cache.write().clear();
    }

    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }
}
