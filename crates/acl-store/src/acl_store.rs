//! AclStore - ACL backend over a document database.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::backend::AclBackend;
use crate::codec::{self, AclKey};
use crate::config::AclStoreConfig;
use crate::error::Result;
use crate::naming::NameSanitizer;
use crate::record::{self, Record};
use crate::resolver::{CollectionMode, CollectionResolver};
use crate::store::{DocumentClient, DocumentDatabase};
use crate::transaction::{Operation, Transaction};

/// ACL backend storing each record as a document.
///
/// In per-bucket mode every bucket gets its own collection named
/// `{prefix}{sanitized bucket}`. In single-collection mode every bucket lives
/// in `{prefix}resources` and rows carry a `_bucketname` discriminator.
///
/// # Example
///
/// ```rust,no_run
/// use acl_store::{AclBackend, AclKey, AclStore, AclStoreConfig};
///
/// # async fn example() -> acl_store::Result<()> {
/// let acl = AclStore::connect(&AclStoreConfig::default()).await?;
///
/// let mut tx = acl.begin();
/// acl.add(&mut tx, "roles", &"admin".into(), &["users".into(), "blogs".into()])?;
/// acl.end(tx).await?;
///
/// let values = acl.get("roles", &AclKey::from("admin")).await?;
/// assert_eq!(values, vec!["blogs", "users"]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AclStore {
    client: Arc<dyn DocumentClient>,
    resolver: CollectionResolver,
}

impl AclStore {
    /// Wire the backend to an open client.
    ///
    /// # Arguments
    /// * `client` - Connection to the document database
    /// * `database` - Database to use; the client's own database when `None`
    /// * `config` - Prefix and mode settings (`config.store` is not consulted)
    pub fn new(
        client: Arc<dyn DocumentClient>,
        database: Option<Arc<dyn DocumentDatabase>>,
        config: &AclStoreConfig,
    ) -> Self {
        let database = database.unwrap_or_else(|| client.database());
        let resolver = CollectionResolver::new(
            database,
            config.prefix.clone(),
            config.mode(),
            NameSanitizer::new(config.raw_collection_names),
        );
        Self { client, resolver }
    }

    /// Open the configured document store and wire the backend to it.
    pub async fn connect(config: &AclStoreConfig) -> Result<Self> {
        let client = config.store.connect().await?;
        info!(
            prefix = %config.prefix,
            single_collection = config.single_collection,
            "acl store connected"
        );
        Ok(Self::new(client, None, config))
    }

    pub fn mode(&self) -> CollectionMode {
        self.resolver.mode()
    }

    pub fn resolver(&self) -> &CollectionResolver {
        &self.resolver
    }
}

#[async_trait]
impl AclBackend for AclStore {
    type Transaction = Transaction;

    fn begin(&self) -> Transaction {
        Transaction::new()
    }

    async fn end(&self, transaction: Transaction) -> Result<()> {
        transaction.commit().await
    }

    /// Drops every collection in the database, not only ACL ones.
    async fn clean(&self) -> Result<()> {
        let database = self.resolver.database();
        let names = database.list_collections().await?;

        let results = join_all(names.iter().map(|name| database.drop_collection(name))).await;
        self.resolver.invalidate();

        let mut first_error = None;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                warn!(collection = %name, error = %e, "failed to drop collection");
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e.into());
        }

        info!(dropped = names.len(), "storage cleaned");
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &AclKey) -> Result<Vec<String>> {
        let resolved = self.resolver.resolve(bucket)?;
        let filter = resolved.scope.key_filter(key.encode());

        let doc = resolved
            .collection
            .find_one(&filter, &resolved.scope.projection())
            .await?;

        let Some(doc) = doc else {
            debug!(bucket, %key, "no record");
            return Ok(Vec::new());
        };
        Record::from_document(doc).decoded_values()
    }

    async fn union(&self, bucket: &str, keys: &[AclKey]) -> Result<Vec<String>> {
        let resolved = self.resolver.resolve(bucket)?;
        let filter = resolved.scope.keys_filter(codec::encode_all(keys));

        let docs = resolved
            .collection
            .find(&filter, &resolved.scope.projection())
            .await?;
        debug!(bucket, keys = keys.len(), records = docs.len(), "union lookup");

        let fields: BTreeSet<String> = docs
            .into_iter()
            .flat_map(|doc| Record::from_document(doc).values)
            .collect();
        let decoded: BTreeSet<String> = fields
            .iter()
            .map(|field| codec::decode(field))
            .collect::<Result<_>>()?;
        Ok(decoded.into_iter().collect())
    }

    /// Adding no values queues nothing, so the key is not created.
    fn add(
        &self,
        transaction: &mut Transaction,
        bucket: &str,
        key: &AclKey,
        values: &[AclKey],
    ) -> Result<()> {
        record::validate_key(key)?;
        let fields = record::value_fields(values)?;
        let resolved = self.resolver.resolve(bucket)?;
        if fields.is_empty() {
            return Ok(());
        }

        transaction.push(
            resolved.collection.clone(),
            Operation::Update {
                filter: resolved.scope.key_filter(key.encode()),
                update: record::grant(&fields),
                upsert: true,
            },
        );
        transaction.push(
            resolved.collection,
            Operation::CreateIndex {
                fields: resolved.scope.index_fields(),
            },
        );
        debug!(bucket, %key, values = fields.len(), "queued add");
        Ok(())
    }

    fn del(&self, transaction: &mut Transaction, bucket: &str, keys: &[AclKey]) -> Result<()> {
        let resolved = self.resolver.resolve(bucket)?;

        transaction.push(
            resolved.collection,
            Operation::Delete {
                filter: resolved.scope.keys_filter(codec::encode_all(keys)),
            },
        );
        debug!(bucket, keys = keys.len(), "queued delete");
        Ok(())
    }

    /// Removing from a key that does not exist is a no-op; no empty record
    /// is created.
    fn remove(
        &self,
        transaction: &mut Transaction,
        bucket: &str,
        key: &AclKey,
        values: &[AclKey],
    ) -> Result<()> {
        let fields = record::value_fields(values)?;
        let resolved = self.resolver.resolve(bucket)?;
        if fields.is_empty() {
            return Ok(());
        }

        transaction.push(
            resolved.collection,
            Operation::Update {
                filter: resolved.scope.key_filter(key.encode()),
                update: record::revoke(&fields),
                upsert: false,
            },
        );
        debug!(bucket, %key, values = fields.len(), "queued remove");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.client.close().await?;
        self.resolver.invalidate();
        info!("acl store closed");
        Ok(())
    }
}
