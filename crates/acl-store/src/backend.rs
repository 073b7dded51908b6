//! The storage contract consumed by an access-control decision layer.

use async_trait::async_trait;

use crate::codec::AclKey;
use crate::error::Result;

/// Storage backend for ACL buckets.
///
/// Reads run immediately. Writes are queued on a transaction obtained from
/// [`begin`](AclBackend::begin) and applied by [`end`](AclBackend::end).
/// Write methods validate their arguments eagerly, so a call that returns
/// `Ok` has queued its work and a call that returns `Err` has queued nothing.
#[async_trait]
pub trait AclBackend: Send + Sync {
    type Transaction: Send;

    /// Start an empty batch. No I/O happens here.
    fn begin(&self) -> Self::Transaction;

    /// Apply every write queued on the batch.
    async fn end(&self, transaction: Self::Transaction) -> Result<()>;

    /// Remove everything from the storage.
    async fn clean(&self) -> Result<()>;

    /// Value names stored at `key` in `bucket`; empty if there is no such key.
    async fn get(&self, bucket: &str, key: &AclKey) -> Result<Vec<String>>;

    /// Union of the value names stored at each of `keys` in `bucket`.
    async fn union(&self, bucket: &str, keys: &[AclKey]) -> Result<Vec<String>>;

    /// Queue adding `values` to `key` in `bucket`, creating the key if needed.
    /// With no values nothing is queued.
    fn add(
        &self,
        transaction: &mut Self::Transaction,
        bucket: &str,
        key: &AclKey,
        values: &[AclKey],
    ) -> Result<()>;

    /// Queue deleting `keys` from `bucket`.
    fn del(&self, transaction: &mut Self::Transaction, bucket: &str, keys: &[AclKey])
        -> Result<()>;

    /// Queue removing `values` from `key` in `bucket`.
    fn remove(
        &self,
        transaction: &mut Self::Transaction,
        bucket: &str,
        key: &AclKey,
        values: &[AclKey],
    ) -> Result<()>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<()>;
}
