//! Deferred write batches.
//!
//! A [`Transaction`] is an ordered queue of write operations, each bound to
//! the collection it targets. Nothing touches the store until
//! [`Transaction::commit`], which starts every operation at once and waits
//! for all of them.
//!
//! Commit is **not atomic**. Operations run concurrently with no ordering
//! between them, and if one fails its siblings are neither cancelled nor
//! rolled back; the first failure (in queue order) is reported after every
//! operation has settled. Callers that need all-or-nothing semantics must
//! issue compensating writes.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::error::{Result, StoreResult};
use crate::store::{Collection, Filter, Update};

/// A write waiting for commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Update every matching document, inserting one if `upsert` and none match
    Update {
        filter: Filter,
        update: Update,
        upsert: bool,
    },
    /// Ensure an index over the fields exists
    CreateIndex { fields: Vec<String> },
    /// Delete every matching document
    Delete { filter: Filter },
}

impl Operation {
    fn kind(&self) -> &'static str {
        match self {
            Operation::Update { .. } => "update",
            Operation::CreateIndex { .. } => "create_index",
            Operation::Delete { .. } => "delete",
        }
    }
}

struct Deferred {
    collection: Arc<dyn Collection>,
    operation: Operation,
}

impl Deferred {
    async fn run(self) -> StoreResult<()> {
        match &self.operation {
            Operation::Update {
                filter,
                update,
                upsert,
            } => {
                self.collection.update_many(filter, update, *upsert).await?;
            }
            Operation::CreateIndex { fields } => self.collection.create_index(fields).await?,
            Operation::Delete { filter } => {
                self.collection.delete_many(filter).await?;
            }
        }
        Ok(())
    }
}

/// Ordered batch of deferred writes.
///
/// A batch is committed at most once; it cannot be copied and replayed.
///
/// ```compile_fail
/// let tx = acl_store::Transaction::new();
/// let replay = tx.clone();
/// ```
#[derive(Default)]
pub struct Transaction {
    queue: Vec<Deferred>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, collection: Arc<dyn Collection>, operation: Operation) {
        self.queue.push(Deferred {
            collection,
            operation,
        });
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queued operations with the collection each one targets.
    pub fn operations(&self) -> impl Iterator<Item = (&str, &Operation)> {
        self.queue
            .iter()
            .map(|deferred| (deferred.collection.name(), &deferred.operation))
    }

    /// Run every queued operation concurrently and wait for all of them.
    pub async fn commit(self) -> Result<()> {
        let total = self.queue.len();
        let labels: Vec<(String, &'static str)> = self
            .queue
            .iter()
            .map(|d| (d.collection.name().to_string(), d.operation.kind()))
            .collect();

        let results = join_all(self.queue.into_iter().map(Deferred::run)).await;

        let mut first_error = None;
        let mut failed = 0;
        for ((collection, kind), result) in labels.into_iter().zip(results) {
            if let Err(e) = result {
                warn!(%collection, operation = kind, error = %e, "deferred operation failed");
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => {
                warn!(total, failed, "transaction committed with failures");
                Err(e.into())
            }
            None => {
                info!(total, "transaction committed");
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.operations()).finish()
    }
}
