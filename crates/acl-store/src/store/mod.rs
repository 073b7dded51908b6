//! Document store abstraction (the database driver boundary).
//!
//! The ACL backend never talks to a database directly. It resolves
//! [`Collection`] handles from a [`DocumentDatabase`] and issues
//! filter/update/delete calls against them, the way a document-database
//! driver exposes its API. Two implementations ship with the crate:
//!
//! - [`MemoryClient`]: process-local, used for tests and ephemeral setups
//! - [`SqliteClient`]: one SQLite table per collection, JSON documents

mod memory;
mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DocumentStoreError, StoreResult};

pub use memory::{MemoryClient, MemoryDatabase};
pub use sqlite::SqliteClient;

/// A stored document: a JSON object keyed by field name.
pub type Document = serde_json::Map<String, Value>;

/// Field carrying the store-assigned document identifier.
pub const ID_FIELD: &str = "_id";

/// Reject names no document database accepts for a collection.
pub(crate) fn validate_collection_name(name: &str) -> StoreResult<()> {
    if name.is_empty() || name.contains('\0') || name.contains('$') {
        return Err(DocumentStoreError::InvalidCollectionName(name.to_string()));
    }
    Ok(())
}

/// A single field condition inside a [`Filter`].
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals the value
    Eq(Value),
    /// Field equals any of the values
    In(Vec<Value>),
}

impl Condition {
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match (self, value) {
            (Condition::Eq(expected), Some(actual)) => expected == actual,
            (Condition::In(candidates), Some(actual)) => candidates.contains(actual),
            _ => false,
        }
    }
}

/// Conjunction of field conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Condition)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), Condition::Eq(value.into())));
        self
    }

    pub fn any_of(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.clauses.push((field.into(), Condition::In(values)));
        self
    }

    pub fn clauses(&self) -> &[(String, Condition)] {
        &self.clauses
    }

    /// Names of the filtered fields, in clause order.
    pub fn fields(&self) -> Vec<String> {
        self.clauses.iter().map(|(field, _)| field.clone()).collect()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, condition)| condition.matches(doc.get(field)))
    }

    /// Seed document for an upsert: every equality condition becomes a field.
    pub fn upsert_seed(&self) -> Document {
        self.clauses
            .iter()
            .filter_map(|(field, condition)| match condition {
                Condition::Eq(value) => Some((field.clone(), value.clone())),
                Condition::In(_) => None,
            })
            .collect()
    }
}

/// Field-level modifications applied by [`Collection::update_many`].
///
/// Merges into existing documents; untouched fields are preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    set: Document,
    unset: Vec<String>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.unset.push(field.into());
        self
    }

    pub fn set_fields(&self) -> &Document {
        &self.set
    }

    pub fn unset_fields(&self) -> &[String] {
        &self.unset
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    pub fn apply(&self, doc: &mut Document) {
        for (field, value) in &self.set {
            doc.insert(field.clone(), value.clone());
        }
        for field in &self.unset {
            doc.remove(field);
        }
    }
}

/// Fields stripped from documents returned by a find.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    exclude: Vec<String>,
}

impl Projection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn exclude(mut self, field: impl Into<String>) -> Self {
        self.exclude.push(field.into());
        self
    }

    pub fn apply(&self, mut doc: Document) -> Document {
        for field in &self.exclude {
            doc.remove(field);
        }
        doc
    }
}

/// Outcome of an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    /// Documents matched by the filter
    pub matched: u64,
    /// Whether a new document was inserted
    pub upserted: bool,
}

/// A connection to a document database server.
#[async_trait]
pub trait DocumentClient: Send + Sync + std::fmt::Debug {
    /// The database this connection was opened against.
    fn database(&self) -> Arc<dyn DocumentDatabase>;

    /// Close the connection. Behaviour of a second close is up to the driver.
    async fn close(&self) -> StoreResult<()>;
}

/// A namespace of collections.
#[async_trait]
pub trait DocumentDatabase: Send + Sync + std::fmt::Debug {
    /// Get a handle to the named collection.
    ///
    /// Collections are created implicitly on first write, so this only
    /// fails when the name is illegal or the client is closed.
    fn collection(&self, name: &str) -> StoreResult<Arc<dyn Collection>>;

    /// Names of every collection currently holding data or indexes.
    async fn list_collections(&self) -> StoreResult<Vec<String>>;

    /// Drop a collection and its indexes. Dropping a missing collection is a no-op.
    async fn drop_collection(&self, name: &str) -> StoreResult<()>;
}

/// A handle to a single collection of documents.
#[async_trait]
pub trait Collection: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    async fn find_one(&self, filter: &Filter, projection: &Projection)
        -> StoreResult<Option<Document>>;

    async fn find(&self, filter: &Filter, projection: &Projection) -> StoreResult<Vec<Document>>;

    /// Apply `update` to every matching document. With `upsert`, insert a
    /// document seeded from the filter's equality conditions when none match.
    async fn update_many(
        &self,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> StoreResult<UpdateResult>;

    /// Delete every matching document, returning how many were removed.
    async fn delete_many(&self, filter: &Filter) -> StoreResult<u64>;

    /// Ensure an ascending index over `fields` exists.
    async fn create_index(&self, fields: &[String]) -> StoreResult<()>;
}

/// Configuration for the document store backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentStoreConfig {
    /// In-memory storage (for testing)
    #[default]
    Memory,

    /// SQLite database file
    Sqlite {
        /// Path to the database file
        path: PathBuf,
    },
}

impl DocumentStoreConfig {
    /// Open a client for this configuration.
    pub async fn connect(&self) -> StoreResult<Arc<dyn DocumentClient>> {
        let client: Arc<dyn DocumentClient> = match self {
            DocumentStoreConfig::Memory => Arc::new(MemoryClient::new()),
            DocumentStoreConfig::Sqlite { path } => Arc::new(SqliteClient::new(path).await?),
        };
        Ok(client)
    }
}
