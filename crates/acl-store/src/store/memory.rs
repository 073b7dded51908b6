//! In-memory document store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    validate_collection_name, Collection, Document, DocumentClient, DocumentDatabase, Filter,
    Projection, Update, UpdateResult, ID_FIELD,
};
use crate::error::{DocumentStoreError, StoreResult};

const DEFAULT_DATABASE: &str = "test";

/// In-memory client holding any number of named databases.
#[derive(Debug, Clone)]
pub struct MemoryClient {
    closed: Arc<AtomicBool>,
    databases: Arc<RwLock<HashMap<String, MemoryDatabase>>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            databases: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get (or create) a named database on this client.
    pub fn database_named(&self, name: &str) -> MemoryDatabase {
        self.databases
            .write()
            .entry(name.to_string())
            .or_insert_with(|| MemoryDatabase::new(self.closed.clone()))
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentClient for MemoryClient {
    fn database(&self) -> Arc<dyn DocumentDatabase> {
        Arc::new(self.database_named(DEFAULT_DATABASE))
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CollectionData {
    docs: Vec<Document>,
    indexes: Vec<Vec<String>>,
}

#[derive(Debug)]
struct DatabaseState {
    closed: Arc<AtomicBool>,
    collections: RwLock<HashMap<String, CollectionData>>,
    next_id: AtomicU64,
}

impl DatabaseState {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DocumentStoreError::Closed);
        }
        Ok(())
    }
}

/// In-memory database. Cloning shares the underlying collections.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    state: Arc<DatabaseState>,
}

impl MemoryDatabase {
    fn new(closed: Arc<AtomicBool>) -> Self {
        Self {
            state: Arc::new(DatabaseState {
                closed,
                collections: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Snapshot of the raw documents in a collection.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.state
            .collections
            .read()
            .get(collection)
            .map(|data| data.docs.clone())
            .unwrap_or_default()
    }

    /// Index specs created on a collection.
    pub fn indexes(&self, collection: &str) -> Vec<Vec<String>> {
        self.state
            .collections
            .read()
            .get(collection)
            .map(|data| data.indexes.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentDatabase for MemoryDatabase {
    fn collection(&self, name: &str) -> StoreResult<Arc<dyn Collection>> {
        self.state.ensure_open()?;
        validate_collection_name(name)?;
        Ok(Arc::new(MemoryCollection {
            name: name.to_string(),
            state: self.state.clone(),
        }))
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        self.state.ensure_open()?;
        let mut names: Vec<String> = self.state.collections.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        self.state.ensure_open()?;
        self.state.collections.write().remove(name);
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryCollection {
    name: String,
    state: Arc<DatabaseState>,
}

impl MemoryCollection {
    fn next_id(&self) -> u64 {
        self.state.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(
        &self,
        filter: &Filter,
        projection: &Projection,
    ) -> StoreResult<Option<Document>> {
        self.state.ensure_open()?;
        let collections = self.state.collections.read();
        Ok(collections.get(&self.name).and_then(|data| {
            data.docs
                .iter()
                .find(|doc| filter.matches(doc))
                .map(|doc| projection.apply(doc.clone()))
        }))
    }

    async fn find(&self, filter: &Filter, projection: &Projection) -> StoreResult<Vec<Document>> {
        self.state.ensure_open()?;
        let collections = self.state.collections.read();
        Ok(collections
            .get(&self.name)
            .map(|data| {
                data.docs
                    .iter()
                    .filter(|doc| filter.matches(doc))
                    .map(|doc| projection.apply(doc.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_many(
        &self,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> StoreResult<UpdateResult> {
        self.state.ensure_open()?;
        let mut collections = self.state.collections.write();

        let mut matched = 0;
        if let Some(data) = collections.get_mut(&self.name) {
            for doc in data.docs.iter_mut().filter(|doc| filter.matches(doc)) {
                update.apply(doc);
                matched += 1;
            }
        }

        if matched > 0 || !upsert {
            return Ok(UpdateResult {
                matched,
                upserted: false,
            });
        }

        let mut doc = filter.upsert_seed();
        update.apply(&mut doc);
        doc.insert(ID_FIELD.to_string(), self.next_id().into());
        collections
            .entry(self.name.clone())
            .or_default()
            .docs
            .push(doc);

        Ok(UpdateResult {
            matched: 0,
            upserted: true,
        })
    }

    async fn delete_many(&self, filter: &Filter) -> StoreResult<u64> {
        self.state.ensure_open()?;
        let mut collections = self.state.collections.write();
        let Some(data) = collections.get_mut(&self.name) else {
            return Ok(0);
        };
        let before = data.docs.len();
        data.docs.retain(|doc| !filter.matches(doc));
        Ok((before - data.docs.len()) as u64)
    }

    async fn create_index(&self, fields: &[String]) -> StoreResult<()> {
        self.state.ensure_open()?;
        let mut collections = self.state.collections.write();
        let data = collections.entry(self.name.clone()).or_default();
        if !data.indexes.iter().any(|index| index.as_slice() == fields) {
            data.indexes.push(fields.to_vec());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn database() -> MemoryDatabase {
        MemoryClient::new().database_named("acl")
    }

    #[tokio::test]
    async fn test_upsert_creates_collection_and_document() {
        let db = database();
        let coll = db.collection("acl_roles").unwrap();

        let result = coll
            .update_many(
                &Filter::new().equals("key", "admin"),
                &Update::new().set("read", true),
                true,
            )
            .await
            .unwrap();
        assert!(result.upserted);

        let docs = db.documents("acl_roles");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get("key"), Some(&json!("admin")));
        assert_eq!(docs[0].get("read"), Some(&json!(true)));
        assert!(docs[0].contains_key(ID_FIELD));
        assert_eq!(db.list_collections().await.unwrap(), vec!["acl_roles"]);
    }

    #[tokio::test]
    async fn test_update_without_upsert_leaves_collection_empty() {
        let db = database();
        let coll = db.collection("acl_roles").unwrap();

        let result = coll
            .update_many(
                &Filter::new().equals("key", "admin"),
                &Update::new().unset("read"),
                false,
            )
            .await
            .unwrap();
        assert_eq!(result, UpdateResult::default());
        assert!(db.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_applies_projection() {
        let db = database();
        let coll = db.collection("acl_resources").unwrap();
        coll.update_many(
            &Filter::new().equals("_bucketname", "roles").equals("key", "a"),
            &Update::new().set("x", true),
            true,
        )
        .await
        .unwrap();

        let found = coll
            .find_one(
                &Filter::new().equals("key", "a"),
                &Projection::all().exclude("_bucketname"),
            )
            .await
            .unwrap()
            .unwrap();
        assert!(!found.contains_key("_bucketname"));
        assert_eq!(found.get("x"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_delete_and_drop() {
        let db = database();
        let coll = db.collection("acl_users").unwrap();
        for key in ["a", "b", "c"] {
            coll.update_many(&Filter::new().equals("key", key), &Update::new(), true)
                .await
                .unwrap();
        }

        let removed = coll
            .delete_many(&Filter::new().any_of("key", vec![json!("a"), json!("c")]))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(db.documents("acl_users").len(), 1);

        db.drop_collection("acl_users").await.unwrap();
        assert!(db.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_index_is_idempotent() {
        let db = database();
        let coll = db.collection("acl_users").unwrap();
        let fields = vec!["key".to_string()];
        coll.create_index(&fields).await.unwrap();
        coll.create_index(&fields).await.unwrap();
        assert_eq!(db.indexes("acl_users"), vec![fields]);
    }

    #[tokio::test]
    async fn test_closed_client_rejects_operations() {
        let client = MemoryClient::new();
        let db = client.database();
        let coll = db.collection("acl_users").unwrap();

        client.close().await.unwrap();

        assert!(matches!(
            db.collection("acl_users"),
            Err(DocumentStoreError::Closed)
        ));
        assert!(matches!(
            coll.find(&Filter::new(), &Projection::all()).await,
            Err(DocumentStoreError::Closed)
        ));
    }

    #[test]
    fn test_illegal_collection_names() {
        let db = database();
        assert!(db.collection("").is_err());
        assert!(db.collection("acl_$cmd").is_err());
    }
}
