//! Shared setup for backend integration tests
#![allow(dead_code)]

use std::sync::Arc;

use acl_store::store::{MemoryClient, MemoryDatabase, SqliteClient};
use acl_store::{AclKey, AclStore, AclStoreConfig, DocumentStoreConfig};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config(single_collection: bool) -> AclStoreConfig {
    AclStoreConfig {
        single_collection,
        ..AclStoreConfig::default()
    }
}

/// Memory-backed store plus a handle to inspect its raw documents.
pub fn memory_store(single_collection: bool) -> (AclStore, MemoryDatabase) {
    init_tracing();
    let client = MemoryClient::new();
    let database = client.database_named("acl_test");
    let acl = AclStore::new(
        Arc::new(client),
        Some(Arc::new(database.clone())),
        &config(single_collection),
    );
    (acl, database)
}

pub async fn sqlite_store(single_collection: bool) -> AclStore {
    init_tracing();
    let client = SqliteClient::in_memory().await.unwrap();
    AclStore::new(Arc::new(client), None, &config(single_collection))
}

/// SQLite file store opened through the config path, with its pool of
/// several connections. The directory must outlive the store.
pub async fn sqlite_file_store(single_collection: bool) -> (AclStore, TempDir) {
    init_tracing();
    let temp_dir = tempfile::tempdir().unwrap();
    let config = AclStoreConfig {
        store: DocumentStoreConfig::Sqlite {
            path: temp_dir.path().join("acl.db"),
        },
        ..config(single_collection)
    };
    let acl = AclStore::connect(&config).await.unwrap();
    (acl, temp_dir)
}

/// Every store/mode combination, labelled for assertion messages. The
/// third element keeps file-backed stores' directories alive.
pub async fn all_stores() -> Vec<(&'static str, AclStore, Option<TempDir>)> {
    let (file_per_bucket, per_bucket_dir) = sqlite_file_store(false).await;
    let (file_single, single_dir) = sqlite_file_store(true).await;
    vec![
        ("memory/per-bucket", memory_store(false).0, None),
        ("memory/single", memory_store(true).0, None),
        ("sqlite/per-bucket", sqlite_store(false).await, None),
        ("sqlite/single", sqlite_store(true).await, None),
        ("sqlite-file/per-bucket", file_per_bucket, Some(per_bucket_dir)),
        ("sqlite-file/single", file_single, Some(single_dir)),
    ]
}

pub fn keys(names: &[&str]) -> Vec<AclKey> {
    names.iter().map(|name| AclKey::from(*name)).collect()
}

pub fn sorted(mut values: Vec<String>) -> Vec<String> {
    values.sort();
    values
}
