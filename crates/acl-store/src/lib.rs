//! Document-database storage backend for access-control lists.
//!
//! ACL data is organised in buckets (`roles`, `users`, ...) of keys, each key
//! holding a set of value names. This crate persists that model into a
//! document database and exposes it through the [`AclBackend`] contract used
//! by a permission-evaluation layer.
//!
//! # Features
//!
//! - Per-bucket collections or a single shared collection with a bucket
//!   discriminator
//! - Keys and value names percent-encoded so they are safe as field names
//! - Writes batched on a [`Transaction`] and committed together (not atomic)
//! - Pluggable document stores: in-memory and SQLite
//!
//! # Example
//!
//! ```rust,no_run
//! use acl_store::{AclBackend, AclStore, AclStoreConfig};
//!
//! # async fn example() -> acl_store::Result<()> {
//! let config = AclStoreConfig::from_toml_str(
//!     r#"
//!     single_collection = true
//!
//!     [store]
//!     type = "sqlite"
//!     path = "/tmp/acl.db"
//!     "#,
//! )?;
//! let acl = AclStore::connect(&config).await?;
//!
//! let mut tx = acl.begin();
//! acl.add(&mut tx, "users", &"joed".into(), &["admin".into()])?;
//! acl.end(tx).await?;
//!
//! let roles = acl.union("users", &["joed".into(), "jsmith".into()]).await?;
//! # Ok(())
//! # }
//! ```

mod acl_store;
mod backend;
pub mod codec;
mod config;
mod error;
pub mod naming;
pub mod record;
pub mod resolver;
pub mod store;
mod transaction;

pub use acl_store::AclStore;
pub use backend::AclBackend;
pub use codec::AclKey;
pub use config::{AclStoreConfig, DEFAULT_PREFIX};
pub use error::{AclStoreError, DocumentStoreError, Result, StoreResult};
pub use resolver::CollectionMode;
pub use store::DocumentStoreConfig;
pub use transaction::{Operation, Transaction};
