//! Error types for the ACL store and its document-store collaborators.

/// Errors raised by a document store implementation.
#[derive(Debug, thiserror::Error)]
pub enum DocumentStoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored document is not valid JSON
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The collection name is not legal for this store
    #[error("invalid collection name: {0:?}")]
    InvalidCollectionName(String),

    /// A field name cannot be expressed in this store
    #[error("invalid field name: {0:?}")]
    InvalidField(String),

    /// The client has been closed
    #[error("document store is closed")]
    Closed,
}

/// Errors surfaced by the ACL backend.
#[derive(Debug, thiserror::Error)]
pub enum AclStoreError {
    /// Malformed call arguments, raised before any I/O
    #[error("invalid argument: {0}")]
    Validation(String),

    /// The collection handle for a bucket could not be obtained
    #[error("cannot find the collection {collection}: {source}")]
    CollectionNotFound {
        collection: String,
        #[source]
        source: DocumentStoreError,
    },

    /// Failure reported by the underlying document store
    #[error("document store error: {0}")]
    Store(#[from] DocumentStoreError),

    /// A stored name does not percent-decode to UTF-8
    #[error("invalid encoding: {0:?}")]
    InvalidEncoding(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for document store operations.
pub type StoreResult<T> = std::result::Result<T, DocumentStoreError>;

/// Result type alias for ACL store operations.
pub type Result<T> = std::result::Result<T, AclStoreError>;
