//! Record shape: how an ACL record maps onto a document.
//!
//! A record document carries its identity in reserved fields (`key`, the
//! store-assigned `_id` and, when buckets share a collection, `_bucketname`).
//! Every other field is a member of the record's value-set, stored as `true`.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::codec::{self, AclKey};
use crate::error::{AclStoreError, Result};
use crate::store::{Document, Filter, Projection, Update};

pub use crate::store::ID_FIELD;

/// Field holding the encoded ACL key.
pub const KEY_FIELD: &str = "key";

/// Discriminator naming the bucket when all buckets share one collection.
pub const BUCKET_FIELD: &str = "_bucketname";

/// Fields that are never part of a value-set.
pub const RESERVED_FIELDS: [&str; 3] = [KEY_FIELD, ID_FIELD, BUCKET_FIELD];

pub fn is_reserved(field: &str) -> bool {
    RESERVED_FIELDS.contains(&field)
}

/// Which documents of a collection belong to a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketScope {
    /// The bucket owns the whole collection
    Collection,
    /// The collection is shared; rows are tagged with the bucket name
    Shared(String),
}

impl BucketScope {
    fn base(&self) -> Filter {
        match self {
            BucketScope::Collection => Filter::new(),
            BucketScope::Shared(bucket) => Filter::new().equals(BUCKET_FIELD, bucket.as_str()),
        }
    }

    /// Filter selecting the record with this encoded key.
    pub fn key_filter(&self, key: Value) -> Filter {
        self.base().equals(KEY_FIELD, key)
    }

    /// Filter selecting every record whose encoded key is in `keys`.
    pub fn keys_filter(&self, keys: Vec<Value>) -> Filter {
        self.base().any_of(KEY_FIELD, keys)
    }

    /// Fields worth indexing for key lookups in this scope.
    pub fn index_fields(&self) -> Vec<String> {
        match self {
            BucketScope::Collection => vec![KEY_FIELD.to_string()],
            BucketScope::Shared(_) => vec![BUCKET_FIELD.to_string(), KEY_FIELD.to_string()],
        }
    }

    /// Projection used by reads; the discriminator never leaves the store.
    pub fn projection(&self) -> Projection {
        Projection::all().exclude(BUCKET_FIELD)
    }
}

/// A record as read back from the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    /// Encoded key, if the document has one
    pub key: Option<Value>,
    /// Encoded value names
    pub values: BTreeSet<String>,
}

impl Record {
    pub fn from_document(doc: Document) -> Self {
        let mut record = Record::default();
        for (field, value) in doc {
            if field == KEY_FIELD {
                record.key = Some(value);
            } else if !is_reserved(&field) {
                record.values.insert(field);
            }
        }
        record
    }

    /// Value names with their key encoding reversed.
    pub fn decoded_values(&self) -> Result<Vec<String>> {
        self.values.iter().map(|field| codec::decode(field)).collect()
    }
}

/// Reject the key literal that would shadow the identity field.
pub fn validate_key(key: &AclKey) -> Result<()> {
    if key.as_text() == Some(KEY_FIELD) {
        return Err(AclStoreError::Validation(format!(
            "Key name '{KEY_FIELD}' is not allowed."
        )));
    }
    Ok(())
}

/// Encode value names into field names, rejecting reserved ones.
pub fn value_fields(values: &[AclKey]) -> Result<Vec<String>> {
    values
        .iter()
        .map(|value| {
            let field = value.encode_field();
            if is_reserved(&field) {
                return Err(AclStoreError::Validation(format!(
                    "Value name '{value}' is reserved."
                )));
            }
            Ok(field)
        })
        .collect()
}

/// `$set` every field to `true`.
pub fn grant(fields: &[String]) -> Update {
    fields
        .iter()
        .fold(Update::new(), |update, field| update.set(field.as_str(), true))
}

/// `$unset` every field.
pub fn revoke(fields: &[String]) -> Update {
    fields
        .iter()
        .fold(Update::new(), |update, field| update.unset(field.as_str()))
}
