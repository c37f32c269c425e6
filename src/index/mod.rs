pub mod btree_index;
pub mod index_set;

pub use btree_index::{BTreeIndex, RangeSpec};
pub use index_set::IndexSet;

use serde::{Deserialize, Serialize};

/// Describes an index over a single (possibly dotted) field.
///
/// The same shape is persisted in the log's index DDL records, so the serde
/// field names are part of the on-disk format.
///
/// # Examples
///
/// ```ignore
/// db.ensure_index(IndexDescriptor::new("email").unique(true))?;
/// db.ensure_index(IndexDescriptor::new("session").expire_after_seconds(3600))?;
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    #[serde(rename = "fieldName")]
    pub field_name: String,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub sparse: bool,
    #[serde(
        rename = "expireAfterSeconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expire_after_seconds: Option<i64>,
}

impl IndexDescriptor {
    pub fn new(field_name: impl Into<String>) -> Self {
        IndexDescriptor {
            field_name: field_name.into(),
            unique: false,
            sparse: false,
            expire_after_seconds: None,
        }
    }

    /// Rejects a second document at the same key.
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Skips documents whose indexed field does not resolve.
    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    /// Registers TTL expiration: documents whose field holds a date older
    /// than the given number of seconds are expired during candidate scans.
    pub fn expire_after_seconds(mut self, seconds: i64) -> Self {
        self.expire_after_seconds = Some(seconds);
        self
    }
}
