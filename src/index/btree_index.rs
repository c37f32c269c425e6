//! Ordered-key index over a balanced tree.
//!
//! Keys are document field values ordered by the crate-wide comparison
//! algebra (including any custom string comparator); each key maps to the
//! documents carrying that value. Array-valued fields fan out to one entry
//! per distinct element.

use crate::common::{compare_values, CompareOptions, Value};
use crate::document::SharedDocument;
use crate::errors::{ErrorKind, LigniteError, LigniteResult};
use crate::index::IndexDescriptor;
use itertools::Itertools;
use once_cell::sync::Lazy;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

static UNIQUE_CONSTRAINT_ERROR: Lazy<LigniteError> = Lazy::new(|| {
    LigniteError::new(
        "Can't insert key, unique constraint violated",
        ErrorKind::UniqueViolation,
    )
});

/// A tree key: a [Value] paired with the comparison options so the standard
/// `BTreeMap` observes the datastore's ordering, custom string comparator
/// included.
#[derive(Clone)]
pub(crate) struct IndexKey {
    value: Value,
    options: CompareOptions,
}

impl IndexKey {
    fn new(value: Value, options: CompareOptions) -> Self {
        IndexKey { value, options }
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        compare_values(&self.value, &other.value, &self.options) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(&self.value, &other.value, &self.options)
    }
}

/// Bounds for a range scan, mirroring the `$lt`/`$lte`/`$gt`/`$gte` operator
/// object that produced it.
#[derive(Clone, Debug, Default)]
pub struct RangeSpec {
    pub gt: Option<Value>,
    pub gte: Option<Value>,
    pub lt: Option<Value>,
    pub lte: Option<Value>,
}

impl RangeSpec {
    pub fn is_empty(&self) -> bool {
        self.gt.is_none() && self.gte.is_none() && self.lt.is_none() && self.lte.is_none()
    }
}

/// An ordered-key index mapping field values to documents.
///
/// Documents are held as [SharedDocument] references; the `_id` index owns
/// the canonical copies and every secondary index shares them. Removal
/// matches by reference identity, so an index must always be handed the
/// canonical `Arc` it was populated with.
pub struct BTreeIndex {
    descriptor: IndexDescriptor,
    options: CompareOptions,
    tree: BTreeMap<IndexKey, Vec<SharedDocument>>,
}

impl BTreeIndex {
    pub fn new(descriptor: IndexDescriptor, options: CompareOptions) -> Self {
        BTreeIndex {
            descriptor,
            options,
            tree: BTreeMap::new(),
        }
    }

    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    pub fn field_name(&self) -> &str {
        &self.descriptor.field_name
    }

    pub fn is_unique(&self) -> bool {
        self.descriptor.unique
    }

    pub fn is_sparse(&self) -> bool {
        self.descriptor.sparse
    }

    /// Number of distinct keys currently held.
    pub fn key_count(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Drops every entry, keeping the index definition.
    pub fn reset(&mut self) {
        self.tree.clear();
    }

    fn key(&self, value: Value) -> IndexKey {
        IndexKey::new(value, self.options.clone())
    }

    /// The tree keys a document contributes: nothing for a sparse index on a
    /// missing field, one entry per distinct element for an array field, and
    /// the resolved value itself otherwise. Distinctness keeps `1` and `"1"`
    /// apart since keys are typed values, not strings.
    fn extract_keys(&self, doc: &SharedDocument) -> Vec<Value> {
        let resolved = doc.get_path(self.field_name());
        match resolved {
            Value::Undefined if self.is_sparse() => Vec::new(),
            Value::Array(elements) => {
                let mut distinct: Vec<Value> = Vec::with_capacity(elements.len());
                for element in elements {
                    let seen = distinct.iter().any(|existing| {
                        compare_values(existing, &element, &self.options) == Ordering::Equal
                    });
                    if !seen {
                        distinct.push(element);
                    }
                }
                distinct
            }
            other => vec![other],
        }
    }

    /// Inserts a document under every key it contributes.
    ///
    /// If one of the per-element inserts of an array-valued field fails, the
    /// preceding ones are rolled back before the error surfaces, so a failed
    /// insert leaves the index untouched.
    pub fn insert(&mut self, doc: &SharedDocument) -> LigniteResult<()> {
        let keys = self.extract_keys(doc);
        for (position, key) in keys.iter().enumerate() {
            if let Err(error) = self.insert_one(key.clone(), doc) {
                for earlier in &keys[..position] {
                    self.remove_one(earlier.clone(), doc);
                }
                return Err(error);
            }
        }
        Ok(())
    }

    fn insert_one(&mut self, key: Value, doc: &SharedDocument) -> LigniteResult<()> {
        let tree_key = self.key(key);
        let entry = self.tree.entry(tree_key).or_default();
        if self.descriptor.unique && !entry.is_empty() {
            log::error!(
                "Unique constraint violated on index {}",
                self.descriptor.field_name
            );
            return Err(UNIQUE_CONSTRAINT_ERROR.clone());
        }
        entry.push(Arc::clone(doc));
        Ok(())
    }

    /// Removes a document from every key it contributes. Missing entries are
    /// ignored, which makes removal idempotent.
    pub fn remove(&mut self, doc: &SharedDocument) {
        for key in self.extract_keys(doc) {
            self.remove_one(key, doc);
        }
    }

    fn remove_one(&mut self, key: Value, doc: &SharedDocument) {
        let key = self.key(key);
        if let Some(entry) = self.tree.get_mut(&key) {
            entry.retain(|existing| !Arc::ptr_eq(existing, doc));
            if entry.is_empty() {
                self.tree.remove(&key);
            }
        }
    }

    /// Replaces `old` with `new`. If the insert of `new` fails, `old` is
    /// restored before the error surfaces, so the index is atomic per pair.
    pub fn update(&mut self, old: &SharedDocument, new: &SharedDocument) -> LigniteResult<()> {
        self.remove(old);
        if let Err(error) = self.insert(new) {
            self.force_reinsert(old);
            return Err(error);
        }
        Ok(())
    }

    /// The inverse of [BTreeIndex::update].
    pub fn revert_update(
        &mut self,
        old: &SharedDocument,
        new: &SharedDocument,
    ) -> LigniteResult<()> {
        self.update(new, old)
    }

    // Re-inserting a document that was just removed restores prior state and
    // cannot violate uniqueness; a failure here means the index was already
    // inconsistent.
    fn force_reinsert(&mut self, doc: &SharedDocument) {
        if let Err(error) = self.insert(doc) {
            log::error!(
                "Failed to restore document in index {} during rollback: {}",
                self.descriptor.field_name,
                error
            );
        }
    }

    /// All documents stored under `value`.
    pub fn search(&self, value: &Value) -> Vec<SharedDocument> {
        match self.tree.get(&self.key(value.clone())) {
            Some(entry) => entry.clone(),
            None => Vec::new(),
        }
    }

    /// All documents stored under any of `values`, deduplicated.
    pub fn search_any(&self, values: &[Value]) -> Vec<SharedDocument> {
        values
            .iter()
            .flat_map(|value| self.search(value))
            .unique_by(|doc| Arc::as_ptr(doc) as usize)
            .collect()
    }

    /// Documents with keys inside the range bounds, in ascending key order.
    pub fn between_bounds(&self, range: &RangeSpec) -> Vec<SharedDocument> {
        let lower = match (&range.gte, &range.gt) {
            (Some(value), _) => Bound::Included(self.key(value.clone())),
            (None, Some(value)) => Bound::Excluded(self.key(value.clone())),
            (None, None) => Bound::Unbounded,
        };
        let upper = match (&range.lte, &range.lt) {
            (Some(value), _) => Bound::Included(self.key(value.clone())),
            (None, Some(value)) => Bound::Excluded(self.key(value.clone())),
            (None, None) => Bound::Unbounded,
        };

        self.tree
            .range((lower, upper))
            .flat_map(|(_, entry)| entry.iter().cloned())
            .unique_by(|doc| Arc::as_ptr(doc) as usize)
            .collect()
    }

    /// Every stored document in ascending key order, deduplicated (an
    /// array-valued document appears once).
    pub fn get_all(&self) -> Vec<SharedDocument> {
        self.tree
            .values()
            .flat_map(|entry| entry.iter().cloned())
            .unique_by(|doc| Arc::as_ptr(doc) as usize)
            .collect()
    }

    /// In-order traversal over `(key, documents)` pairs.
    pub fn for_each(&self, mut f: impl FnMut(&Value, &[SharedDocument])) {
        for (key, entry) in self.tree.iter() {
            f(&key.value, entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::val;
    use crate::document::Document;

    fn shared(doc: Document) -> SharedDocument {
        Arc::new(doc)
    }

    fn plain_index(field: &str) -> BTreeIndex {
        BTreeIndex::new(IndexDescriptor::new(field), CompareOptions::default())
    }

    #[test]
    fn test_insert_and_search() {
        let mut index = plain_index("a");
        let d1 = shared(doc! { "_id": "1", "a": 5 });
        let d2 = shared(doc! { "_id": "2", "a": 5 });
        index.insert(&d1).unwrap();
        index.insert(&d2).unwrap();

        let found = index.search(&val!(5));
        assert_eq!(found.len(), 2);
        assert!(index.search(&val!(6)).is_empty());
    }

    #[test]
    fn test_unique_violation() {
        let mut index =
            BTreeIndex::new(IndexDescriptor::new("a").unique(true), CompareOptions::default());
        let d1 = shared(doc! { "_id": "1", "a": 5 });
        let d2 = shared(doc! { "_id": "2", "a": 5 });
        index.insert(&d1).unwrap();

        let err = index.insert(&d2).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UniqueViolation);
        assert_eq!(index.search(&val!(5)).len(), 1);
    }

    #[test]
    fn test_sparse_skips_missing_field() {
        let mut index =
            BTreeIndex::new(IndexDescriptor::new("a").sparse(true), CompareOptions::default());
        let d = shared(doc! { "_id": "1", "b": 5 });
        index.insert(&d).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_non_sparse_indexes_missing_field_under_undefined() {
        let mut index = plain_index("a");
        let d1 = shared(doc! { "_id": "1", "b": 5 });
        index.insert(&d1).unwrap();
        assert_eq!(index.key_count(), 1);
        assert_eq!(index.search(&Value::Undefined).len(), 1);
    }

    #[test]
    fn test_unique_non_sparse_rejects_two_missing() {
        let mut index =
            BTreeIndex::new(IndexDescriptor::new("a").unique(true), CompareOptions::default());
        let d1 = shared(doc! { "_id": "1" });
        let d2 = shared(doc! { "_id": "2" });
        index.insert(&d1).unwrap();
        assert_eq!(
            index.insert(&d2).unwrap_err().kind(),
            &ErrorKind::UniqueViolation
        );
    }

    #[test]
    fn test_array_field_fans_out() {
        let mut index = plain_index("tags");
        let d = shared(doc! { "_id": "1", "tags": ["a", "b", "a"] });
        index.insert(&d).unwrap();

        // distinct elements only
        assert_eq!(index.key_count(), 2);
        assert_eq!(index.search(&val!("a")).len(), 1);
        assert_eq!(index.search(&val!("b")).len(), 1);

        // a document appears once in a full scan
        assert_eq!(index.get_all().len(), 1);
    }

    #[test]
    fn test_array_distinctness_is_typed() {
        let mut index = plain_index("xs");
        let d = shared(doc! { "_id": "1", "xs": [1, "1"] });
        index.insert(&d).unwrap();
        assert_eq!(index.key_count(), 2);
    }

    #[test]
    fn test_array_unique_rollback() {
        let mut index =
            BTreeIndex::new(IndexDescriptor::new("tags").unique(true), CompareOptions::default());
        let d1 = shared(doc! { "_id": "1", "tags": ["b"] });
        let d2 = shared(doc! { "_id": "2", "tags": ["a", "b"] });
        index.insert(&d1).unwrap();

        // inserting "a" succeeds then "b" violates; "a" must be rolled back
        let err = index.insert(&d2).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UniqueViolation);
        assert!(index.search(&val!("a")).is_empty());
        assert_eq!(index.search(&val!("b")).len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut index = plain_index("a");
        let d = shared(doc! { "_id": "1", "a": 5 });
        index.insert(&d).unwrap();
        index.remove(&d);
        index.remove(&d);
        assert!(index.is_empty());
    }

    #[test]
    fn test_remove_only_touches_the_given_document() {
        let mut index = plain_index("a");
        let d1 = shared(doc! { "_id": "1", "a": 5 });
        let d2 = shared(doc! { "_id": "2", "a": 5 });
        index.insert(&d1).unwrap();
        index.insert(&d2).unwrap();

        index.remove(&d1);
        let found = index.search(&val!(5));
        assert_eq!(found.len(), 1);
        assert!(Arc::ptr_eq(&found[0], &d2));
    }

    #[test]
    fn test_update_restores_old_on_failure() {
        let mut index =
            BTreeIndex::new(IndexDescriptor::new("a").unique(true), CompareOptions::default());
        let d1 = shared(doc! { "_id": "1", "a": 1 });
        let d2 = shared(doc! { "_id": "2", "a": 2 });
        index.insert(&d1).unwrap();
        index.insert(&d2).unwrap();

        // moving d1 onto d2's key fails and must restore d1
        let d1_new = shared(doc! { "_id": "1", "a": 2 });
        let err = index.update(&d1, &d1_new).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UniqueViolation);
        assert_eq!(index.search(&val!(1)).len(), 1);
        assert_eq!(index.search(&val!(2)).len(), 1);
    }

    #[test]
    fn test_between_bounds_ascending() {
        let mut index = plain_index("a");
        for (id, a) in [("1", 5), ("2", 57), ("3", 52), ("4", 23), ("5", 89)] {
            index.insert(&shared(doc! { "_id": id, "a": a })).unwrap();
        }

        let range = RangeSpec {
            gt: Some(val!(23)),
            ..RangeSpec::default()
        };
        let found = index.between_bounds(&range);
        let values: Vec<Value> = found.iter().map(|d| d.get_path("a")).collect();
        assert_eq!(values, vec![val!(52), val!(57), val!(89)]);

        let range = RangeSpec {
            gte: Some(val!(23)),
            lt: Some(val!(89)),
            ..RangeSpec::default()
        };
        let found = index.between_bounds(&range);
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn test_search_any_deduplicates() {
        let mut index = plain_index("tags");
        let d = shared(doc! { "_id": "1", "tags": ["a", "b"] });
        index.insert(&d).unwrap();
        let found = index.search_any(&[val!("a"), val!("b")]);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_custom_string_comparator_orders_keys() {
        let options = CompareOptions::with_string_comparator(Arc::new(|a: &str, b: &str| {
            b.cmp(a) // reversed
        }));
        let mut index = BTreeIndex::new(IndexDescriptor::new("s"), options);
        for (id, s) in [("1", "a"), ("2", "c"), ("3", "b")] {
            index.insert(&shared(doc! { "_id": id, "s": s })).unwrap();
        }
        let all = index.get_all();
        let values: Vec<Value> = all.iter().map(|d| d.get_path("s")).collect();
        assert_eq!(values, vec![val!("c"), val!("b"), val!("a")]);
    }

    #[test]
    fn test_for_each_traverses_in_order() {
        let mut index = plain_index("a");
        for (id, a) in [("1", 3), ("2", 1), ("3", 2)] {
            index.insert(&shared(doc! { "_id": id, "a": a })).unwrap();
        }
        let mut keys = Vec::new();
        index.for_each(|key, _| keys.push(key.clone()));
        assert_eq!(keys, vec![val!(1), val!(2), val!(3)]);
    }
}
