//! The set of all indexes of a datastore, mutated with all-or-nothing
//! semantics.
//!
//! The `_id` index always exists (unique, non-sparse) and owns the canonical
//! document copies; secondary indexes share them. Fan-out order is stable:
//! `_id` first, then secondary indexes in field-name order, which is what
//! makes partial-failure rollback deterministic.

use crate::common::{CompareOptions, DOC_ID};
use crate::document::SharedDocument;
use crate::errors::{ErrorKind, LigniteError, LigniteResult};
use crate::index::{BTreeIndex, IndexDescriptor};
use std::collections::BTreeMap;

pub struct IndexSet {
    options: CompareOptions,
    id_index: BTreeIndex,
    secondary: BTreeMap<String, BTreeIndex>,
}

impl IndexSet {
    pub fn new(options: CompareOptions) -> Self {
        let id_index = BTreeIndex::new(
            IndexDescriptor::new(DOC_ID).unique(true),
            options.clone(),
        );
        IndexSet {
            options,
            id_index,
            secondary: BTreeMap::new(),
        }
    }

    pub fn id_index(&self) -> &BTreeIndex {
        &self.id_index
    }

    /// Looks up an index by field name, the `_id` index included.
    pub fn get(&self, field_name: &str) -> Option<&BTreeIndex> {
        if field_name == DOC_ID {
            Some(&self.id_index)
        } else {
            self.secondary.get(field_name)
        }
    }

    pub fn contains(&self, field_name: &str) -> bool {
        self.get(field_name).is_some()
    }

    /// Descriptors of all secondary indexes, in fan-out order.
    pub fn secondary_descriptors(&self) -> Vec<IndexDescriptor> {
        self.secondary
            .values()
            .map(|index| index.descriptor().clone())
            .collect()
    }

    /// All live documents, via the owning `_id` index.
    pub fn all_docs(&self) -> Vec<SharedDocument> {
        self.id_index.get_all()
    }

    /// Creates a secondary index and fills it from the current documents.
    ///
    /// Returns `false` when the index already exists (the call is a no-op).
    /// A constraint violation while filling leaves the index set unchanged:
    /// the half-built index is discarded.
    pub fn ensure_index(&mut self, descriptor: IndexDescriptor) -> LigniteResult<bool> {
        if descriptor.field_name == DOC_ID || self.secondary.contains_key(&descriptor.field_name) {
            return Ok(false);
        }

        let field_name = descriptor.field_name.clone();
        let mut index = BTreeIndex::new(descriptor, self.options.clone());
        for doc in self.id_index.get_all() {
            index.insert(&doc)?;
        }
        self.secondary.insert(field_name, index);
        Ok(true)
    }

    /// Drops a secondary index. Returns `false` when no such index exists.
    pub fn remove_index(&mut self, field_name: &str) -> LigniteResult<bool> {
        if field_name == DOC_ID {
            return Err(LigniteError::new(
                "The _id index cannot be removed",
                ErrorKind::InvalidDataType,
            ));
        }
        Ok(self.secondary.remove(field_name).is_some())
    }

    fn index_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(1 + self.secondary.len());
        names.push(DOC_ID.to_string());
        names.extend(self.secondary.keys().cloned());
        names
    }

    fn get_mut(&mut self, field_name: &str) -> Option<&mut BTreeIndex> {
        if field_name == DOC_ID {
            Some(&mut self.id_index)
        } else {
            self.secondary.get_mut(field_name)
        }
    }

    /// Inserts a document into every index.
    ///
    /// On the first failure the insert is undone on every earlier index
    /// before the error surfaces, so the set is left exactly as it was.
    pub fn insert_into_indexes(&mut self, doc: &SharedDocument) -> LigniteResult<()> {
        let names = self.index_names();
        for (position, name) in names.iter().enumerate() {
            let result = match self.get_mut(name) {
                Some(index) => index.insert(doc),
                None => continue,
            };
            if let Err(error) = result {
                for earlier in &names[..position] {
                    if let Some(index) = self.get_mut(earlier) {
                        index.remove(doc);
                    }
                }
                return Err(error);
            }
        }
        Ok(())
    }

    /// Removes a document from every index. Removal is idempotent, so there
    /// is nothing to roll back.
    pub fn remove_from_indexes(&mut self, doc: &SharedDocument) {
        let names = self.index_names();
        for name in &names {
            if let Some(index) = self.get_mut(name) {
                index.remove(doc);
            }
        }
    }

    /// Replaces old documents with new ones across every index.
    ///
    /// A single pair is a remove-then-insert per index; multiple pairs run
    /// two-phase (remove all, then insert all) per index. On failure the
    /// failed index has already restored its old documents, and the update
    /// is reverted on every earlier index before the error surfaces.
    pub fn update_indexes(
        &mut self,
        pairs: &[(SharedDocument, SharedDocument)],
    ) -> LigniteResult<()> {
        let names = self.index_names();
        for (position, name) in names.iter().enumerate() {
            let result = match self.get_mut(name) {
                Some(index) => Self::update_one_index(index, pairs),
                None => continue,
            };
            if let Err(error) = result {
                for earlier in &names[..position] {
                    if let Some(index) = self.get_mut(earlier) {
                        Self::revert_one_index(index, pairs);
                    }
                }
                return Err(error);
            }
        }
        Ok(())
    }

    /// The inverse of [IndexSet::update_indexes], used to roll a committed
    /// update back after a later failure (a failed log append, for instance).
    pub fn revert_update(&mut self, pairs: &[(SharedDocument, SharedDocument)]) {
        let names = self.index_names();
        for name in &names {
            if let Some(index) = self.get_mut(name) {
                Self::revert_one_index(index, pairs);
            }
        }
    }

    fn update_one_index(
        index: &mut BTreeIndex,
        pairs: &[(SharedDocument, SharedDocument)],
    ) -> LigniteResult<()> {
        if let [(old, new)] = pairs {
            return index.update(old, new);
        }

        // two-phase: remove every old state, then insert every new one
        for (old, _) in pairs {
            index.remove(old);
        }
        for (position, (_, new)) in pairs.iter().enumerate() {
            if let Err(error) = index.insert(new) {
                for (_, inserted) in &pairs[..position] {
                    index.remove(inserted);
                }
                for (old, _) in pairs {
                    if let Err(restore_error) = index.insert(old) {
                        log::error!(
                            "Failed to restore document during index rollback: {}",
                            restore_error
                        );
                    }
                }
                return Err(error);
            }
        }
        Ok(())
    }

    fn revert_one_index(index: &mut BTreeIndex, pairs: &[(SharedDocument, SharedDocument)]) {
        for (old, new) in pairs {
            if let Err(error) = index.revert_update(old, new) {
                log::error!("Failed to revert index update: {}", error);
            }
        }
    }

    /// Empties every index, keeping the definitions.
    pub fn reset_all(&mut self) {
        self.id_index.reset();
        for index in self.secondary.values_mut() {
            index.reset();
        }
    }

    /// Drops every secondary index definition, used before a load replays
    /// the DDL records from the log.
    pub fn remove_all_secondary(&mut self) {
        self.secondary.clear();
    }
}
