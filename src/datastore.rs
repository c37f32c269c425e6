//! The datastore façade.
//!
//! A [Datastore] holds one collection of documents in an [IndexSet] (the
//! `_id` index owns the canonical copies), persists every mutation to the
//! append-only log, and funnels all work through the single-writer
//! [Executor]. Reads select candidates through the best applicable index,
//! then filter, sort and project through a [crate::cursor::Cursor].

use crate::common::event_bus::{DatastoreEvent, DatastoreEventBus, DatastoreEventListener, SubscriberRef};
use crate::common::util::date_utils::current_time_millis;
use crate::common::util::id_utils::random_id;
use crate::common::util::task_util::{async_task, Scheduler};
use crate::common::{
    CompareOptions, StringComparator, Value, CREATED_AT, DEFAULT_CORRUPT_ALERT_THRESHOLD, DOC_ID,
    ID_LENGTH, MIN_AUTOCOMPACTION_INTERVAL_MS, UPDATED_AT,
};
use crate::cursor::{Cursor, QuerySource};
use crate::document::{validate_document_keys, Document, SharedDocument};
use crate::errors::{ErrorKind, LigniteError, LigniteResult};
use crate::executor::Executor;
use crate::index::{IndexDescriptor, IndexSet, RangeSpec};
use crate::persistence::{LineTransform, LogRecord, Persistence};
use crate::projection::Projection;
use crate::query::matcher::matches;
use crate::query::{CompareOp, FieldCond, Query};
use crate::update::{apply_update, parse_update, UpdateExpr};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Callback invoked when an autoloaded database finishes loading.
pub type OnLoadCallback = Arc<dyn Fn(LigniteResult<()>) + Send + Sync>;

/// Construction options for a [Datastore].
///
/// # Examples
///
/// ```ignore
/// let db = DatastoreOptions::new()
///     .filename("users.db")
///     .timestamp_data(true)
///     .open()?;
/// db.load_database()?;
/// ```
#[derive(Default)]
pub struct DatastoreOptions {
    filename: Option<PathBuf>,
    in_memory_only: bool,
    timestamp_data: bool,
    autoload: bool,
    on_load: Option<OnLoadCallback>,
    after_serialization: Option<LineTransform>,
    before_deserialization: Option<LineTransform>,
    corrupt_alert_threshold: Option<f64>,
    compare_strings: Option<StringComparator>,
}

impl DatastoreOptions {
    pub fn new() -> DatastoreOptions {
        DatastoreOptions::default()
    }

    /// The log file path. Without one the datastore is memory-only.
    pub fn filename(mut self, filename: impl Into<PathBuf>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Forces a memory-only datastore even when a filename is set.
    pub fn in_memory_only(mut self, in_memory_only: bool) -> Self {
        self.in_memory_only = in_memory_only;
        self
    }

    /// Auto-populate `createdAt` / `updatedAt` on insert and update.
    pub fn timestamp_data(mut self, timestamp_data: bool) -> Self {
        self.timestamp_data = timestamp_data;
        self
    }

    /// Loads the database in the background right after construction.
    pub fn autoload(mut self, autoload: bool) -> Self {
        self.autoload = autoload;
        self
    }

    /// Invoked when an autoload completes. Without one, a failed autoload
    /// panics the loader thread.
    pub fn on_load(mut self, on_load: impl Fn(LigniteResult<()>) + Send + Sync + 'static) -> Self {
        self.on_load = Some(Arc::new(on_load));
        self
    }

    /// The inverse pair of per-line transforms applied to the log.
    pub fn serialization_hooks(
        mut self,
        after_serialization: LineTransform,
        before_deserialization: LineTransform,
    ) -> Self {
        self.after_serialization = Some(after_serialization);
        self.before_deserialization = Some(before_deserialization);
        self
    }

    /// Tolerated fraction of corrupt log lines at load, in `[0, 1]`.
    pub fn corrupt_alert_threshold(mut self, threshold: f64) -> Self {
        self.corrupt_alert_threshold = Some(threshold);
        self
    }

    /// Custom comparator for every string comparison: sorts, index keys and
    /// range operators.
    pub fn compare_strings(mut self, comparator: StringComparator) -> Self {
        self.compare_strings = Some(comparator);
        self
    }

    /// Validates the options and builds the datastore.
    pub fn open(self) -> LigniteResult<Datastore> {
        Datastore::with_options(self)
    }
}

/// Options for [Datastore::update].
#[derive(Clone, Copy, Debug, Default)]
pub struct UpdateOptions {
    /// Update every matching document instead of only the first.
    pub multi: bool,
    /// Insert a new document when nothing matches.
    pub upsert: bool,
    /// Return the updated documents in [UpdateResult::affected_documents].
    pub return_updated_docs: bool,
}

/// Options for [Datastore::remove].
#[derive(Clone, Copy, Debug, Default)]
pub struct RemoveOptions {
    /// Remove every matching document instead of only the first.
    pub multi: bool,
}

/// The outcome of an update.
#[derive(Clone, Debug)]
pub struct UpdateResult {
    pub num_affected: usize,
    pub affected_documents: Option<Vec<Document>>,
    pub upsert: bool,
}

struct CoreState {
    indexes: IndexSet,
    ttl_indexes: HashMap<String, i64>,
}

pub(crate) struct DatastoreInner {
    timestamp_data: bool,
    compare: CompareOptions,
    executor: Executor,
    persistence: Persistence,
    state: Mutex<CoreState>,
    event_bus: DatastoreEventBus,
    scheduler: Scheduler,
}

/// An embedded, single-process document datastore.
///
/// Cloning the handle is cheap; every clone shares the same underlying
/// state. All mutating operations and cursor executions are serialized
/// through the datastore's executor, and block until the database has been
/// loaded with [Datastore::load_database] (or `autoload`).
#[derive(Clone)]
pub struct Datastore {
    inner: Arc<DatastoreInner>,
}

struct CursorPlan {
    query: QuerySource,
    limit: Option<usize>,
    skip: Option<usize>,
    sort: Option<Vec<(String, i32)>>,
    projection: Option<Document>,
}

impl Datastore {
    fn with_options(options: DatastoreOptions) -> LigniteResult<Datastore> {
        let compare = CompareOptions {
            string_comparator: options.compare_strings,
        };
        let persistence = Persistence::new(
            options.filename,
            options.in_memory_only,
            options
                .corrupt_alert_threshold
                .unwrap_or(DEFAULT_CORRUPT_ALERT_THRESHOLD),
            options.after_serialization,
            options.before_deserialization,
        )?;

        let datastore = Datastore {
            inner: Arc::new(DatastoreInner {
                timestamp_data: options.timestamp_data,
                compare: compare.clone(),
                executor: Executor::new(),
                persistence,
                state: Mutex::new(CoreState {
                    indexes: IndexSet::new(compare),
                    ttl_indexes: HashMap::new(),
                }),
                event_bus: DatastoreEventBus::new(),
                scheduler: Scheduler::new(),
            }),
        };

        if options.autoload {
            let loader = datastore.clone();
            let on_load = options.on_load;
            async_task(move || {
                let result = loader.load_database();
                match on_load {
                    Some(callback) => callback(result),
                    None => {
                        if let Err(error) = result {
                            log::error!("Autoload failed: {}", error);
                            panic!("Failed to load the database: {:?}", error);
                        }
                    }
                }
            });
        }
        Ok(datastore)
    }

    /// Loads (or reloads) the database from the log: resets the indexes,
    /// replays the file, rebuilds every index, compacts, and marks the
    /// executor ready. Operations submitted before this completes stay
    /// buffered, in order.
    pub fn load_database(&self) -> LigniteResult<()> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .executor
            .submit_forced(move || inner.load_database())
    }

    /// Inserts one document, returning a deep copy of the stored state
    /// (with its assigned `_id` and any timestamps).
    pub fn insert(&self, doc: Document) -> LigniteResult<Document> {
        let inner = Arc::clone(&self.inner);
        self.inner.executor.submit(move || {
            let mut docs = inner.insert_docs(vec![doc])?;
            docs.pop().ok_or_else(|| {
                LigniteError::new("Insert produced no document", ErrorKind::InternalError)
            })
        })
    }

    /// Inserts a batch of documents atomically: either all of them enter
    /// the indexes and the log, or none do.
    pub fn insert_many(&self, docs: Vec<Document>) -> LigniteResult<Vec<Document>> {
        let inner = Arc::clone(&self.inner);
        self.inner.executor.submit(move || inner.insert_docs(docs))
    }

    /// Starts a query; chain cursor modifiers and call `exec`.
    pub fn find(&self, query: Document) -> Cursor {
        Cursor::new(self.clone(), QuerySource::Doc(query))
    }

    /// Starts a query from an already-built [Query], which is the way to
    /// use `$where` predicates.
    pub fn find_with(&self, query: Query) -> Cursor {
        Cursor::new(self.clone(), QuerySource::Parsed(query))
    }

    /// Returns the first matching document, if any.
    pub fn find_one(&self, query: Document) -> LigniteResult<Option<Document>> {
        let docs = self.find(query).limit(1).exec()?;
        Ok(docs.into_iter().next())
    }

    /// Counts the documents matching the query, using the same candidate
    /// selection as `find`.
    pub fn count(&self, query: Document) -> LigniteResult<usize> {
        let inner = Arc::clone(&self.inner);
        self.inner.executor.submit(move || inner.count_docs(&query))
    }

    /// Updates documents matching `query` with the given update expression
    /// (a replacement document or `$`-modifiers).
    pub fn update(
        &self,
        query: Document,
        update: Document,
        options: UpdateOptions,
    ) -> LigniteResult<UpdateResult> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .executor
            .submit(move || inner.update_docs(&query, &update, options))
    }

    /// Removes documents matching `query`.
    pub fn remove(&self, query: Document, options: RemoveOptions) -> LigniteResult<usize> {
        let inner = Arc::clone(&self.inner);
        self.inner.executor.submit(move || {
            let query = Query::parse(&query)?;
            inner.remove_docs(&query, options.multi)
        })
    }

    /// Creates a secondary index (a no-op when it already exists) and
    /// persists its DDL record. `expire_after_seconds` registers TTL
    /// expiration for the field.
    pub fn ensure_index(&self, descriptor: IndexDescriptor) -> LigniteResult<()> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .executor
            .submit(move || inner.ensure_index(descriptor))
    }

    /// Drops a secondary index and persists the removal.
    pub fn remove_index(&self, field_name: &str) -> LigniteResult<()> {
        let inner = Arc::clone(&self.inner);
        let field_name = field_name.to_string();
        self.inner
            .executor
            .submit(move || inner.remove_index(&field_name))
    }

    /// Rewrites the log to exactly the live state, then emits
    /// [DatastoreEvent::CompactionDone].
    pub fn compact_datafile(&self) -> LigniteResult<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.executor.submit(move || inner.compact())
    }

    /// Schedules compaction every `interval_ms` milliseconds (floored to
    /// five seconds), replacing any previous schedule.
    pub fn set_autocompaction_interval(&self, interval_ms: u64) {
        let interval = interval_ms.max(MIN_AUTOCOMPACTION_INTERVAL_MS);
        let weak: Weak<DatastoreInner> = Arc::downgrade(&self.inner);
        self.inner.scheduler.schedule_repeating(
            Duration::from_millis(interval),
            move || {
                if let Some(inner) = weak.upgrade() {
                    let task_inner = Arc::clone(&inner);
                    inner.executor.submit_detached(move || {
                        if let Err(error) = task_inner.compact() {
                            log::error!("Autocompaction failed: {}", error);
                        }
                    });
                }
            },
        );
    }

    /// Cancels the autocompaction timer.
    pub fn stop_autocompaction(&self) {
        self.inner.scheduler.stop();
    }

    /// Deep copies of every live document.
    pub fn get_all_data(&self) -> LigniteResult<Vec<Document>> {
        let inner = Arc::clone(&self.inner);
        self.inner.executor.submit(move || {
            let state = inner.state.lock();
            Ok(state
                .indexes
                .all_docs()
                .iter()
                .map(|doc| (**doc).clone())
                .collect())
        })
    }

    /// Empties the datastore and deletes its datafile. Autocompaction is
    /// cancelled; the executor keeps running.
    pub fn drop_database(&self) -> LigniteResult<()> {
        self.stop_autocompaction();
        let inner = Arc::clone(&self.inner);
        self.inner.executor.submit(move || {
            let mut state = inner.state.lock();
            state.indexes = IndexSet::new(inner.compare.clone());
            state.ttl_indexes.clear();
            inner.persistence.drop_datafile()
        })
    }

    /// Subscribes a listener to datastore events.
    pub fn subscribe(&self, listener: DatastoreEventListener) -> LigniteResult<SubscriberRef> {
        self.inner.event_bus.register(listener)
    }

    /// Removes a previously subscribed listener.
    pub fn unsubscribe(&self, subscriber: SubscriberRef) -> LigniteResult<()> {
        self.inner.event_bus.deregister(subscriber)
    }

    pub(crate) fn exec_cursor(&self, cursor: &Cursor) -> LigniteResult<Vec<Document>> {
        let plan = CursorPlan {
            query: cursor.query.clone(),
            limit: cursor.limit,
            skip: cursor.skip,
            sort: cursor.sort.clone(),
            projection: cursor.projection.clone(),
        };
        let inner = Arc::clone(&self.inner);
        self.inner.executor.submit(move || inner.exec_plan(&plan))
    }
}

impl Drop for DatastoreInner {
    fn drop(&mut self) {
        self.scheduler.stop();
        self.executor.stop();
    }
}

impl DatastoreInner {
    fn load_database(self: &Arc<Self>) -> LigniteResult<()> {
        let mut state = self.state.lock();
        state.indexes.reset_all();
        state.indexes.remove_all_secondary();
        state.ttl_indexes.clear();

        let raw = self.persistence.load_raw()?;
        if raw.corrupt_count > 0 {
            log::warn!("Tolerated {} corrupt log lines at load", raw.corrupt_count);
        }

        for descriptor in &raw.indexes {
            if let Some(seconds) = descriptor.expire_after_seconds {
                state
                    .ttl_indexes
                    .insert(descriptor.field_name.clone(), seconds);
            }
            state.indexes.ensure_index(descriptor.clone())?;
        }
        for doc in raw.docs {
            let shared = Arc::new(doc);
            if let Err(error) = state.indexes.insert_into_indexes(&shared) {
                state.indexes.reset_all();
                return Err(error);
            }
        }

        // startup yields a fresh clean log
        let docs = state.indexes.all_docs();
        let descriptors = state.indexes.secondary_descriptors();
        self.persistence.rewrite(&docs, &descriptors)?;

        self.executor.set_ready();
        Ok(())
    }

    fn insert_docs(self: &Arc<Self>, docs: Vec<Document>) -> LigniteResult<Vec<Document>> {
        let mut state = self.state.lock();

        let mut prepared: Vec<SharedDocument> = Vec::with_capacity(docs.len());
        for doc in docs {
            let doc = self.prepare_document(doc, &state.indexes)?;
            prepared.push(Arc::new(doc));
        }

        let mut inserted: Vec<SharedDocument> = Vec::with_capacity(prepared.len());
        for doc in &prepared {
            if let Err(error) = state.indexes.insert_into_indexes(doc) {
                for earlier in &inserted {
                    state.indexes.remove_from_indexes(earlier);
                }
                return Err(error);
            }
            inserted.push(Arc::clone(doc));
        }

        let records: Vec<LogRecord> = prepared
            .iter()
            .map(|doc| LogRecord::Doc((**doc).clone()))
            .collect();
        self.persistence.persist_new_records(&records)?;

        Ok(prepared.iter().map(|doc| (**doc).clone()).collect())
    }

    /// Deep-copies the input, assigns a fresh collision-free `_id` when
    /// absent, fills timestamps, and validates the key rules.
    fn prepare_document(&self, mut doc: Document, indexes: &IndexSet) -> LigniteResult<Document> {
        if doc.id().is_none() {
            loop {
                let candidate = Value::String(random_id(ID_LENGTH));
                if indexes.id_index().search(&candidate).is_empty() {
                    doc.put(DOC_ID, candidate);
                    break;
                }
            }
        }
        if self.timestamp_data {
            let now = Value::date(current_time_millis());
            if doc.get(CREATED_AT).is_none() {
                doc.put(CREATED_AT, now.clone());
            }
            if doc.get(UPDATED_AT).is_none() {
                doc.put(UPDATED_AT, now);
            }
        }
        validate_document_keys(&doc)?;
        Ok(doc)
    }

    /// Candidate selection: the first applicable of indexed scalar
    /// equality, indexed `$in`, indexed range, then a full scan through the
    /// `_id` index. Expired TTL documents are filtered out here and
    /// scheduled for removal behind the current task.
    fn get_candidates(
        self: &Arc<Self>,
        state: &mut CoreState,
        query: &Query,
        dont_expire_stale_docs: bool,
    ) -> Vec<SharedDocument> {
        let fields = query.top_level_fields();
        let mut candidates: Option<Vec<SharedDocument>> = None;

        for (path, cond) in &fields {
            if let FieldCond::Literal(value) = cond {
                if value.is_comparable_scalar() {
                    if let Some(index) = state.indexes.get(path) {
                        candidates = Some(index.search(value));
                        break;
                    }
                }
            }
        }

        if candidates.is_none() {
            'in_scan: for (path, cond) in &fields {
                if let FieldCond::Ops(ops) = cond {
                    for op in ops {
                        if let CompareOp::In(values) = op {
                            if let Some(index) = state.indexes.get(path) {
                                candidates = Some(index.search_any(values));
                                break 'in_scan;
                            }
                        }
                    }
                }
            }
        }

        if candidates.is_none() {
            'range_scan: for (path, cond) in &fields {
                if let FieldCond::Ops(ops) = cond {
                    let mut range = RangeSpec::default();
                    for op in ops {
                        match op {
                            CompareOp::Lt(value) => range.lt = Some(value.clone()),
                            CompareOp::Lte(value) => range.lte = Some(value.clone()),
                            CompareOp::Gt(value) => range.gt = Some(value.clone()),
                            CompareOp::Gte(value) => range.gte = Some(value.clone()),
                            _ => {}
                        }
                    }
                    if !range.is_empty() {
                        if let Some(index) = state.indexes.get(path) {
                            candidates = Some(index.between_bounds(&range));
                            break 'range_scan;
                        }
                    }
                }
            }
        }

        let candidates = candidates.unwrap_or_else(|| state.indexes.all_docs());

        if dont_expire_stale_docs || state.ttl_indexes.is_empty() {
            return candidates;
        }

        let now = current_time_millis();
        let mut live = Vec::with_capacity(candidates.len());
        for doc in candidates {
            let expired = state.ttl_indexes.iter().any(|(field, seconds)| {
                matches!(doc.get_path(field), Value::DateTime(millis)
                    if now - millis > seconds.saturating_mul(1000))
            });
            if !expired {
                live.push(doc);
                continue;
            }
            // expiration is a plain remove, run after the current scan ends
            if let Some(id) = doc.id() {
                let remove_query = Query::Field {
                    path: DOC_ID.to_string(),
                    cond: FieldCond::Literal(id.clone()),
                };
                let inner = Arc::clone(self);
                self.executor.submit_detached(move || {
                    if let Err(error) = inner.remove_docs(&remove_query, false) {
                        log::error!("Failed to remove an expired document: {}", error);
                    }
                });
            }
        }
        live
    }

    fn exec_plan(self: &Arc<Self>, plan: &CursorPlan) -> LigniteResult<Vec<Document>> {
        let query = plan.query.parse()?;
        let projection = match &plan.projection {
            Some(doc) => Projection::parse(doc)?,
            None => Projection::identity(),
        };

        let mut state = self.state.lock();
        let candidates = self.get_candidates(&mut state, &query, false);
        drop(state);

        let skip = plan.skip.unwrap_or(0);
        let mut results: Vec<SharedDocument> = Vec::new();

        match &plan.sort {
            None => {
                let mut skipped = 0;
                for doc in candidates {
                    if !matches(&query, &doc, &self.compare) {
                        continue;
                    }
                    if skipped < skip {
                        skipped += 1;
                        continue;
                    }
                    results.push(doc);
                    if let Some(limit) = plan.limit {
                        if results.len() >= limit {
                            break;
                        }
                    }
                }
            }
            Some(sort_keys) => {
                for doc in candidates {
                    if matches(&query, &doc, &self.compare) {
                        results.push(doc);
                    }
                }
                results.sort_by(|a, b| {
                    for (field, direction) in sort_keys {
                        let ordering =
                            crate::common::compare_values(&a.get_path(field), &b.get_path(field), &self.compare);
                        let ordering = if *direction < 0 {
                            ordering.reverse()
                        } else {
                            ordering
                        };
                        if ordering != Ordering::Equal {
                            return ordering;
                        }
                    }
                    Ordering::Equal
                });
                results = results
                    .into_iter()
                    .skip(skip)
                    .take(plan.limit.unwrap_or(usize::MAX))
                    .collect();
            }
        }

        results.iter().map(|doc| projection.apply(doc)).collect()
    }

    fn count_docs(self: &Arc<Self>, query: &Document) -> LigniteResult<usize> {
        let query = Query::parse(query)?;
        let mut state = self.state.lock();
        let candidates = self.get_candidates(&mut state, &query, false);
        drop(state);
        Ok(candidates
            .iter()
            .filter(|doc| matches(&query, doc, &self.compare))
            .count())
    }

    fn update_docs(
        self: &Arc<Self>,
        query_doc: &Document,
        update_doc: &Document,
        options: UpdateOptions,
    ) -> LigniteResult<UpdateResult> {
        let query = Query::parse(query_doc)?;
        let update = parse_update(update_doc)?;

        let mut state = self.state.lock();
        let candidates = self.get_candidates(&mut state, &query, false);

        let mut pairs: Vec<(SharedDocument, SharedDocument)> = Vec::new();
        for doc in candidates {
            if !matches(&query, &doc, &self.compare) {
                continue;
            }
            let mut updated = apply_update(&doc, &update, &self.compare)?;
            if self.timestamp_data {
                if let Some(created) = doc.get(CREATED_AT) {
                    updated.put(CREATED_AT, created.clone());
                }
                updated.put(UPDATED_AT, Value::date(current_time_millis()));
            }
            pairs.push((doc, Arc::new(updated)));
            if !options.multi {
                break;
            }
        }

        if pairs.is_empty() {
            if !options.upsert {
                return Ok(UpdateResult {
                    num_affected: 0,
                    affected_documents: None,
                    upsert: false,
                });
            }
            drop(state);
            return self.upsert(query_doc, &update);
        }

        state.indexes.update_indexes(&pairs)?;

        let records: Vec<LogRecord> = pairs
            .iter()
            .map(|(_, updated)| LogRecord::Doc((**updated).clone()))
            .collect();
        self.persistence.persist_new_records(&records)?;

        let affected_documents = if options.return_updated_docs {
            Some(pairs.iter().map(|(_, updated)| (**updated).clone()).collect())
        } else {
            None
        };
        Ok(UpdateResult {
            num_affected: pairs.len(),
            affected_documents,
            upsert: false,
        })
    }

    /// Builds the upserted document: a replacement is used as-is, a
    /// modifier expression starts from the query's plain literals.
    fn upsert(
        self: &Arc<Self>,
        query_doc: &Document,
        update: &UpdateExpr,
    ) -> LigniteResult<UpdateResult> {
        let to_insert = match update {
            UpdateExpr::Replace(replacement) => replacement.clone(),
            UpdateExpr::Modify(_) => {
                let base = strict_copy(query_doc);
                apply_update(&base, update, &self.compare)?
            }
        };
        let mut inserted = self.insert_docs(vec![to_insert])?;
        let doc = inserted.pop().ok_or_else(|| {
            LigniteError::new("Upsert produced no document", ErrorKind::InternalError)
        })?;
        Ok(UpdateResult {
            num_affected: 1,
            affected_documents: Some(vec![doc]),
            upsert: true,
        })
    }

    fn remove_docs(self: &Arc<Self>, query: &Query, multi: bool) -> LigniteResult<usize> {
        let mut state = self.state.lock();
        // a remove must see stale docs, otherwise expiration would recurse
        let candidates = self.get_candidates(&mut state, query, true);

        let mut records: Vec<LogRecord> = Vec::new();
        for doc in candidates {
            if !matches(query, &doc, &self.compare) {
                continue;
            }
            state.indexes.remove_from_indexes(&doc);
            let id = doc.id().cloned().unwrap_or(Value::Null);
            records.push(LogRecord::Tombstone(id));
            if !multi {
                break;
            }
        }

        self.persistence.persist_new_records(&records)?;
        Ok(records.len())
    }

    fn ensure_index(self: &Arc<Self>, descriptor: IndexDescriptor) -> LigniteResult<()> {
        if descriptor.field_name.is_empty() {
            return Err(LigniteError::new(
                "Cannot create an index without a fieldName",
                ErrorKind::MissingFieldName,
            ));
        }

        let mut state = self.state.lock();
        if let Some(seconds) = descriptor.expire_after_seconds {
            state
                .ttl_indexes
                .insert(descriptor.field_name.clone(), seconds);
        }
        let created = state.indexes.ensure_index(descriptor.clone())?;
        if created {
            self.persistence
                .persist_new_records(&[LogRecord::IndexCreated(descriptor)])?;
        }
        Ok(())
    }

    fn remove_index(self: &Arc<Self>, field_name: &str) -> LigniteResult<()> {
        if field_name.is_empty() {
            return Err(LigniteError::new(
                "Cannot remove an index without a fieldName",
                ErrorKind::MissingFieldName,
            ));
        }

        let mut state = self.state.lock();
        state.indexes.remove_index(field_name)?;
        state.ttl_indexes.remove(field_name);
        self.persistence
            .persist_new_records(&[LogRecord::IndexRemoved(field_name.to_string())])?;
        Ok(())
    }

    fn compact(self: &Arc<Self>) -> LigniteResult<()> {
        let state = self.state.lock();
        let docs = state.indexes.all_docs();
        let descriptors = state.indexes.secondary_descriptors();
        drop(state);

        self.persistence.rewrite(&docs, &descriptors)?;
        if let Err(error) = self.event_bus.publish(DatastoreEvent::CompactionDone) {
            log::warn!("Failed to publish compaction event: {}", error);
        }
        Ok(())
    }
}

/// Copies only the plain keys of a query document: `$`-operators and dotted
/// paths are dropped, recursively. This is the seed of an upserted document.
fn strict_copy(doc: &Document) -> Document {
    let mut out = Document::new();
    for (key, value) in doc.iter() {
        if key.starts_with('$') || key.contains('.') {
            continue;
        }
        out.put(key.clone(), strict_copy_value(value));
    }
    out
}

fn strict_copy_value(value: &Value) -> Value {
    match value {
        Value::Document(doc) => Value::Document(strict_copy(doc)),
        Value::Array(items) => Value::Array(items.iter().map(strict_copy_value).collect()),
        other => other.clone(),
    }
}
