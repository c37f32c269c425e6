//! End-to-end datastore scenarios: inserts and queries, cursor pipelines,
//! index rollback, `_id` immutability, projections, and crash recovery.

use lignite::{
    doc, val, Datastore, DatastoreOptions, ErrorKind, IndexDescriptor, RemoveOptions,
    UpdateOptions, Value,
};
use tempfile::tempdir;

fn memory_db() -> Datastore {
    let db = DatastoreOptions::new().open().unwrap();
    db.load_database().unwrap();
    db
}

fn ages_db() -> Datastore {
    let db = memory_db();
    for age in [5, 57, 52, 23, 89] {
        db.insert(doc! { "age": age }).unwrap();
    }
    db
}

fn ages_of(docs: &[lignite::Document]) -> Vec<Value> {
    docs.iter().map(|d| d.get_path("age")).collect()
}

// ============================================================================
// INSERT + FIND
// ============================================================================

#[test]
fn test_insert_and_find_all() {
    let db = ages_db();
    let docs = db.find(doc! {}).exec().unwrap();
    assert_eq!(docs.len(), 5);
}

#[test]
fn test_find_with_range_query() {
    let db = ages_db();
    let docs = db.find(doc! { "age": { "$gt": 23 } }).exec().unwrap();
    assert_eq!(docs.len(), 3);

    let mut ages: Vec<f64> = docs
        .iter()
        .filter_map(|d| d.get_path("age").as_f64())
        .collect();
    ages.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(ages, vec![52.0, 57.0, 89.0]);
}

// ============================================================================
// SORT + LIMIT + SKIP
// ============================================================================

#[test]
fn test_sort_with_limit() {
    let db = ages_db();
    let docs = db.find(doc! {}).sort(&[("age", 1)]).limit(3).exec().unwrap();
    assert_eq!(ages_of(&docs), vec![val!(5), val!(23), val!(52)]);
}

#[test]
fn test_sort_with_limit_and_skip() {
    let db = ages_db();
    let docs = db
        .find(doc! {})
        .sort(&[("age", 1)])
        .limit(8)
        .skip(2)
        .exec()
        .unwrap();
    assert_eq!(ages_of(&docs), vec![val!(52), val!(57), val!(89)]);
}

#[test]
fn test_sort_with_skip_past_the_end() {
    let db = ages_db();
    let docs = db.find(doc! {}).sort(&[("age", 1)]).skip(7).exec().unwrap();
    assert!(docs.is_empty());
}

// ============================================================================
// UNIQUE INDEX ROLLBACK
// ============================================================================

#[test]
fn test_unique_index_rollback_leaves_both_indexes_untouched() {
    let db = memory_db();
    db.ensure_index(IndexDescriptor::new("name").unique(true))
        .unwrap();
    db.insert(doc! { "name": "a" }).unwrap();

    let err = db.insert(doc! { "name": "a" }).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::UniqueViolation);

    // exactly one document, reachable through both indexes
    assert_eq!(db.find(doc! {}).exec().unwrap().len(), 1);
    assert_eq!(db.find(doc! { "name": "a" }).exec().unwrap().len(), 1);
}

// ============================================================================
// UPDATE PRESERVES _id
// ============================================================================

#[test]
fn test_modifier_update_preserves_id() {
    let db = memory_db();
    db.insert(doc! { "_id": "X", "a": 1 }).unwrap();

    db.update(
        doc! { "_id": "X" },
        doc! { "$inc": { "a": 2 } },
        UpdateOptions::default(),
    )
    .unwrap();
    let doc = db.find_one(doc! { "_id": "X" }).unwrap().unwrap();
    assert_eq!(doc, doc! { "_id": "X", "a": 3 });

    let err = db
        .update(
            doc! { "_id": "X" },
            doc! { "_id": "Y", "a": 0 },
            UpdateOptions::default(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::ImmutableId);

    // the document is unchanged after the failed update
    let doc = db.find_one(doc! { "_id": "X" }).unwrap().unwrap();
    assert_eq!(doc, doc! { "_id": "X", "a": 3 });
    assert!(db.find_one(doc! { "_id": "Y" }).unwrap().is_none());
}

// ============================================================================
// PROJECTIONS
// ============================================================================

#[test]
fn test_mixed_projection_fails() {
    let db = ages_db();
    let err = db
        .find(doc! {})
        .projection(doc! { "age": 1, "name": 0 })
        .exec()
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::MixedProjection);
}

#[test]
fn test_projection_without_id() {
    let db = ages_db();
    let docs = db
        .find(doc! {})
        .sort(&[("age", 1)])
        .projection(doc! { "age": 1, "_id": 0 })
        .exec()
        .unwrap();
    assert_eq!(
        docs,
        vec![
            doc! { "age": 5 },
            doc! { "age": 23 },
            doc! { "age": 52 },
            doc! { "age": 57 },
            doc! { "age": 89 },
        ]
    );
}

// ============================================================================
// CRASH-SAFE COMPACTION RECOVERY
// ============================================================================

#[test]
fn test_restart_recovers_from_interrupted_compaction() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.db");
    let temp = dir.path().join("store.db~");

    // a compaction rewrite that was killed between temp-write and rename:
    // the fresh rewrite only exists under the reserved temp name
    let rewrite = "{\"_id\":\"1\",\"a\":1}\n{\"_id\":\"2\",\"a\":2}\n{\"_id\":\"3\",\"a\":3}\n";
    std::fs::write(&temp, rewrite).unwrap();
    assert!(!path.exists());

    let db = DatastoreOptions::new().filename(&path).open().unwrap();
    db.load_database().unwrap();

    // the temp file was promoted and every live document recovered
    let docs = db.find(doc! {}).exec().unwrap();
    assert_eq!(docs.len(), 3);
    assert!(!temp.exists());

    // the post-load compaction leaves a single fresh rewrite
    let raw = std::fs::read_to_string(&path).unwrap();
    assert_eq!(raw.lines().count(), 3);
}

#[test]
fn test_compaction_drops_tombstones_and_stale_states() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.db");

    // a log with stale states and tombstones
    let log = concat!(
        "{\"_id\":\"1\",\"a\":1}\n",
        "{\"_id\":\"2\",\"a\":2}\n",
        "{\"_id\":\"1\",\"a\":10}\n",
        "{\"$$deleted\":true,\"_id\":\"2\"}\n",
        "{\"_id\":\"3\",\"a\":3}\n",
    );
    std::fs::write(&path, log).unwrap();

    let db = DatastoreOptions::new().filename(&path).open().unwrap();
    db.load_database().unwrap();

    let docs = db.find(doc! {}).exec().unwrap();
    assert_eq!(docs.len(), 2);
    let one = db.find_one(doc! { "_id": "1" }).unwrap().unwrap();
    assert_eq!(one.get_path("a"), val!(10));

    // load compacts: two lines, no tombstones
    let raw = std::fs::read_to_string(&path).unwrap();
    assert_eq!(raw.lines().count(), 2);
    assert!(!raw.contains("$$deleted"));
}

// ============================================================================
// RESTART EQUALS PRE-SHUTDOWN STATE
// ============================================================================

#[test]
fn test_state_survives_restart_exactly() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.db");

    let before = {
        let db = DatastoreOptions::new().filename(&path).open().unwrap();
        db.load_database().unwrap();
        db.ensure_index(IndexDescriptor::new("tag")).unwrap();
        for i in 0..10 {
            db.insert(doc! { "_id": (format!("doc{}", i)), "n": i, "tag": (i % 3) })
                .unwrap();
        }
        db.update(
            doc! { "tag": 0 },
            doc! { "$set": { "flag": true } },
            UpdateOptions { multi: true, ..Default::default() },
        )
        .unwrap();
        db.remove(doc! { "n": { "$gte": 8 } }, RemoveOptions { multi: true })
            .unwrap();
        let mut docs = db.find(doc! {}).sort(&[("n", 1)]).exec().unwrap();
        docs.sort_by(|a, b| format!("{:?}", a).cmp(&format!("{:?}", b)));
        docs
    };

    let db = DatastoreOptions::new().filename(&path).open().unwrap();
    db.load_database().unwrap();
    let mut after = db.find(doc! {}).sort(&[("n", 1)]).exec().unwrap();
    after.sort_by(|a, b| format!("{:?}", a).cmp(&format!("{:?}", b)));

    assert_eq!(before, after);
    // the secondary index still answers queries
    assert_eq!(db.find(doc! { "tag": 1 }).exec().unwrap().len(), 3);
}

// ============================================================================
// ARRAY FIELDS AND SECONDARY INDEXES
// ============================================================================

#[test]
fn test_array_field_indexing_and_queries() {
    let db = memory_db();
    db.ensure_index(IndexDescriptor::new("tags")).unwrap();
    db.insert(doc! { "_id": "1", "tags": ["db", "rust"] }).unwrap();
    db.insert(doc! { "_id": "2", "tags": ["rust"] }).unwrap();
    db.insert(doc! { "_id": "3", "tags": ["paper"] }).unwrap();

    assert_eq!(db.find(doc! { "tags": "rust" }).exec().unwrap().len(), 2);
    assert_eq!(
        db.find(doc! { "tags": { "$in": ["db", "paper"] } })
            .exec()
            .unwrap()
            .len(),
        2
    );
    assert_eq!(db.count(doc! { "tags": { "$size": 2 } }).unwrap(), 1);
}

#[test]
fn test_unique_index_on_array_elements() {
    let db = memory_db();
    db.ensure_index(IndexDescriptor::new("nick").unique(true))
        .unwrap();
    db.insert(doc! { "_id": "1", "nick": ["ada", "lovelace"] })
        .unwrap();

    let err = db
        .insert(doc! { "_id": "2", "nick": ["byron", "ada"] })
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::UniqueViolation);

    // rollback left no trace of the failed document
    assert_eq!(db.find(doc! {}).exec().unwrap().len(), 1);
    assert!(db.find_one(doc! { "nick": "byron" }).unwrap().is_none());
}

// ============================================================================
// OPERATOR COVERAGE THROUGH THE FULL STACK
// ============================================================================

#[test]
fn test_logical_and_pattern_operators() {
    let db = memory_db();
    db.insert(doc! { "name": "lignite", "kind": "mineral" }).unwrap();
    db.insert(doc! { "name": "granite", "kind": "rock" }).unwrap();
    db.insert(doc! { "name": "nitrite", "kind": "ion" }).unwrap();

    assert_eq!(
        db.count(doc! { "name": { "$regex": "ite$" } }).unwrap(),
        3
    );
    assert_eq!(
        db.count(doc! { "$or": [ { "kind": "rock" }, { "kind": "ion" } ] })
            .unwrap(),
        2
    );
    assert_eq!(
        db.count(doc! { "$not": { "kind": "mineral" } }).unwrap(),
        2
    );
    assert_eq!(
        db.count(doc! { "kind": { "$nin": ["rock", "ion"] } }).unwrap(),
        1
    );
    assert_eq!(db.count(doc! { "kind": { "$exists": true } }).unwrap(), 3);
}

#[test]
fn test_elem_match_through_datastore() {
    let db = memory_db();
    db.insert(doc! { "_id": "1", "readings": [ { "t": 5 }, { "t": 30 } ] })
        .unwrap();
    db.insert(doc! { "_id": "2", "readings": [ { "t": 10 } ] })
        .unwrap();

    let docs = db
        .find(doc! { "readings": { "$elemMatch": { "t": { "$gt": 20 } } } })
        .exec()
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id(), Some(&val!("1")));
}

// ============================================================================
// SERIALIZATION HOOKS END TO END
// ============================================================================

#[test]
fn test_serialization_hooks_roundtrip_through_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.db");

    let open = |path: &std::path::Path| {
        DatastoreOptions::new()
            .filename(path)
            .serialization_hooks(
                std::sync::Arc::new(|line: &str| -> String {
                    // a toy obfuscation: reverse the line
                    line.chars().rev().collect()
                }),
                std::sync::Arc::new(|line: &str| -> String { line.chars().rev().collect() }),
            )
            .open()
            .unwrap()
    };

    {
        let db = open(&path);
        db.load_database().unwrap();
        db.insert(doc! { "_id": "1", "secret": 42 }).unwrap();
    }

    // the raw file is not plain JSON lines
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.starts_with('{'));

    let db = open(&path);
    db.load_database().unwrap();
    let doc = db.find_one(doc! { "_id": "1" }).unwrap().unwrap();
    assert_eq!(doc.get_path("secret"), val!(42));
}
