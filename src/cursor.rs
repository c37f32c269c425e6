//! Query cursors.
//!
//! A cursor is a builder over a query: set `sort`, `skip`, `limit` and a
//! projection, then call [Cursor::exec]. Execution runs on the datastore's
//! executor and pipelines candidates → filter → sort/skip/limit →
//! projection. Without a sort, skip and limit apply during the scan with an
//! early-out; with one, all matches are collected first and sort, skip and
//! limit apply in that order.

use crate::datastore::Datastore;
use crate::document::Document;
use crate::errors::LigniteResult;
use crate::query::Query;

/// How the cursor's query was supplied.
#[derive(Clone)]
pub(crate) enum QuerySource {
    /// A query document, parsed at execution time.
    Doc(Document),
    /// An already-built [Query] (needed for `$where` predicates).
    Parsed(Query),
}

impl QuerySource {
    pub(crate) fn parse(&self) -> LigniteResult<Query> {
        match self {
            QuerySource::Doc(doc) => Query::parse(doc),
            QuerySource::Parsed(query) => Ok(query.clone()),
        }
    }
}

/// A builder that materializes a query result.
///
/// # Examples
///
/// ```ignore
/// let docs = db.find(doc! { "age": { "$gt": 18 } })
///     .sort(&[("age", 1), ("name", -1)])
///     .skip(10)
///     .limit(5)
///     .projection(doc! { "name": 1, "_id": 0 })
///     .exec()?;
/// ```
#[derive(Clone)]
pub struct Cursor {
    pub(crate) datastore: Datastore,
    pub(crate) query: QuerySource,
    pub(crate) limit: Option<usize>,
    pub(crate) skip: Option<usize>,
    pub(crate) sort: Option<Vec<(String, i32)>>,
    pub(crate) projection: Option<Document>,
}

impl Cursor {
    pub(crate) fn new(datastore: Datastore, query: QuerySource) -> Cursor {
        Cursor {
            datastore,
            query,
            limit: None,
            skip: None,
            sort: None,
            projection: None,
        }
    }

    /// Caps the number of returned documents.
    pub fn limit(mut self, limit: usize) -> Cursor {
        self.limit = Some(limit);
        self
    }

    /// Skips the first `skip` matching documents.
    pub fn skip(mut self, skip: usize) -> Cursor {
        self.skip = Some(skip);
        self
    }

    /// Sorts by the given `(field, direction)` keys, applied
    /// lexicographically: the first key with a non-equal comparison decides.
    /// A non-negative direction is ascending, a negative one descending.
    pub fn sort(mut self, keys: &[(&str, i32)]) -> Cursor {
        self.sort = Some(
            keys.iter()
                .map(|(field, direction)| (field.to_string(), *direction))
                .collect(),
        );
        self
    }

    /// Sets the projection applied to each result.
    pub fn projection(mut self, projection: Document) -> Cursor {
        self.projection = Some(projection);
        self
    }

    /// Executes the query on the datastore's executor and returns deep
    /// copies of the matching documents.
    pub fn exec(&self) -> LigniteResult<Vec<Document>> {
        self.datastore.exec_cursor(self)
    }
}

#[cfg(test)]
mod tests {
    use crate::datastore::DatastoreOptions;
    use crate::doc;
    use crate::errors::ErrorKind;
    use crate::val;

    fn memory_db() -> crate::datastore::Datastore {
        let db = DatastoreOptions::new().open().unwrap();
        db.load_database().unwrap();
        db
    }

    fn ages_db() -> crate::datastore::Datastore {
        let db = memory_db();
        for age in [5, 57, 52, 23, 89] {
            db.insert(doc! { "age": age }).unwrap();
        }
        db
    }

    #[test]
    fn test_exec_returns_all_matches() {
        let db = ages_db();
        assert_eq!(db.find(doc! {}).exec().unwrap().len(), 5);
        assert_eq!(
            db.find(doc! { "age": { "$gt": 23 } }).exec().unwrap().len(),
            3
        );
    }

    #[test]
    fn test_sort_ascending_and_descending() {
        let db = ages_db();
        let docs = db.find(doc! {}).sort(&[("age", 1)]).exec().unwrap();
        let ages: Vec<_> = docs.iter().map(|d| d.get_path("age")).collect();
        assert_eq!(ages, vec![val!(5), val!(23), val!(52), val!(57), val!(89)]);

        let docs = db.find(doc! {}).sort(&[("age", -1)]).exec().unwrap();
        let ages: Vec<_> = docs.iter().map(|d| d.get_path("age")).collect();
        assert_eq!(ages, vec![val!(89), val!(57), val!(52), val!(23), val!(5)]);
    }

    #[test]
    fn test_sort_limit_skip_pipeline() {
        let db = ages_db();

        let docs = db.find(doc! {}).sort(&[("age", 1)]).limit(3).exec().unwrap();
        let ages: Vec<_> = docs.iter().map(|d| d.get_path("age")).collect();
        assert_eq!(ages, vec![val!(5), val!(23), val!(52)]);

        let docs = db
            .find(doc! {})
            .sort(&[("age", 1)])
            .limit(8)
            .skip(2)
            .exec()
            .unwrap();
        let ages: Vec<_> = docs.iter().map(|d| d.get_path("age")).collect();
        assert_eq!(ages, vec![val!(52), val!(57), val!(89)]);

        let docs = db.find(doc! {}).sort(&[("age", 1)]).skip(7).exec().unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn test_skip_limit_without_sort() {
        let db = ages_db();
        let docs = db.find(doc! {}).limit(2).exec().unwrap();
        assert_eq!(docs.len(), 2);

        let docs = db.find(doc! {}).skip(4).exec().unwrap();
        assert_eq!(docs.len(), 1);

        let docs = db.find(doc! {}).skip(5).exec().unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn test_multi_key_sort() {
        let db = memory_db();
        db.insert(doc! { "a": 1, "b": 2 }).unwrap();
        db.insert(doc! { "a": 1, "b": 1 }).unwrap();
        db.insert(doc! { "a": 0, "b": 9 }).unwrap();

        let docs = db
            .find(doc! {})
            .sort(&[("a", 1), ("b", -1)])
            .exec()
            .unwrap();
        let pairs: Vec<_> = docs
            .iter()
            .map(|d| (d.get_path("a"), d.get_path("b")))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (val!(0), val!(9)),
                (val!(1), val!(2)),
                (val!(1), val!(1))
            ]
        );
    }

    #[test]
    fn test_sort_missing_fields_first_ascending() {
        let db = memory_db();
        db.insert(doc! { "a": 1 }).unwrap();
        db.insert(doc! { "b": 1 }).unwrap();

        let docs = db.find(doc! {}).sort(&[("a", 1)]).exec().unwrap();
        // the document without `a` sorts before any value
        assert!(docs[0].get("a").is_none());
        assert_eq!(docs[1].get_path("a"), val!(1));
    }

    #[test]
    fn test_projection_through_cursor() {
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

    #[test]
    fn test_mixed_projection_fails_at_exec() {
        let db = ages_db();
        let err = db
            .find(doc! {})
            .projection(doc! { "age": 1, "name": 0 })
            .exec()
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::MixedProjection);
    }

    #[test]
    fn test_query_parse_errors_surface_at_exec() {
        let db = ages_db();
        let err = db.find(doc! { "age": { "$bogus": 1 } }).exec().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UnknownOperator);
    }

    #[test]
    fn test_results_are_deep_copies() {
        let db = memory_db();
        db.insert(doc! { "_id": "1", "a": 1 }).unwrap();

        let mut fetched = db.find(doc! {}).exec().unwrap().remove(0);
        fetched.put("a", 999);

        let again = db.find(doc! {}).exec().unwrap().remove(0);
        assert_eq!(again.get_path("a"), val!(1));
    }

    #[test]
    fn test_cursor_is_reusable() {
        let db = ages_db();
        let cursor = db.find(doc! { "age": { "$lt": 50 } });
        assert_eq!(cursor.exec().unwrap().len(), 2);
        assert_eq!(cursor.exec().unwrap().len(), 2);
    }
}
