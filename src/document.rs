use im::OrdMap;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::common::{
    Value, DATE_TAG, DOC_ID, FIELD_SEPARATOR, INDEX_CREATED_TAG, INDEX_REMOVED_TAG, TOMBSTONE_TAG,
};
use crate::errors::{ErrorKind, LigniteError, LigniteResult};

/// A document stored in the index set. The `_id` index owns the canonical
/// copy; secondary indexes hold clones of the same `Arc`.
pub type SharedDocument = Arc<Document>;

/// Represents a schema-less document: an ordered map from string keys to
/// [Value]s.
///
/// Documents nest freely; the value of a key can itself be a document or an
/// array. Dotted paths (`"address.city"`, `"tags.0"`) address nested values
/// through [Document::get_path], but a literal key must never contain the
/// field separator and must not start with `$` (checked on every write
/// through the datastore).
///
/// Every persisted document carries a unique identifier under `_id`.
///
/// ## Structural sharing
///
/// The backing store is a persistent ordered map (`im::OrdMap`), so cloning a
/// document is cheap and never aliases mutable state: mutations create a new
/// map that shares structure with the original. The deep copies handed across
/// the API boundary are plain `clone()` calls.
#[derive(Clone, Default)]
pub struct Document {
    data: OrdMap<String, Value>,
}

impl Document {
    /// Creates a new empty document.
    pub fn new() -> Self {
        Document {
            data: OrdMap::new(),
        }
    }

    /// Checks if the document is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the number of top-level keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Associates `value` with `key`, replacing any previous value.
    ///
    /// The key is stored literally; it is not split on the field separator.
    /// Key validity (`$` prefix, separators) is enforced when the document
    /// enters the datastore, not here.
    pub fn put<T: Into<Value>>(&mut self, key: impl Into<String>, value: T) {
        self.data.insert(key.into(), value.into());
    }

    /// Returns the value associated with the top-level `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Removes the top-level `key`, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Checks if the document has the given top-level key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Iterates top-level entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }

    /// Iterates top-level keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    /// Returns the `_id` value, if the document has one.
    pub fn id(&self) -> Option<&Value> {
        self.data.get(DOC_ID)
    }

    /// Resolves a dotted path against this document.
    ///
    /// A numeric path segment indexes into an array; a non-numeric segment
    /// applied to an array maps the remaining path over every element,
    /// producing an array of results. A path that does not resolve yields
    /// [Value::Undefined].
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let doc = doc! { "a": { "b": [ { "c": 1 }, { "c": 2 } ] } };
    /// assert_eq!(doc.get_path("a.b.0.c"), Value::Number(1.0));
    /// assert_eq!(doc.get_path("a.b.c"), Value::Array(vec![1.0.into(), 2.0.into()]));
    /// assert_eq!(doc.get_path("a.x"), Value::Undefined);
    /// ```
    pub fn get_path(&self, path: &str) -> Value {
        let parts: SmallVec<[&str; 8]> = path.split(FIELD_SEPARATOR).collect();
        match self.data.get(parts[0]) {
            Some(value) => get_dot_value(value, &parts[1..]),
            None => Value::Undefined,
        }
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.data.iter()).finish()
    }
}

/// Resolves the remaining dotted path `parts` against `value`.
pub(crate) fn get_dot_value(value: &Value, parts: &[&str]) -> Value {
    if parts.is_empty() {
        return value.clone();
    }
    match value {
        Value::Document(doc) => match doc.get(parts[0]) {
            Some(inner) => get_dot_value(inner, &parts[1..]),
            None => Value::Undefined,
        },
        Value::Array(items) => {
            if let Ok(index) = parts[0].parse::<usize>() {
                match items.get(index) {
                    Some(inner) => get_dot_value(inner, &parts[1..]),
                    None => Value::Undefined,
                }
            } else {
                // a field access on an array maps over every element
                Value::Array(items.iter().map(|e| get_dot_value(e, parts)).collect())
            }
        }
        _ => Value::Undefined,
    }
}

/// Validates every key of the document tree.
///
/// Keys must not start with `$` and must not contain the field separator.
/// The on-disk sentinels are exempt when they carry the right payload:
/// `$$date` with a number, `$$deleted` with `true`, and the index DDL tags.
pub fn validate_document_keys(doc: &Document) -> LigniteResult<()> {
    for (key, value) in doc.iter() {
        check_key(key, value)?;
        validate_value_keys(value)?;
    }
    Ok(())
}

fn validate_value_keys(value: &Value) -> LigniteResult<()> {
    match value {
        Value::Document(doc) => validate_document_keys(doc),
        Value::Array(items) => {
            for item in items {
                validate_value_keys(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_key(key: &str, value: &Value) -> LigniteResult<()> {
    if key.starts_with('$') {
        let allowed = (key == DATE_TAG && matches!(value, Value::Number(_) | Value::DateTime(_)))
            || (key == TOMBSTONE_TAG && matches!(value, Value::Bool(true)))
            || key == INDEX_CREATED_TAG
            || key == INDEX_REMOVED_TAG;
        if !allowed {
            log::error!("Field name {} cannot begin with the $ character", key);
            return Err(LigniteError::new(
                &format!("Field name {} cannot begin with the $ character", key),
                ErrorKind::InvalidKey,
            ));
        }
    }
    if key.contains(FIELD_SEPARATOR) {
        log::error!("Field name {} cannot contain a {}", key, FIELD_SEPARATOR);
        return Err(LigniteError::new(
            &format!("Field name {} cannot contain a {}", key, FIELD_SEPARATOR),
            ErrorKind::InvalidKey,
        ));
    }
    Ok(())
}

/// Strips the quotes `stringify!` adds around string literal keys.
pub fn normalize(key: &str) -> String {
    key.trim_matches('"').to_string()
}

/// A macro to create a [Document] from key-value pairs.
///
/// Values can be literals, nested `{ ... }` documents, `[ ... ]` arrays or
/// arbitrary expressions convertible to [crate::Value].
///
/// # Examples
///
/// ```rust
/// use lignite::doc;
///
/// let doc = doc! {
///     "name": "Ada",
///     "age": 36,
///     "tags": ["math", "engines"],
///     "address": { "city": "London" },
/// };
/// assert_eq!(doc.len(), 4);
/// ```
#[macro_export]
macro_rules! doc {
    // match an empty document (with braces)
    ({}) => {
        $crate::document::Document::new()
    };

    // match an empty document
    () => {
        $crate::document::Document::new()
    };

    // match a document with key value pairs (outer braces)
    ({ $($key:tt : $value:tt),* $(,)? }) => {
        $crate::doc!($($key : $value),*)
    };

    // match a document with key value pairs
    ($($key:tt : $value:tt),* $(,)?) => {
        {
            #[allow(unused_imports)]
            use $crate::doc_value;

            let mut doc = $crate::document::Document::new();
            $(
                doc.put($crate::document::normalize(stringify!($key)), $crate::doc_value!($value));
            )*
            doc
        }
    };
}

#[macro_export]
macro_rules! doc_value {
    // match a nested document
    ({ $($key:tt : $value:tt),* $(,)? }) => {
        {
            $crate::common::Value::Document($crate::doc!{ $($key : $value),* })
        }
    };

    // match an array of values
    ([ $($value:tt),* $(,)? ]) => {
        $crate::common::Value::Array(vec![$($crate::doc_value!($value)),*])
    };

    // match an expression (variable, function call, literal, etc.)
    ($value:expr) => {
        $crate::common::Value::from($value)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_new_document_is_empty() {
        let doc = Document::new();
        assert!(doc.is_empty());
        assert_eq!(doc.len(), 0);
    }

    #[test]
    fn test_put_and_get() {
        let mut doc = Document::new();
        doc.put("name", "Ada");
        doc.put("age", 36);
        assert_eq!(doc.get("name"), Some(&Value::String("Ada".to_string())));
        assert_eq!(doc.get("age"), Some(&Value::Number(36.0)));
        assert_eq!(doc.get("missing"), None);
    }

    #[test]
    fn test_put_replaces_existing() {
        let mut doc = doc! { "status": "inactive" };
        doc.put("status", "active");
        assert_eq!(doc.get("status"), Some(&Value::String("active".to_string())));
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut doc = doc! { "a": 1, "b": 2 };
        assert_eq!(doc.remove("a"), Some(Value::Number(1.0)));
        assert_eq!(doc.remove("a"), None);
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_clone_does_not_alias() {
        let mut original = doc! { "a": 1 };
        let copy = original.clone();
        original.put("a", 2);
        assert_eq!(copy.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(original.get("a"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn test_doc_macro_nested() {
        let doc = doc! {
            "user": { "name": "Ada", "langs": ["en", "fr"] },
            "active": true,
        };
        assert_eq!(
            doc.get_path("user.name"),
            Value::String("Ada".to_string())
        );
        assert_eq!(doc.get_path("user.langs.1"), Value::String("fr".to_string()));
        assert_eq!(doc.get("active"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_get_path_top_level() {
        let doc = doc! { "a": 5 };
        assert_eq!(doc.get_path("a"), Value::Number(5.0));
        assert_eq!(doc.get_path("b"), Value::Undefined);
    }

    #[test]
    fn test_get_path_numeric_index() {
        let doc = doc! { "items": [10, 20, 30] };
        assert_eq!(doc.get_path("items.0"), Value::Number(10.0));
        assert_eq!(doc.get_path("items.2"), Value::Number(30.0));
        assert_eq!(doc.get_path("items.5"), Value::Undefined);
    }

    #[test]
    fn test_get_path_maps_over_array() {
        let doc = doc! { "planets": [ { "name": "Mars" }, { "name": "Venus" } ] };
        assert_eq!(
            doc.get_path("planets.name"),
            Value::Array(vec![
                Value::String("Mars".to_string()),
                Value::String("Venus".to_string())
            ])
        );
    }

    #[test]
    fn test_get_path_through_scalar_is_undefined() {
        let doc = doc! { "a": 1 };
        assert_eq!(doc.get_path("a.b"), Value::Undefined);
    }

    #[test]
    fn test_validate_rejects_dollar_keys() {
        let doc = doc! { "$bad": 1 };
        let err = validate_document_keys(&doc).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidKey);
    }

    #[test]
    fn test_validate_rejects_nested_dollar_keys() {
        let doc = doc! { "outer": { "$inner": 1 } };
        assert!(validate_document_keys(&doc).is_err());

        let doc = doc! { "list": [ { "$inner": 1 } ] };
        assert!(validate_document_keys(&doc).is_err());
    }

    #[test]
    fn test_validate_rejects_dotted_keys() {
        let mut doc = Document::new();
        doc.put("a.b", 1);
        let err = validate_document_keys(&doc).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidKey);
    }

    #[test]
    fn test_validate_allows_sentinels() {
        let mut date_doc = Document::new();
        date_doc.put(DATE_TAG, 12345);
        assert!(validate_document_keys(&date_doc).is_ok());

        let mut tombstone = Document::new();
        tombstone.put(TOMBSTONE_TAG, true);
        assert!(validate_document_keys(&tombstone).is_ok());
    }

    #[test]
    fn test_validate_rejects_malformed_sentinels() {
        let mut doc = Document::new();
        doc.put(TOMBSTONE_TAG, false);
        assert!(validate_document_keys(&doc).is_err());

        let mut doc = Document::new();
        doc.put(DATE_TAG, "not a number");
        assert!(validate_document_keys(&doc).is_err());
    }

    #[test]
    fn test_document_equality() {
        assert_eq!(doc! { "a": 1, "b": 2 }, doc! { "b": 2, "a": 1 });
        assert_ne!(doc! { "a": 1 }, doc! { "a": 2 });
    }

    #[test]
    fn test_iteration_is_key_ordered() {
        let doc = doc! { "c": 3, "a": 1, "b": 2 };
        let keys: Vec<&String> = doc.keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
