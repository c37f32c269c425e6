//! Log line serialization.
//!
//! Each log record is one line of JSON text. Dates are tagged as
//! `{"$$date": ms}` and promoted back on decode. Three record shapes share
//! the log: live document states, `{"$$deleted": true, "_id": ...}`
//! tombstones, and `$$indexCreated` / `$$indexRemoved` DDL records.

use crate::common::{Value, DATE_TAG, DOC_ID, INDEX_CREATED_TAG, INDEX_REMOVED_TAG, TOMBSTONE_TAG};
use crate::document::{validate_document_keys, Document};
use crate::errors::{ErrorKind, LigniteError, LigniteResult};
use crate::index::IndexDescriptor;
use serde_json::json;

/// One record of the append-only log.
#[derive(Clone, Debug, PartialEq)]
pub enum LogRecord {
    /// The live state of a document.
    Doc(Document),
    /// A tombstone for the given `_id`.
    Tombstone(Value),
    /// A secondary index was created.
    IndexCreated(IndexDescriptor),
    /// A secondary index was removed.
    IndexRemoved(String),
}

/// Serializes a document to one line of JSON, validating its keys first.
/// Undefined values are dropped; dates are tagged.
pub fn serialize_document(doc: &Document) -> LigniteResult<String> {
    validate_document_keys(doc)?;
    Ok(serde_json::to_string(&document_to_json(doc))?)
}

/// Serializes a log record to one line of JSON.
pub fn serialize_record(record: &LogRecord) -> LigniteResult<String> {
    match record {
        LogRecord::Doc(doc) => serialize_document(doc),
        LogRecord::Tombstone(id) => Ok(serde_json::to_string(&json!({
            TOMBSTONE_TAG: true,
            DOC_ID: value_to_json(id),
        }))?),
        LogRecord::IndexCreated(descriptor) => Ok(serde_json::to_string(&json!({
            INDEX_CREATED_TAG: descriptor,
        }))?),
        LogRecord::IndexRemoved(field_name) => Ok(serde_json::to_string(&json!({
            INDEX_REMOVED_TAG: field_name,
        }))?),
    }
}

/// Parses one log line back into a record.
pub fn parse_line(line: &str) -> LigniteResult<LogRecord> {
    let json: serde_json::Value = serde_json::from_str(line)?;
    let object = match json.as_object() {
        Some(object) => object,
        None => {
            return Err(LigniteError::new(
                "Log record is not an object",
                ErrorKind::InvalidDataType,
            ))
        }
    };

    if object.get(TOMBSTONE_TAG) == Some(&serde_json::Value::Bool(true)) {
        return match object.get(DOC_ID) {
            Some(id) => Ok(LogRecord::Tombstone(json_to_value(id))),
            None => Err(LigniteError::new(
                "Tombstone record has no _id",
                ErrorKind::InvalidDataType,
            )),
        };
    }
    if let Some(spec) = object.get(INDEX_CREATED_TAG) {
        let descriptor: IndexDescriptor = serde_json::from_value(spec.clone())?;
        return Ok(LogRecord::IndexCreated(descriptor));
    }
    if let Some(removed) = object.get(INDEX_REMOVED_TAG) {
        return match removed.as_str() {
            Some(field_name) => Ok(LogRecord::IndexRemoved(field_name.to_string())),
            None => Err(LigniteError::new(
                "$$indexRemoved record has no field name",
                ErrorKind::InvalidDataType,
            )),
        };
    }

    match json_to_value(&json) {
        Value::Document(doc) if doc.contains_key(DOC_ID) => Ok(LogRecord::Doc(doc)),
        Value::Document(_) => Err(LigniteError::new(
            "Document record has no _id",
            ErrorKind::InvalidDataType,
        )),
        _ => Err(LigniteError::new(
            "Log record is not a document",
            ErrorKind::InvalidDataType,
        )),
    }
}

fn document_to_json(doc: &Document) -> serde_json::Value {
    let mut object = serde_json::Map::with_capacity(doc.len());
    for (key, value) in doc.iter() {
        if value.is_undefined() {
            continue;
        }
        object.insert(key.clone(), value_to_json(value));
    }
    serde_json::Value::Object(object)
}

pub(crate) fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        // undefined is only reachable inside arrays, where it decays to null
        Value::Undefined | Value::Null => serde_json::Value::Null,
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::DateTime(millis) => json!({ DATE_TAG: millis }),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(value_to_json).collect())
        }
        Value::Document(doc) => document_to_json(doc),
    }
}

pub(crate) fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => {
            Value::Array(items.iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(object) => {
            // the date tag shape is promoted back to a date
            if object.len() == 1 {
                if let Some(millis) = object.get(DATE_TAG).and_then(|v| v.as_i64()) {
                    return Value::DateTime(millis);
                }
            }
            let mut doc = Document::new();
            for (key, value) in object {
                doc.put(key.clone(), json_to_value(value));
            }
            Value::Document(doc)
        }
    }
}
