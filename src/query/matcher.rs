use crate::common::{compare_values, values_equal, CompareOptions, Value};
use crate::document::{get_dot_value, Document};
use crate::query::{CompareOp, FieldCond, Query};
use smallvec::SmallVec;
use std::cmp::Ordering;

/// Evaluates a parsed query against a document.
pub fn matches(query: &Query, doc: &Document, options: &CompareOptions) -> bool {
    match query {
        Query::All => true,
        Query::And(clauses) => clauses.iter().all(|q| matches(q, doc, options)),
        Query::Or(clauses) => clauses.iter().any(|q| matches(q, doc, options)),
        Query::Not(inner) => !matches(inner, doc, options),
        Query::Where(predicate) => predicate(doc),
        Query::Field { path, cond } => {
            let parts: SmallVec<[&str; 8]> = path.split('.').collect();
            let resolved = match doc.get(parts[0]) {
                Some(value) => get_dot_value(value, &parts[1..]),
                None => Value::Undefined,
            };
            match_cond(resolved, cond, false, options)
        }
    }
}

/// Evaluates a parsed query against a bare value, used by `$elemMatch` where
/// array elements may or may not be documents.
pub fn matches_value(query: &Query, value: &Value, options: &CompareOptions) -> bool {
    match query {
        Query::All => true,
        Query::And(clauses) => clauses.iter().all(|q| matches_value(q, value, options)),
        Query::Or(clauses) => clauses.iter().any(|q| matches_value(q, value, options)),
        Query::Not(inner) => !matches_value(inner, value, options),
        Query::Where(predicate) => match value {
            Value::Document(doc) => predicate(doc),
            _ => false,
        },
        Query::Field { path, cond } => {
            let parts: SmallVec<[&str; 8]> = path.split('.').collect();
            let resolved = get_dot_value(value, &parts);
            match_cond(resolved, cond, false, options)
        }
    }
}

/// Matches a single value directly against a condition, without the
/// any-element unwrapping applied to resolved field values. Used by `$pull`.
pub(crate) fn matches_cond(value: &Value, cond: &FieldCond, options: &CompareOptions) -> bool {
    match_cond(value.clone(), cond, false, options)
}

/// Matches a resolved field value against a condition.
///
/// When the value is an array and `treat_array_as_value` is false, the clause
/// matches if any element matches, except that a literal array compares as a
/// whole and an operator object containing an array-specific operator
/// (`$size`, `$elemMatch`) evaluates against the array as a whole.
fn match_cond(
    value: Value,
    cond: &FieldCond,
    treat_array_as_value: bool,
    options: &CompareOptions,
) -> bool {
    if let Value::Array(elements) = &value {
        if !treat_array_as_value {
            let whole_array = match cond {
                FieldCond::Literal(v) => v.is_array(),
                FieldCond::Ops(ops) => ops
                    .iter()
                    .any(|op| matches!(op, CompareOp::Size(_) | CompareOp::ElemMatch(_))),
            };
            if !whole_array {
                return elements
                    .iter()
                    .any(|element| match_cond(element.clone(), cond, false, options));
            }
        }
    }

    match cond {
        FieldCond::Literal(expected) => values_equal(&value, expected),
        FieldCond::Ops(ops) => ops.iter().all(|op| match_op(&value, op, options)),
    }
}

fn match_op(value: &Value, op: &CompareOp, options: &CompareOptions) -> bool {
    match op {
        CompareOp::Lt(bound) => ordered_cmp(value, bound, options) == Some(Ordering::Less),
        CompareOp::Lte(bound) => matches!(
            ordered_cmp(value, bound, options),
            Some(Ordering::Less) | Some(Ordering::Equal)
        ),
        CompareOp::Gt(bound) => ordered_cmp(value, bound, options) == Some(Ordering::Greater),
        CompareOp::Gte(bound) => matches!(
            ordered_cmp(value, bound, options),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        ),
        CompareOp::Ne(other) => !values_equal(value, other),
        CompareOp::In(candidates) => candidates.iter().any(|c| values_equal(value, c)),
        CompareOp::Nin(candidates) => !candidates.iter().any(|c| values_equal(value, c)),
        CompareOp::Regex(regex) => match value {
            Value::String(s) => regex.is_match(s),
            _ => false,
        },
        CompareOp::Exists(expected) => !value.is_undefined() == *expected,
        CompareOp::Size(expected) => match value {
            Value::Array(items) => items.len() as i64 == *expected,
            _ => false,
        },
        CompareOp::ElemMatch(sub) => match value {
            Value::Array(items) => items
                .iter()
                .any(|element| matches_value(sub, element, options)),
            _ => false,
        },
    }
}

/// Range comparisons are defined only between comparable scalars of the same
/// kind: number/number, string/string, date/date. Everything else is
/// incomparable and the operator yields false.
fn ordered_cmp(a: &Value, b: &Value, options: &CompareOptions) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_))
        | (Value::String(_), Value::String(_))
        | (Value::DateTime(_), Value::DateTime(_)) => Some(compare_values(a, b, options)),
        _ => None,
    }
}
