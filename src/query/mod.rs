pub mod matcher;

pub use matcher::{matches, matches_value};

use crate::common::Value;
use crate::document::Document;
use crate::errors::{ErrorKind, LigniteError, LigniteResult};
use regex::Regex;
use std::sync::Arc;

/// A caller-supplied predicate, the `$where` clause of the query language.
pub type WherePredicate = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

/// A parsed query.
///
/// Queries are written as documents whose top-level keys are either dotted
/// field paths or the logical operators `$and`, `$or` and `$not`. A field
/// path maps to a literal (exact structural equality) or to an operator
/// object such as `{ "$gt": 5 }`. Parsing turns that document into this
/// closed tree; unknown `$`-operators are rejected up front.
///
/// Since a predicate cannot be written inside a document, `$where` clauses
/// are built programmatically with [Query::predicate] and combined with
/// parsed documents through [Query::and].
///
/// # Examples
///
/// ```ignore
/// let q = Query::parse(&doc! { "age": { "$gt": 18 }, "name": "Ada" })?;
/// let q = Query::and(vec![q, Query::predicate(|d| d.len() > 2)]);
/// ```
#[derive(Clone)]
pub enum Query {
    /// Matches every document.
    All,
    /// All sub-queries must match.
    And(Vec<Query>),
    /// At least one sub-query must match.
    Or(Vec<Query>),
    /// The sub-query must not match.
    Not(Box<Query>),
    /// A caller-supplied predicate over the whole document.
    Where(WherePredicate),
    /// A condition on a dotted field path.
    Field { path: String, cond: FieldCond },
}

/// The condition a field path is matched against.
#[derive(Clone)]
pub enum FieldCond {
    /// Exact structural equality with a literal value.
    Literal(Value),
    /// Every comparison operator of an operator object must hold.
    Ops(Vec<CompareOp>),
}

/// A single comparison operator inside an operator object.
#[derive(Clone)]
pub enum CompareOp {
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    Ne(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Regex(Regex),
    Exists(bool),
    Size(i64),
    ElemMatch(Box<Query>),
}

impl Query {
    /// Parses a query document into a [Query] tree.
    ///
    /// # Errors
    ///
    /// - `UnknownOperator` for an unrecognized `$`-prefixed key
    /// - `MixedQuery` when an operator object mixes `$`-operators with plain
    ///   keys
    /// - `InvalidDataType` when an operator receives an argument of the wrong
    ///   shape (`$in` without an array, `$size` without an integer, ...)
    pub fn parse(query: &Document) -> LigniteResult<Query> {
        let mut clauses = Vec::with_capacity(query.len());
        for (key, value) in query.iter() {
            match key.as_str() {
                "$and" => clauses.push(Query::And(parse_query_list(key, value)?)),
                "$or" => clauses.push(Query::Or(parse_query_list(key, value)?)),
                "$not" => match value {
                    Value::Document(sub) => {
                        clauses.push(Query::Not(Box::new(Query::parse(sub)?)))
                    }
                    _ => {
                        return Err(LigniteError::new(
                            "$not operator used without a query",
                            ErrorKind::InvalidDataType,
                        ))
                    }
                },
                "$where" => {
                    return Err(LigniteError::new(
                        "$where takes a predicate; build one with Query::predicate",
                        ErrorKind::InvalidDataType,
                    ))
                }
                k if k.starts_with('$') => {
                    log::error!("Unknown logical operator {}", k);
                    return Err(LigniteError::new(
                        &format!("Unknown logical operator {}", k),
                        ErrorKind::UnknownOperator,
                    ));
                }
                _ => clauses.push(Query::Field {
                    path: key.clone(),
                    cond: parse_field_cond(value)?,
                }),
            }
        }
        Ok(match clauses.len() {
            0 => Query::All,
            1 => clauses.pop().unwrap_or(Query::All),
            _ => Query::And(clauses),
        })
    }

    /// A query that matches every document.
    pub fn all() -> Query {
        Query::All
    }

    /// Conjunction of sub-queries.
    pub fn and(queries: Vec<Query>) -> Query {
        Query::And(queries)
    }

    /// Disjunction of sub-queries.
    pub fn or(queries: Vec<Query>) -> Query {
        Query::Or(queries)
    }

    /// Negation of a sub-query.
    pub fn not(query: Query) -> Query {
        Query::Not(Box::new(query))
    }

    /// A `$where` clause: the predicate receives each candidate document.
    pub fn predicate(f: impl Fn(&Document) -> bool + Send + Sync + 'static) -> Query {
        Query::Where(Arc::new(f))
    }

    /// The field conditions directly usable for index-based candidate
    /// selection: the query's own field clause, or the field clauses of a
    /// top-level conjunction.
    pub(crate) fn top_level_fields(&self) -> Vec<(&str, &FieldCond)> {
        match self {
            Query::Field { path, cond } => vec![(path.as_str(), cond)],
            Query::And(clauses) => clauses
                .iter()
                .filter_map(|clause| match clause {
                    Query::Field { path, cond } => Some((path.as_str(), cond)),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Query::All => write!(f, "All"),
            Query::And(qs) => f.debug_tuple("And").field(qs).finish(),
            Query::Or(qs) => f.debug_tuple("Or").field(qs).finish(),
            Query::Not(q) => f.debug_tuple("Not").field(q).finish(),
            Query::Where(_) => write!(f, "Where(<predicate>)"),
            Query::Field { path, cond } => {
                f.debug_struct("Field").field("path", path).field("cond", cond).finish()
            }
        }
    }
}

impl std::fmt::Debug for FieldCond {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldCond::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            FieldCond::Ops(ops) => f.debug_tuple("Ops").field(ops).finish(),
        }
    }
}

impl std::fmt::Debug for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompareOp::Lt(v) => f.debug_tuple("Lt").field(v).finish(),
            CompareOp::Lte(v) => f.debug_tuple("Lte").field(v).finish(),
            CompareOp::Gt(v) => f.debug_tuple("Gt").field(v).finish(),
            CompareOp::Gte(v) => f.debug_tuple("Gte").field(v).finish(),
            CompareOp::Ne(v) => f.debug_tuple("Ne").field(v).finish(),
            CompareOp::In(v) => f.debug_tuple("In").field(v).finish(),
            CompareOp::Nin(v) => f.debug_tuple("Nin").field(v).finish(),
            CompareOp::Regex(r) => f.debug_tuple("Regex").field(&r.as_str()).finish(),
            CompareOp::Exists(b) => f.debug_tuple("Exists").field(b).finish(),
            CompareOp::Size(n) => f.debug_tuple("Size").field(n).finish(),
            CompareOp::ElemMatch(q) => f.debug_tuple("ElemMatch").field(q).finish(),
        }
    }
}

fn parse_query_list(operator: &str, value: &Value) -> LigniteResult<Vec<Query>> {
    let items = match value {
        Value::Array(items) => items,
        _ => {
            log::error!("{} operator used without an array", operator);
            return Err(LigniteError::new(
                &format!("{} operator used without an array", operator),
                ErrorKind::InvalidDataType,
            ));
        }
    };
    let mut queries = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Document(sub) => queries.push(Query::parse(sub)?),
            _ => {
                return Err(LigniteError::new(
                    &format!("{} operands must be queries", operator),
                    ErrorKind::InvalidDataType,
                ))
            }
        }
    }
    Ok(queries)
}

pub(crate) fn parse_field_cond(value: &Value) -> LigniteResult<FieldCond> {
    if let Value::Document(obj) = value {
        let dollar_keys = obj.keys().filter(|k| k.starts_with('$')).count();
        if dollar_keys > 0 {
            if dollar_keys != obj.len() {
                log::error!("Cannot mix operators and normal fields in an operator object");
                return Err(LigniteError::new(
                    "You cannot mix operators and normal fields",
                    ErrorKind::MixedQuery,
                ));
            }
            let mut ops = Vec::with_capacity(obj.len());
            for (key, arg) in obj.iter() {
                ops.push(parse_compare_op(key, arg)?);
            }
            return Ok(FieldCond::Ops(ops));
        }
    }
    Ok(FieldCond::Literal(value.clone()))
}

fn parse_compare_op(key: &str, arg: &Value) -> LigniteResult<CompareOp> {
    match key {
        "$lt" => Ok(CompareOp::Lt(arg.clone())),
        "$lte" => Ok(CompareOp::Lte(arg.clone())),
        "$gt" => Ok(CompareOp::Gt(arg.clone())),
        "$gte" => Ok(CompareOp::Gte(arg.clone())),
        "$ne" => Ok(CompareOp::Ne(arg.clone())),
        "$in" => match arg {
            Value::Array(items) => Ok(CompareOp::In(items.clone())),
            _ => Err(LigniteError::new(
                "$in operator called with a non-array",
                ErrorKind::InvalidDataType,
            )),
        },
        "$nin" => match arg {
            Value::Array(items) => Ok(CompareOp::Nin(items.clone())),
            _ => Err(LigniteError::new(
                "$nin operator called with a non-array",
                ErrorKind::InvalidDataType,
            )),
        },
        "$regex" => match arg {
            Value::String(pattern) => match Regex::new(pattern) {
                Ok(regex) => Ok(CompareOp::Regex(regex)),
                Err(e) => Err(LigniteError::new(
                    &format!("$regex operator called with an invalid pattern: {}", e),
                    ErrorKind::InvalidDataType,
                )),
            },
            _ => Err(LigniteError::new(
                "$regex operator called with a non-string",
                ErrorKind::InvalidDataType,
            )),
        },
        "$exists" => Ok(CompareOp::Exists(arg.is_truthy())),
        "$size" => match arg {
            Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 => Ok(CompareOp::Size(*n as i64)),
            _ => Err(LigniteError::new(
                "$size operator called without an integer",
                ErrorKind::InvalidDataType,
            )),
        },
        "$elemMatch" => match arg {
            Value::Document(sub) => Ok(CompareOp::ElemMatch(Box::new(Query::parse(sub)?))),
            _ => Err(LigniteError::new(
                "$elemMatch operator called without a query",
                ErrorKind::InvalidDataType,
            )),
        },
        _ => {
            log::error!("Unknown comparison operator {}", key);
            Err(LigniteError::new(
                &format!("Unknown comparison operator {}", key),
                ErrorKind::UnknownOperator,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_parse_empty_query_matches_all() {
        let q = Query::parse(&doc! {}).unwrap();
        assert!(matches!(q, Query::All));
    }

    #[test]
    fn test_parse_literal_field() {
        let q = Query::parse(&doc! { "name": "Ada" }).unwrap();
        match q {
            Query::Field { path, cond } => {
                assert_eq!(path, "name");
                assert!(matches!(cond, FieldCond::Literal(_)));
            }
            other => panic!("unexpected query {:?}", other),
        }
    }

    #[test]
    fn test_parse_operator_object() {
        let q = Query::parse(&doc! { "age": { "$gt": 5, "$lte": 10 } }).unwrap();
        match q {
            Query::Field { cond: FieldCond::Ops(ops), .. } => assert_eq!(ops.len(), 2),
            other => panic!("unexpected query {:?}", other),
        }
    }

    #[test]
    fn test_parse_multi_key_becomes_and() {
        let q = Query::parse(&doc! { "a": 1, "b": 2 }).unwrap();
        match q {
            Query::And(clauses) => assert_eq!(clauses.len(), 2),
            other => panic!("unexpected query {:?}", other),
        }
    }

    #[test]
    fn test_parse_mixed_operator_object_fails() {
        let err = Query::parse(&doc! { "age": { "$gt": 5, "plain": 1 } }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::MixedQuery);
    }

    #[test]
    fn test_parse_unknown_operator_fails() {
        let err = Query::parse(&doc! { "age": { "$frobnicate": 5 } }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UnknownOperator);

        let err = Query::parse(&doc! { "$xor": [] }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UnknownOperator);
    }

    #[test]
    fn test_parse_logical_operators() {
        let q = Query::parse(&doc! { "$or": [ { "a": 1 }, { "b": 2 } ] }).unwrap();
        assert!(matches!(q, Query::Or(ref v) if v.len() == 2));

        let q = Query::parse(&doc! { "$not": { "a": 1 } }).unwrap();
        assert!(matches!(q, Query::Not(_)));
    }

    #[test]
    fn test_parse_logical_operator_without_array_fails() {
        let err = Query::parse(&doc! { "$or": 5 }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidDataType);
    }

    #[test]
    fn test_parse_in_requires_array() {
        let err = Query::parse(&doc! { "a": { "$in": 5 } }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidDataType);
    }

    #[test]
    fn test_parse_size_requires_integer() {
        let err = Query::parse(&doc! { "a": { "$size": 2.5 } }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidDataType);

        assert!(Query::parse(&doc! { "a": { "$size": 2 } }).is_ok());
    }

    #[test]
    fn test_parse_regex_compiles_pattern() {
        assert!(Query::parse(&doc! { "a": { "$regex": "^ab+c$" } }).is_ok());

        let err = Query::parse(&doc! { "a": { "$regex": "(" } }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidDataType);
    }

    #[test]
    fn test_top_level_fields() {
        let q = Query::parse(&doc! { "a": 1, "b": { "$gt": 2 } }).unwrap();
        let fields = q.top_level_fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].0, "a");

        let q = Query::parse(&doc! { "$or": [ { "a": 1 } ] }).unwrap();
        assert!(q.top_level_fields().is_empty());
    }
}
