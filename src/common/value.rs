use crate::document::Document;
use std::cmp::Ordering;
use std::sync::Arc;

/// A caller-supplied string comparator.
///
/// When set on a datastore it overrides the default lexicographic order for
/// every string comparison: sorts, index keys and the range operators.
pub type StringComparator = Arc<dyn Fn(&str, &str) -> Ordering + Send + Sync>;

/// Comparison context threaded through every value comparison.
///
/// Carries the optional custom string comparator. A default instance compares
/// strings with the natural `str` ordering.
#[derive(Clone, Default)]
pub struct CompareOptions {
    pub string_comparator: Option<StringComparator>,
}

impl CompareOptions {
    pub fn new() -> Self {
        CompareOptions {
            string_comparator: None,
        }
    }

    pub fn with_string_comparator(comparator: StringComparator) -> Self {
        CompareOptions {
            string_comparator: Some(comparator),
        }
    }

    #[inline]
    pub fn compare_strings(&self, a: &str, b: &str) -> Ordering {
        match &self.string_comparator {
            Some(cmp) => cmp(a, b),
            None => a.cmp(b),
        }
    }
}

impl std::fmt::Debug for CompareOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompareOptions")
            .field("string_comparator", &self.string_comparator.is_some())
            .finish()
    }
}

/// Represents a [Document] field value.
///
/// It can be a simple value like [Value::Number] or [Value::String], or a
/// complex value like [Value::Document] or [Value::Array].
///
/// # Variants
/// - `Undefined`: a missing field; produced by dot-path resolution when a path
///   does not resolve. Never stored in a document and never equal to anything
///   (including itself) for query purposes.
/// - `Null`: an explicit null
/// - `Number(f64)`: a finite number
/// - `String(String)`: a text value
/// - `Bool(bool)`: a boolean
/// - `DateTime(i64)`: a millisecond instant since the Unix epoch
/// - `Array(Vec<Value>)`: an ordered sequence of values
/// - `Document(Document)`: a nested document
///
/// # Ordering
///
/// Values order first by type band (`Undefined < Null < Number < String <
/// Bool < DateTime < Array < Document`) and then within the band: numbers,
/// strings and booleans naturally, dates by millisecond value, arrays
/// lexicographically by element (shorter wins ties), documents by their
/// key-sorted values pairwise (fewer keys wins ties). Use [compare_values];
/// `Value` deliberately does not implement `Ord`, the order depends on the
/// datastore's [CompareOptions].
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// A missing field.
    Undefined,
    /// Represents a null value.
    #[default]
    Null,
    /// Represents a finite numeric value.
    Number(f64),
    /// Represents a string value.
    String(String),
    /// Represents a boolean value.
    Bool(bool),
    /// Represents a millisecond instant since the Unix epoch.
    DateTime(i64),
    /// Represents an array value.
    Array(Vec<Value>),
    /// Represents a nested document.
    Document(Document),
}

impl Value {
    /// Creates a date value from a millisecond epoch instant.
    #[inline]
    pub fn date(millis: i64) -> Value {
        Value::DateTime(millis)
    }

    /// Returns the string value if the [Value] is [Value::String].
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the numeric value if the [Value] is [Value::Number].
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the boolean value if the [Value] is [Value::Bool].
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the millisecond instant if the [Value] is [Value::DateTime].
    #[inline]
    pub fn as_date_millis(&self) -> Option<i64> {
        match self {
            Value::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the array value if the [Value] is [Value::Array].
    #[inline]
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the document value if the [Value] is [Value::Document].
    #[inline]
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(v) => Some(v),
            _ => None,
        }
    }

    /// Checks if the [Value] is [Value::Undefined].
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Checks if the [Value] is [Value::Null].
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Checks if the [Value] is [Value::Array].
    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    /// Checks if the [Value] is [Value::Document].
    #[inline]
    pub fn is_document(&self) -> bool {
        matches!(self, Value::Document(_))
    }

    /// Checks if the [Value] is a scalar usable as an index equality key:
    /// null, number, string, boolean or date.
    #[inline]
    pub fn is_comparable_scalar(&self) -> bool {
        matches!(
            self,
            Value::Null
                | Value::Number(_)
                | Value::String(_)
                | Value::Bool(_)
                | Value::DateTime(_)
        )
    }

    /// JavaScript-flavored truthiness, used by `$exists`.
    ///
    /// The empty string counts as truthy here; `0`, `null`, `false` and a
    /// missing value do not.
    #[inline]
    pub(crate) fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            _ => true,
        }
    }

    /// Creates a new [Value] from the given value that implements [`Into<Value>`].
    pub fn from<T: Into<Value>>(value: T) -> Value {
        value.into()
    }

    #[inline]
    fn type_rank(&self) -> u8 {
        match self {
            Value::Undefined => 0,
            Value::Null => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Bool(_) => 4,
            Value::DateTime(_) => 5,
            Value::Array(_) => 6,
            Value::Document(_) => 7,
        }
    }
}

/// Total preorder over values.
///
/// Values order first by type band, then within the band. Strings use the
/// comparator from `options` when one is set. The result is consistent with
/// [values_equal] on equal inputs, except that `Undefined` compares equal to
/// `Undefined` here (needed for a total order) while never being equal for
/// query purposes.
pub fn compare_values(a: &Value, b: &Value, options: &CompareOptions) -> Ordering {
    let rank_a = a.type_rank();
    let rank_b = b.type_rank();
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }

    match (a, b) {
        (Value::Undefined, Value::Undefined) => Ordering::Equal,
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => options.compare_strings(x, y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::DateTime(x), Value::DateTime(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                let comp = compare_values(ex, ey, options);
                if comp != Ordering::Equal {
                    return comp;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Document(x), Value::Document(y)) => {
            // key-sorted values pairwise, fewer keys wins ties
            for ((_, vx), (_, vy)) in x.iter().zip(y.iter()) {
                let comp = compare_values(vx, vy, options);
                if comp != Ordering::Equal {
                    return comp;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => unreachable!("type bands already matched"),
    }
}

/// Structural equality for query purposes.
///
/// `Undefined` is never equal to anything, including itself. Arrays are equal
/// only if they have the same length and are element-wise equal; documents
/// only if they hold the same keys with equal values.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, _) | (_, Value::Undefined) => false,
        (Value::Null, Value::Null) => true,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::DateTime(x), Value::DateTime(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(ex, ey)| values_equal(ex, ey))
        }
        (Value::Document(x), Value::Document(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|((kx, vx), (ky, vy))| kx == ky && values_equal(vx, vy))
        }
        _ => false,
    }
}

// Rust-level equality, used by assertions and map comparisons. Unlike
// [values_equal], `Undefined` equals `Undefined` here.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Number(x), Value::Number(y)) => x == y,
            (Value::String(x), Value::String(y)) => x == y,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::DateTime(x), Value::DateTime(y)) => x == y,
            (Value::Array(x), Value::Array(y)) => x == y,
            (Value::Document(x), Value::Document(y)) => x == y,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    #[inline]
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    #[inline]
    fn from(value: i32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<i64> for Value {
    #[inline]
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<u32> for Value {
    #[inline]
    fn from(value: u32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<usize> for Value {
    #[inline]
    fn from(value: usize) -> Self {
        Value::Number(value as f64)
    }
}

impl From<f64> for Value {
    #[inline]
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        Value::Document(value)
    }
}

impl<T> From<Vec<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(|v| v.into()).collect())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

/// A macro to create a `Value` from a given expression.
///
/// # Examples
///
/// ```rust
/// use lignite::common::Value;
/// use lignite::val;
///
/// let int_value = val!(42);
/// assert_eq!(int_value, Value::Number(42.0));
///
/// let string_value = val!("hello");
/// assert_eq!(string_value, Value::String("hello".to_string()));
/// ```
#[macro_export]
macro_rules! val {
    ($value:expr) => {
        $crate::common::Value::from($value)
    };
}
