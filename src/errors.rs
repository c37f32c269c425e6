use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;
use std::sync::Arc;

/// Error kinds for Lignite operations.
///
/// Each kind describes a specific category of failure, enabling precise error
/// handling at call sites.
///
/// # Examples
///
/// ```rust,ignore
/// use lignite::errors::{ErrorKind, LigniteError, LigniteResult};
///
/// fn example() -> LigniteResult<()> {
///     Err(LigniteError::new("Field name missing", ErrorKind::MissingFieldName))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Constraint errors
    /// A unique index already holds the key being inserted
    UniqueViolation,
    /// An update attempted to change the `_id` of a document
    ImmutableId,

    // Query errors
    /// A query operator object mixed `$`-operators with plain keys
    MixedQuery,
    /// An unknown `$`-prefixed query operator was used
    UnknownOperator,

    // Update errors
    /// An update expression mixed modifiers with plain fields
    MixedUpdate,
    /// An unknown `$`-prefixed update modifier was used
    UnknownModifier,
    /// A modifier was applied to a value of an incompatible type
    ModifierTypeError,

    // Projection errors
    /// A projection mixed inclusion and exclusion of fields
    MixedProjection,

    // Persistence errors
    /// The serialization hook pair does not round-trip
    BadHooks,
    /// Too many log lines failed to deserialize at load time
    CorruptDatafile,
    /// The datafile name uses the reserved crash-safe temp suffix
    ReservedFilename,
    /// A storage primitive failed
    IoError,

    // Validation errors
    /// A document key starts with `$` or contains the field separator
    InvalidKey,
    /// An operation received a value of an unexpected type
    InvalidDataType,
    /// An index was requested without a field name
    MissingFieldName,

    // Event errors
    /// Error in event bus processing
    EventError,

    // Generic/internal errors, used as fallback
    /// An invariant of the crate itself was broken
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::UniqueViolation => write!(f, "Unique constraint violation"),
            ErrorKind::ImmutableId => write!(f, "Immutable id"),
            ErrorKind::MixedQuery => write!(f, "Mixed query"),
            ErrorKind::UnknownOperator => write!(f, "Unknown operator"),
            ErrorKind::MixedUpdate => write!(f, "Mixed update"),
            ErrorKind::UnknownModifier => write!(f, "Unknown modifier"),
            ErrorKind::ModifierTypeError => write!(f, "Modifier type error"),
            ErrorKind::MixedProjection => write!(f, "Mixed projection"),
            ErrorKind::BadHooks => write!(f, "Bad serialization hooks"),
            ErrorKind::CorruptDatafile => write!(f, "Corrupt datafile"),
            ErrorKind::ReservedFilename => write!(f, "Reserved filename"),
            ErrorKind::IoError => write!(f, "IO error"),
            ErrorKind::InvalidKey => write!(f, "Invalid key"),
            ErrorKind::InvalidDataType => write!(f, "Invalid data type"),
            ErrorKind::MissingFieldName => write!(f, "Missing field name"),
            ErrorKind::EventError => write!(f, "Event error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Custom Lignite error type.
///
/// `LigniteError` encapsulates the error message, its kind, and an optional
/// cause. It supports error chaining and captures a backtrace at construction
/// time for debugging.
#[derive(Clone)]
pub struct LigniteError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<LigniteError>>,
    backtrace: Arc<Backtrace>,
}

impl LigniteError {
    /// Builds an error from a message and a kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        LigniteError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: Arc::new(Backtrace::new()),
        }
    }

    /// Builds an error that wraps an underlying one; the wrapped error stays
    /// reachable through [`LigniteError::cause`] and [`Error::source`].
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: LigniteError) -> Self {
        LigniteError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: Arc::new(Backtrace::new()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&LigniteError> {
        self.cause.as_deref()
    }
}

impl Display for LigniteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Debug for LigniteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // the whole chain, or the backtrace once the chain bottoms out
        write!(f, "{}: {}", self.error_kind, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, "\ncaused by: {:?}", cause)
        } else {
            write!(f, "\n{:?}", self.backtrace)
        }
    }
}

impl Error for LigniteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn Error + 'static))
    }
}

/// A result type alias for Lignite operations.
///
/// `LigniteResult<T>` is shorthand for `Result<T, LigniteError>`. All fallible
/// Lignite operations return this type.
pub type LigniteResult<T> = Result<T, LigniteError>;

// conversions so `?` works directly on fallible std calls
impl From<std::io::Error> for LigniteError {
    fn from(err: std::io::Error) -> Self {
        LigniteError::new(
            &format!("storage operation failed: {}", err),
            ErrorKind::IoError,
        )
    }
}

impl From<std::string::FromUtf8Error> for LigniteError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        LigniteError::new(
            &format!("input is not valid UTF-8: {}", err),
            ErrorKind::InvalidDataType,
        )
    }
}

impl From<serde_json::Error> for LigniteError {
    fn from(err: serde_json::Error) -> Self {
        LigniteError::new(
            &format!("JSON encoding error: {}", err),
            ErrorKind::InvalidDataType,
        )
    }
}

impl From<String> for LigniteError {
    fn from(msg: String) -> Self {
        LigniteError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for LigniteError {
    fn from(msg: &str) -> Self {
        LigniteError::new(msg, ErrorKind::InternalError)
    }
}
