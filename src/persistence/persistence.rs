//! Append path, compaction rewrite, and load & replay.

use crate::common::util::id_utils::random_id;
use crate::common::{DEFAULT_CORRUPT_ALERT_THRESHOLD, TEMP_SUFFIX};
use crate::document::{Document, SharedDocument};
use crate::errors::{ErrorKind, LigniteError, LigniteResult};
use crate::index::IndexDescriptor;
use crate::persistence::serialization::{
    parse_line, serialize_document, serialize_record, value_to_json, LogRecord,
};
use crate::persistence::storage;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A line transform applied to every serialized log line (and inverted on
/// read). Supplied in pairs: `after_serialization` and
/// `before_deserialization`.
pub type LineTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// What a load recovered from the log: the surviving documents in first-seen
/// order, the index DDL still in effect, and the number of corrupt lines.
#[derive(Debug)]
pub struct RawData {
    pub docs: Vec<Document>,
    pub indexes: Vec<IndexDescriptor>,
    pub corrupt_count: usize,
}

/// The persistence engine of a datastore.
///
/// Owns the datafile path, the serialization hook pair and the corruption
/// threshold. All methods are called from executor tasks only; the log file
/// is never touched from anywhere else.
pub struct Persistence {
    filename: Option<PathBuf>,
    in_memory_only: bool,
    corrupt_alert_threshold: f64,
    after_serialization: Option<LineTransform>,
    before_deserialization: Option<LineTransform>,
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("filename", &self.filename)
            .field("in_memory_only", &self.in_memory_only)
            .field("corrupt_alert_threshold", &self.corrupt_alert_threshold)
            .field("after_serialization", &self.after_serialization.is_some())
            .field("before_deserialization", &self.before_deserialization.is_some())
            .finish()
    }
}

impl Persistence {
    /// Validates the configuration and builds the engine.
    ///
    /// # Errors
    ///
    /// - `ReservedFilename` when the datafile name ends with the crash-safe
    ///   temp suffix
    /// - `BadHooks` when only one serialization hook is supplied, or when
    ///   the pair does not round-trip
    pub fn new(
        filename: Option<PathBuf>,
        in_memory_only: bool,
        corrupt_alert_threshold: f64,
        after_serialization: Option<LineTransform>,
        before_deserialization: Option<LineTransform>,
    ) -> LigniteResult<Self> {
        if let Some(path) = &filename {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.ends_with(TEMP_SUFFIX) {
                log::error!("Datafile name {} uses the reserved ~ suffix", name);
                return Err(LigniteError::new(
                    &format!("The datafile name can't end with a {}", TEMP_SUFFIX),
                    ErrorKind::ReservedFilename,
                ));
            }
        }

        match (&after_serialization, &before_deserialization) {
            (Some(after), Some(before)) => validate_hooks(after, before)?,
            (None, None) => {}
            _ => {
                return Err(LigniteError::new(
                    "Serialization hooks must be supplied in pairs",
                    ErrorKind::BadHooks,
                ))
            }
        }

        let in_memory_only = in_memory_only || filename.is_none();
        Ok(Persistence {
            filename,
            in_memory_only,
            corrupt_alert_threshold,
            after_serialization,
            before_deserialization,
        })
    }

    pub fn in_memory(filename: Option<PathBuf>) -> LigniteResult<Self> {
        Persistence::new(filename, true, DEFAULT_CORRUPT_ALERT_THRESHOLD, None, None)
    }

    pub fn is_in_memory(&self) -> bool {
        self.in_memory_only
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    fn encode_line(&self, line: String) -> String {
        match &self.after_serialization {
            Some(hook) => hook(&line),
            None => line,
        }
    }

    fn decode_line<'a>(&self, line: &'a str) -> std::borrow::Cow<'a, str> {
        match &self.before_deserialization {
            Some(hook) => std::borrow::Cow::Owned(hook(line)),
            None => std::borrow::Cow::Borrowed(line),
        }
    }

    /// Appends the records produced by one mutation, in order, as one write.
    pub fn persist_new_records(&self, records: &[LogRecord]) -> LigniteResult<()> {
        if self.in_memory_only || records.is_empty() {
            return Ok(());
        }
        let filename = match &self.filename {
            Some(filename) => filename,
            None => return Ok(()),
        };

        let mut buffer = String::new();
        for record in records {
            buffer.push_str(&self.encode_line(serialize_record(record)?));
            buffer.push('\n');
        }
        storage::append_file(filename, &buffer)
    }

    /// Compaction: rewrites the whole cache as a fresh log using the
    /// crash-safe write protocol. Emits one line per live document plus one
    /// `$$indexCreated` line per secondary index.
    pub fn rewrite(
        &self,
        docs: &[SharedDocument],
        indexes: &[IndexDescriptor],
    ) -> LigniteResult<()> {
        if self.in_memory_only {
            return Ok(());
        }
        let filename = match &self.filename {
            Some(filename) => filename,
            None => return Ok(()),
        };

        let mut buffer = String::new();
        for doc in docs {
            buffer.push_str(&self.encode_line(serialize_document(doc)?));
            buffer.push('\n');
        }
        for descriptor in indexes {
            let record = LogRecord::IndexCreated(descriptor.clone());
            buffer.push_str(&self.encode_line(serialize_record(&record)?));
            buffer.push('\n');
        }
        storage::crash_safe_write_file(filename, &buffer)?;
        log::debug!("Compacted datafile {}", filename.display());
        Ok(())
    }

    /// Reads the whole log and replays it into the surviving documents and
    /// index DDL.
    pub fn load_raw(&self) -> LigniteResult<RawData> {
        if self.in_memory_only {
            return Ok(RawData {
                docs: Vec::new(),
                indexes: Vec::new(),
                corrupt_count: 0,
            });
        }
        let filename = match &self.filename {
            Some(filename) => filename.clone(),
            None => {
                return Ok(RawData {
                    docs: Vec::new(),
                    indexes: Vec::new(),
                    corrupt_count: 0,
                })
            }
        };

        if let Some(parent) = filename.parent() {
            if !parent.as_os_str().is_empty() {
                storage::mkdirp(parent)?;
            }
        }
        storage::ensure_datafile_integrity(&filename)?;
        let raw = storage::read(&filename)?;
        self.parse_raw_data(&raw)
    }

    /// Replays raw log text: keeps the latest state per `_id`, applies
    /// tombstones, tracks index DDL, and counts malformed lines. Exceeding
    /// the corruption threshold aborts with `CorruptDatafile`.
    pub(crate) fn parse_raw_data(&self, raw: &str) -> LigniteResult<RawData> {
        let lines: Vec<&str> = raw.split('\n').collect();
        // the final line is permitted to be blank and does not count
        let mut data_length = lines.len();
        if lines.last() == Some(&"") {
            data_length -= 1;
        }

        let mut corrupt_count = 0usize;
        let mut order: Vec<String> = Vec::new();
        let mut docs_by_id: HashMap<String, Document> = HashMap::new();
        let mut index_ddl: BTreeMap<String, IndexDescriptor> = BTreeMap::new();

        for (position, line) in lines.iter().enumerate() {
            if line.is_empty() && position + 1 == lines.len() {
                continue;
            }
            let decoded = self.decode_line(line);
            match parse_line(&decoded) {
                Ok(LogRecord::Doc(doc)) => {
                    if let Some(id) = doc.id() {
                        let key = id_key(id);
                        if !docs_by_id.contains_key(&key) {
                            order.push(key.clone());
                        }
                        docs_by_id.insert(key, doc);
                    }
                }
                Ok(LogRecord::Tombstone(id)) => {
                    let key = id_key(&id);
                    if docs_by_id.remove(&key).is_some() {
                        order.retain(|existing| existing != &key);
                    }
                }
                Ok(LogRecord::IndexCreated(descriptor)) => {
                    index_ddl.insert(descriptor.field_name.clone(), descriptor);
                }
                Ok(LogRecord::IndexRemoved(field_name)) => {
                    index_ddl.remove(&field_name);
                }
                Err(error) => {
                    log::warn!("Corrupt log line skipped: {}", error);
                    corrupt_count += 1;
                }
            }
        }

        if data_length > 0 {
            let ratio = corrupt_count as f64 / data_length as f64;
            if ratio > self.corrupt_alert_threshold {
                log::error!(
                    "{}% of the datafile is corrupt, refusing to start",
                    (ratio * 100.0).floor()
                );
                return Err(LigniteError::new(
                    &format!(
                        "More than {}% of the data file is corrupt, the wrong \
                         beforeDeserialization hook may be used or the file may be damaged",
                        (self.corrupt_alert_threshold * 100.0).floor()
                    ),
                    ErrorKind::CorruptDatafile,
                ));
            }
        }

        let docs = order
            .into_iter()
            .filter_map(|key| docs_by_id.remove(&key))
            .collect();
        Ok(RawData {
            docs,
            indexes: index_ddl.into_values().collect(),
            corrupt_count,
        })
    }

    /// Deletes the datafile and any leftover temp file.
    pub fn drop_datafile(&self) -> LigniteResult<()> {
        if let Some(filename) = &self.filename {
            let temp = storage::temp_path(filename);
            if storage::exists(&temp) {
                storage::unlink(&temp)?;
            }
            if storage::exists(filename) {
                storage::unlink(filename)?;
            }
        }
        Ok(())
    }
}

fn id_key(id: &crate::common::Value) -> String {
    serde_json::to_string(&value_to_json(id)).unwrap_or_default()
}

/// Checks that the hook pair is inverse by round-tripping random strings of
/// every length from 1 to 29, ten times each.
fn validate_hooks(after: &LineTransform, before: &LineTransform) -> LigniteResult<()> {
    for length in 1..=29 {
        for _ in 0..10 {
            let sample = random_id(length);
            if before(&after(&sample)) != sample {
                log::error!("Serialization hook pair does not round-trip");
                return Err(LigniteError::new(
                    "beforeDeserialization is not the reverse of afterSerialization",
                    ErrorKind::BadHooks,
                ));
            }
        }
    }
    Ok(())
}
