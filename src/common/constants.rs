// doc constants
pub const DOC_ID: &str = "_id";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";
pub const FIELD_SEPARATOR: char = '.';

// log record sentinels
pub const DATE_TAG: &str = "$$date";
pub const TOMBSTONE_TAG: &str = "$$deleted";
pub const INDEX_CREATED_TAG: &str = "$$indexCreated";
pub const INDEX_REMOVED_TAG: &str = "$$indexRemoved";
pub const SENTINEL_KEYS: [&str; 4] = [
    DATE_TAG,
    TOMBSTONE_TAG,
    INDEX_CREATED_TAG,
    INDEX_REMOVED_TAG,
];

// Compile-time assertion for sentinel count
const _: () = {
    const SENTINEL_COUNT: usize = 4;
    const ACTUAL_COUNT: usize = SENTINEL_KEYS.len();
    const _: [(); 1] = [(); (ACTUAL_COUNT == SENTINEL_COUNT) as usize];
};

// id constants
pub const ID_LENGTH: usize = 16;

// persistence constants
pub const TEMP_SUFFIX: char = '~';
pub const DEFAULT_CORRUPT_ALERT_THRESHOLD: f64 = 0.1;
pub const MIN_AUTOCOMPACTION_INTERVAL_MS: u64 = 5_000;

// event constants
pub const DATASTORE_EVENT: &str = "lignite_event";

pub const LIGNITE_VERSION: &str = env!("CARGO_PKG_VERSION");
