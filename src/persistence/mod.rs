pub mod serialization;
pub mod storage;

#[allow(clippy::module_inception)]
mod persistence;

pub use persistence::{LineTransform, Persistence, RawData};
pub use serialization::LogRecord;
