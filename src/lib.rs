//! # Lignite - Embedded Document Database
//!
//! Lignite is a lightweight, embedded, single-process document database written
//! in Rust. A datastore holds one collection of schema-less documents, persists
//! it to a single append-only log file, and compacts that log periodically.
//!
//! ## Key Features
//!
//! - **Embedded**: no separate server process, no network interface
//! - **Schema-less documents**: nested maps, arrays, numbers, strings, booleans,
//!   dates and nulls
//! - **Rich querying**: a subset of the MongoDB query and update language
//!   (`$lt`, `$in`, `$regex`, `$elemMatch`, `$set`, `$push`, `$addToSet`, ...)
//! - **Secondary indexes**: unique, sparse and TTL variants over ordered trees
//! - **Crash-safe persistence**: append-only log with atomic rewrite compaction
//! - **Single-writer executor**: every mutation is serialized through a FIFO
//!   task queue, so indexes and the log always agree
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lignite::{doc, Datastore, DatastoreOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DatastoreOptions::new().filename("people.db").open()?;
//! db.load_database()?;
//!
//! db.insert(doc! { "name": "Ada", "age": 36 })?;
//!
//! let adults = db.find(doc! { "age": { "$gte": 18 } })
//!     .sort(&[("age", 1)])
//!     .exec()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`common`] - Value model, comparison algebra, constants, event bus
//! - [`document`] - The `Document` type and the `doc!` macro
//! - [`errors`] - Error types and result definitions
//! - [`query`] - Query parsing and the document matcher
//! - [`update`] - Update modifier engine
//! - [`projection`] - Field projections
//! - [`index`] - Ordered-key indexes and the transactional index set
//! - [`executor`] - The single-writer task queue
//! - [`persistence`] - Storage primitives, log serialization, compaction, recovery
//! - [`cursor`] - Query cursors with sort / skip / limit / projection
//! - [`datastore`] - The datastore façade

pub mod common;
pub mod cursor;
pub mod datastore;
pub mod document;
pub mod errors;
pub mod executor;
pub mod index;
pub mod persistence;
pub mod projection;
pub mod query;
pub mod update;

pub use common::event_bus::{DatastoreEvent, DatastoreEventListener, SubscriberRef};
pub use common::value::{CompareOptions, StringComparator, Value};
pub use cursor::Cursor;
pub use datastore::{Datastore, DatastoreOptions, RemoveOptions, UpdateOptions, UpdateResult};
pub use document::Document;
pub use errors::{ErrorKind, LigniteError, LigniteResult};
pub use index::IndexDescriptor;
pub use query::Query;
