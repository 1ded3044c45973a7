//! # strata
//!
//! Embedded time-series database with a selector-and-aggregate query
//! language.
//!
//! strata stores `(timestamp, value)` points under named, label-qualified
//! streams and answers range queries such as `test_stream{test="asdf"}`
//! (a vector of points) or `sum(test_stream{test="asdf"})` (one scalar). It
//! is a synchronous library with no background threads, meant to be linked
//! into a host process directly or through the `strata-ffi` C boundary.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Three value kinds (`u64`, `i64`, `f64`), fixed per stream
//! - Buffered ingestion; `flush` writes immutable, checksummed, compressed
//!   segments
//! - Whole-segment `sum`, `count`, `min` and `max` answered from segment
//!   headers
//! - Scans merge durable segments and the write buffer in time order
//! - Concurrent scans alongside inserts; flushes are atomic to readers
//!
//! ## Quick Start
//!
//! ```rust
//! use strata::{Connection, QueryOutput, Value, ValueKind};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let dir = tempfile::tempdir()?;
//! let connection = Connection::open(dir.path())?;
//! connection.create_stream(r#"test_stream{test="asdf"}"#, ValueKind::UnsignedInteger)?;
//!
//! let mut inserter = connection.inserter(r#"test_stream{test="asdf"}"#)?;
//! for i in 0..1000 {
//!     inserter.insert_unsigned(i, i)?;
//! }
//! inserter.close()?;
//!
//! let mut points = connection.prepare(r#"test_stream{test="asdf"}"#, Some(0), Some(1000))?;
//! while let Some(point) = points.next_vector()? {
//!     assert_eq!(point.value, Value::UnsignedInteger(point.timestamp));
//! }
//!
//! let mut sum = connection.prepare(r#"sum(test_stream{test="asdf"})"#, Some(0), Some(1000))?;
//! assert_eq!(sum.next_output()?, QueryOutput::Scalar(Value::UnsignedInteger(499_500)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Connection`] opens a root directory and owns every stream
//! - [`Inserter`] batches writes into one stream
//! - [`Statement`] is a prepared query pulled one result at a time
//!
//! ## Modules
//!
//! - [`connection`]: root handle, stream creation, prepare, close
//! - [`catalog`]: stream identity and the persisted registry
//! - [`store`]: per-stream write buffer and segments
//! - [`segment`]: on-disk segment format
//! - [`codec`]: column encodings used by segments
//! - [`scan`]: time-ordered merge cursor
//! - [`inserter`]: buffered write handle
//! - [`query`]: lexer, parser, aggregates, planner
//! - [`statement`]: statement state machine and result protocol
//! - [`value`]: value kinds, points, time ranges
//! - [`config`]: connection options
//! - [`error`]: error types

pub mod catalog;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod inserter;
pub mod query;
pub mod scan;
pub mod segment;
pub mod statement;
pub mod store;
pub mod value;

// Re-export primary API types at crate root for convenience.
pub use catalog::{StreamId, StreamInfo, StreamKey};
pub use config::Options;
pub use connection::Connection;
pub use error::{ErrorKind, Result, StrataError};
pub use inserter::Inserter;
pub use query::AggregateFunction;
pub use statement::{QueryOutput, ReturnType, Statement};
pub use store::StoreStats;
pub use value::{Point, TimeRange, Timestamp, Value, ValueKind};
