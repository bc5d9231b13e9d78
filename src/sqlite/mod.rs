//! File-backed `SQLite` backend.
//!
//! - config: data directory, journaling, busy timeout, path containment
//! - params: `RowValues` to rusqlite values
//! - query: row extraction and result building
//! - driver: the [`Driver`](crate::driver::Driver) implementation

pub mod config;
pub mod driver;
pub mod params;
pub mod query;

pub use config::{SqliteOptions, SqliteOptionsBuilder};
pub use driver::SqliteDriver;
pub use query::build_result_set;
