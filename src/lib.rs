//! Single-worker SQL job engine.
//!
//! Callers on any thread submit statements against owner-scoped connections.
//! One dedicated worker thread runs them strictly in submission order, and
//! every completion is handed to a host-supplied [`MainScheduler`] so result
//! callbacks run on the host thread.
//!
//! ```no_run
//! # #[cfg(feature = "sqlite")]
//! # fn demo() -> Result<(), sql_dispatch::SqlDispatchError> {
//! use std::sync::Arc;
//! use sql_dispatch::prelude::*;
//!
//! let mut ticks = TickQueue::new();
//! let driver = SqliteOptionsBuilder::new("data").build()?;
//! let engine = SqliteEngine::start(driver, Arc::new(ticks.scheduler()), EngineOptions::default())?;
//!
//! let owner: Arc<dyn Owner> = LocalOwner::new("stats", "1.0.0");
//! let conn = engine.open("stats.db", &owner, true)?;
//! engine.execute_non_query("CREATE TABLE IF NOT EXISTS hits (n INTEGER)", &conn, |_| {})?;
//! engine.query("SELECT n FROM hits", &conn, |rows| {
//!     println!("{} rows", rows.map_or(0, |rs| rs.len()));
//! })?;
//!
//! engine.shutdown();
//! ticks.run_pending();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod driver;
pub mod engine;
pub mod error;
pub mod job;
pub mod owner;
pub mod prelude;
pub mod query;
pub mod registry;
pub mod results;
pub mod scheduler;
pub mod types;

mod worker;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use config::EngineOptions;
pub use connection::{ConnectionRef, ConnectionState};
pub use driver::{Driver, Interrupt};
pub use engine::QueryEngine;
pub use error::SqlDispatchError;
pub use job::{AffectedCallback, JobState, RowsCallback};
pub use owner::{LocalOwner, Owner, OwnerKey, RemovalHook, SubscriptionToken};
pub use query::QueryAndParams;
pub use registry::ConnectionRegistry;
pub use results::{CustomDbRow, ResultSet};
pub use scheduler::{MainScheduler, ScheduledTask, TickQueue, TickScheduler};
pub use types::{DatabaseType, RowValues};

/// Engine over the file-backed `SQLite` backend.
#[cfg(feature = "sqlite")]
pub type SqliteEngine = QueryEngine<sqlite::SqliteDriver>;

/// Engine over the PostgreSQL backend.
#[cfg(feature = "postgres")]
pub type PostgresEngine = QueryEngine<postgres::PostgresDriver>;
