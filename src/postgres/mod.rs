//! PostgreSQL backend.
//!
//! Each native handle owns a current-thread runtime, so the worker thread can
//! drive tokio-postgres without a host runtime.

pub mod config;
pub mod driver;
pub mod params;
pub mod query;

pub use config::PostgresConnectParams;
pub use driver::{PgHandle, PostgresDriver};
pub use params::Params as PostgresParams;
pub use query::{build_result_set, postgres_extract_value};
