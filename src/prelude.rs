//! Convenient imports for common functionality.

pub use crate::{
    ConnectionRef, ConnectionState, CustomDbRow, DatabaseType, EngineOptions, LocalOwner,
    MainScheduler, Owner, OwnerKey, QueryAndParams, QueryEngine, ResultSet, RowValues, SqlDispatchError,
    TickQueue, TickScheduler,
};

#[cfg(feature = "postgres")]
pub use crate::PostgresEngine;
#[cfg(feature = "postgres")]
pub use crate::postgres::{PostgresConnectParams, PostgresDriver};

#[cfg(feature = "sqlite")]
pub use crate::SqliteEngine;
#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteDriver, SqliteOptions, SqliteOptionsBuilder};
