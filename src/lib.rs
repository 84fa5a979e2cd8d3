//! Provider-agnostic SQL execution layer.
//!
//! Issue parameterized statements (read, scalar, insert, update/delete) without
//! handling connections, commands or parameter marshaling. Each call opens its own
//! connection and releases it when the call's execution context ends; reads
//! project rows lazily through a caller-supplied function.

pub mod cancel;
pub mod config;
#[cfg(any(feature = "sqlite", feature = "postgresql"))]
pub mod connection;
pub mod driver;
pub mod parameters;
pub mod result;
pub mod runner;
#[cfg(feature = "postgresql")]
pub mod runner_postgresql;
#[cfg(feature = "sqlite")]
pub mod runner_sqlite;
pub mod scope;
pub mod str_utils;
pub mod value;

// Re-export types for convenience
pub use cancel::CancellationToken;
pub use config::{ConduitConfig, Provider};
#[cfg(any(feature = "sqlite", feature = "postgresql"))]
pub use connection::{AnyConnection, AnyCursor, AnyDriver};
pub use driver::{Command, Driver, DriverConnection, ResultRow, RowCursor};
pub use parameters::{BoundParameter, Parameters, Statement};
pub use result::{BackendError, ConduitError, Result};
pub use runner::{ExecutionLayer, Rows};
#[cfg(feature = "postgresql")]
pub use runner_postgresql::PostgresDriver;
#[cfg(feature = "sqlite")]
pub use runner_sqlite::SqliteDriver;
pub use value::{FromValue, Value};

// Re-export third-party types used in the public API to provide fallback for dependency conflicts
pub use serde_json::Value as JsonValue;

#[cfg(feature = "sqlite")]
pub use rusqlite::OpenFlags as SqliteOpenFlags;
