use crate::{
    config::{ConduitConfig, Provider},
    driver::{Command, Driver, DriverConnection, ResultRow, RowCursor},
    result::{ConduitError, Result},
    runner::ExecutionLayer,
    value::Value,
};

#[cfg(feature = "postgresql")]
use crate::runner_postgresql::{PostgresConnection, PostgresCursor, PostgresDriver};
#[cfg(feature = "sqlite")]
use crate::runner_sqlite::{SqliteConnection, SqliteCursor, SqliteDriver};

/// Driver enum that holds the backends compiled into this build
pub enum AnyDriver {
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteDriver),
    #[cfg(feature = "postgresql")]
    Postgresql(PostgresDriver),
}

/// Connection opened by an `AnyDriver`
pub enum AnyConnection {
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteConnection),
    #[cfg(feature = "postgresql")]
    Postgresql(PostgresConnection),
}

/// Cursor produced by an `AnyConnection`
pub enum AnyCursor {
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteCursor),
    #[cfg(feature = "postgresql")]
    Postgresql(PostgresCursor),
}

impl AnyDriver {
    pub fn for_provider(provider: Provider) -> Result<Self> {
        match provider {
            #[cfg(feature = "sqlite")]
            Provider::Sqlite => Ok(AnyDriver::Sqlite(SqliteDriver::new())),
            #[cfg(feature = "postgresql")]
            Provider::Postgresql => Ok(AnyDriver::Postgresql(PostgresDriver::new()?)),
            #[allow(unreachable_patterns)]
            other => Err(ConduitError::UnsupportedProvider(format!(
                "{other} (not enabled in this build)"
            ))),
        }
    }
}

impl Driver for AnyDriver {
    type Connection = AnyConnection;

    fn name(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlite")]
            AnyDriver::Sqlite(driver) => driver.name(),
            #[cfg(feature = "postgresql")]
            AnyDriver::Postgresql(driver) => driver.name(),
        }
    }

    fn open(&self, connection_string: &str) -> Result<AnyConnection> {
        match self {
            #[cfg(feature = "sqlite")]
            AnyDriver::Sqlite(driver) => driver.open(connection_string).map(AnyConnection::Sqlite),
            #[cfg(feature = "postgresql")]
            AnyDriver::Postgresql(driver) => driver
                .open(connection_string)
                .map(AnyConnection::Postgresql),
        }
    }
}

impl DriverConnection for AnyConnection {
    type Cursor = AnyCursor;

    fn execute_reader(&mut self, command: &Command) -> Result<AnyCursor> {
        match self {
            #[cfg(feature = "sqlite")]
            AnyConnection::Sqlite(conn) => conn.execute_reader(command).map(AnyCursor::Sqlite),
            #[cfg(feature = "postgresql")]
            AnyConnection::Postgresql(conn) => {
                conn.execute_reader(command).map(AnyCursor::Postgresql)
            }
        }
    }

    fn execute_scalar(&mut self, command: &Command) -> Result<Value> {
        match self {
            #[cfg(feature = "sqlite")]
            AnyConnection::Sqlite(conn) => conn.execute_scalar(command),
            #[cfg(feature = "postgresql")]
            AnyConnection::Postgresql(conn) => conn.execute_scalar(command),
        }
    }

    fn execute_non_query(&mut self, command: &Command) -> Result<u64> {
        match self {
            #[cfg(feature = "sqlite")]
            AnyConnection::Sqlite(conn) => conn.execute_non_query(command),
            #[cfg(feature = "postgresql")]
            AnyConnection::Postgresql(conn) => conn.execute_non_query(command),
        }
    }

    fn execute_identity(&mut self, command: &Command) -> Result<Value> {
        match self {
            #[cfg(feature = "sqlite")]
            AnyConnection::Sqlite(conn) => conn.execute_identity(command),
            #[cfg(feature = "postgresql")]
            AnyConnection::Postgresql(conn) => conn.execute_identity(command),
        }
    }
}

impl RowCursor for AnyCursor {
    fn next_row(&mut self) -> Result<Option<ResultRow>> {
        match self {
            #[cfg(feature = "sqlite")]
            AnyCursor::Sqlite(cursor) => cursor.next_row(),
            #[cfg(feature = "postgresql")]
            AnyCursor::Postgresql(cursor) => cursor.next_row(),
        }
    }
}

impl ExecutionLayer<AnyDriver> {
    /// Build a layer whose backend is chosen by the configuration
    pub fn from_config(config: ConduitConfig) -> Result<Self> {
        let driver = AnyDriver::for_provider(config.provider)?;
        let layer = ExecutionLayer::new(driver, config.connection_string);
        Ok(match config.caller_id {
            Some(caller_id) => layer.with_caller_id(caller_id),
            None => layer,
        })
    }
}
