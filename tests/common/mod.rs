//! Substitute drivers shared by the integration tests.
#![allow(dead_code)]

use sqlconduit::{
    Command, ConduitError, Driver, DriverConnection, Result, ResultRow, RowCursor, Value,
};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

#[cfg(feature = "sqlite")]
use sqlconduit::{
    SqliteDriver,
    runner_sqlite::{SqliteConnection, SqliteCursor},
};

/// Canned responses for a `ScriptedDriver`
#[derive(Debug, Default)]
pub struct Script {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub scalar: Value,
    pub identity: Value,
    pub affected: u64,
    pub fail_open: bool,
    pub fail_fetch_at: Option<usize>,
}

/// Shared counters observed by the tests
#[derive(Debug, Clone, Default)]
pub struct Probe {
    opened: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    fetches: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<Command>>>,
}

impl Probe {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    fn connection_opened(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
    }

    fn connection_closed(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory backend that records every command and replays a script
pub struct ScriptedDriver {
    script: Arc<Script>,
    probe: Probe,
}

impl ScriptedDriver {
    pub fn new(script: Script) -> (Self, Probe) {
        let probe = Probe::default();
        let driver = ScriptedDriver {
            script: Arc::new(script),
            probe: probe.clone(),
        };
        (driver, probe)
    }
}

pub struct ScriptedConnection {
    script: Arc<Script>,
    probe: Probe,
}

impl ScriptedConnection {
    fn record(&self, command: &Command) {
        self.probe.commands.lock().unwrap().push(command.clone());
    }
}

impl Driver for ScriptedDriver {
    type Connection = ScriptedConnection;

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(&self, _connection_string: &str) -> Result<ScriptedConnection> {
        if self.script.fail_open {
            return Err(ConduitError::connection("backend unreachable"));
        }
        self.probe.connection_opened();
        Ok(ScriptedConnection {
            script: self.script.clone(),
            probe: self.probe.clone(),
        })
    }
}

impl DriverConnection for ScriptedConnection {
    type Cursor = ScriptedCursor;

    fn execute_reader(&mut self, command: &Command) -> Result<ScriptedCursor> {
        self.record(command);
        Ok(ScriptedCursor {
            script: self.script.clone(),
            probe: self.probe.clone(),
            columns: self.script.columns.iter().cloned().collect(),
            position: 0,
        })
    }

    fn execute_scalar(&mut self, command: &Command) -> Result<Value> {
        self.record(command);
        Ok(self.script.scalar.clone())
    }

    fn execute_non_query(&mut self, command: &Command) -> Result<u64> {
        self.record(command);
        Ok(self.script.affected)
    }

    fn execute_identity(&mut self, command: &Command) -> Result<Value> {
        self.record(command);
        Ok(self.script.identity.clone())
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.probe.connection_closed();
    }
}

pub struct ScriptedCursor {
    script: Arc<Script>,
    probe: Probe,
    columns: Arc<[String]>,
    position: usize,
}

impl RowCursor for ScriptedCursor {
    fn next_row(&mut self) -> Result<Option<ResultRow>> {
        self.probe.fetches.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_fetch_at == Some(self.position) {
            return Err(ConduitError::backend("deadlock victim"));
        }

        let row = self
            .script
            .rows
            .get(self.position)
            .map(|values| ResultRow::new(self.columns.clone(), values.clone()));
        self.position += 1;
        Ok(row)
    }
}

/// SQLite driver wrapper that tracks how many connections are open
#[cfg(feature = "sqlite")]
pub struct CountingDriver {
    inner: SqliteDriver,
    probe: Probe,
}

#[cfg(feature = "sqlite")]
impl CountingDriver {
    pub fn new() -> (Self, Probe) {
        let probe = Probe::default();
        let driver = CountingDriver {
            inner: SqliteDriver::new().with_busy_timeout(std::time::Duration::from_secs(5)),
            probe: probe.clone(),
        };
        (driver, probe)
    }
}

#[cfg(feature = "sqlite")]
pub struct CountingConnection {
    inner: SqliteConnection,
    probe: Probe,
}

#[cfg(feature = "sqlite")]
impl Driver for CountingDriver {
    type Connection = CountingConnection;

    fn name(&self) -> &'static str {
        "counting-sqlite"
    }

    fn open(&self, connection_string: &str) -> Result<CountingConnection> {
        let inner = self.inner.open(connection_string)?;
        self.probe.connection_opened();
        Ok(CountingConnection {
            inner,
            probe: self.probe.clone(),
        })
    }
}

#[cfg(feature = "sqlite")]
impl DriverConnection for CountingConnection {
    type Cursor = SqliteCursor;

    fn execute_reader(&mut self, command: &Command) -> Result<SqliteCursor> {
        self.inner.execute_reader(command)
    }

    fn execute_scalar(&mut self, command: &Command) -> Result<Value> {
        self.inner.execute_scalar(command)
    }

    fn execute_non_query(&mut self, command: &Command) -> Result<u64> {
        self.inner.execute_non_query(command)
    }

    fn execute_identity(&mut self, command: &Command) -> Result<Value> {
        self.inner.execute_identity(command)
    }
}

#[cfg(feature = "sqlite")]
impl Drop for CountingConnection {
    fn drop(&mut self) {
        self.probe.connection_closed();
    }
}

/// Create a database file in a temporary directory and apply the schema.
/// Keep the returned directory alive for as long as the database is used.
#[cfg(feature = "sqlite")]
pub fn temp_db(schema: &str) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(schema).unwrap();
    (dir, path.to_str().unwrap().to_string())
}
