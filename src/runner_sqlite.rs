use crate::{
    driver::{Command, Driver, DriverConnection, ResultRow, RowCursor},
    parameters::BoundParameter,
    result::{ConduitError, Result},
    value::Value,
};
use rusqlite::{
    Connection, OpenFlags,
    types::{ToSql, ToSqlOutput, ValueRef},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, Sender},
};
use std::thread::JoinHandle;
use std::time::Duration;

// SQLite represents booleans as integers
impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value_ref = match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(r) => ValueRef::Real(*r),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
            Value::Boolean(b) => ValueRef::Integer(i64::from(*b)),
        };
        Ok(ToSqlOutput::Borrowed(value_ref))
    }
}

fn value_from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        // SQLite does not enforce encoding; bytes that are not UTF-8 are kept as they are
        ValueRef::Text(s) => match std::str::from_utf8(s) {
            Ok(text) => Value::Text(text.to_string()),
            Err(_) => Value::Blob(s.to_vec()),
        },
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

/// SQLite provider. The connection string is a file path, `:memory:` or a `file:` URI.
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    open_flags: OpenFlags,
    busy_timeout: Option<Duration>,
}

impl SqliteDriver {
    pub fn new() -> Self {
        SqliteDriver {
            open_flags: OpenFlags::default(),
            busy_timeout: None,
        }
    }

    pub fn with_open_flags(mut self, open_flags: OpenFlags) -> Self {
        self.open_flags = open_flags;
        self
    }

    /// How long a statement waits on a locked database before failing
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for SqliteDriver {
    type Connection = SqliteConnection;

    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn open(&self, connection_string: &str) -> Result<SqliteConnection> {
        let conn = Connection::open_with_flags(connection_string, self.open_flags)
            .map_err(ConduitError::connection)?;
        if let Some(timeout) = self.busy_timeout {
            conn.busy_timeout(timeout)
                .map_err(ConduitError::connection)?;
        }

        let (requests, inbox) = mpsc::channel();
        let reader_open = Arc::new(AtomicBool::new(false));
        let worker_reader_open = reader_open.clone();
        let worker = std::thread::Builder::new()
            .name("sqlconduit-sqlite".to_string())
            .spawn(move || serve(conn, inbox, worker_reader_open))
            .map_err(ConduitError::connection)?;

        Ok(SqliteConnection {
            requests: Some(requests),
            worker: Some(worker),
            reader_open,
        })
    }
}

type Reply<T> = Sender<Result<T>>;

enum Request {
    Scalar(Command, Reply<Value>),
    NonQuery(Command, Reply<u64>),
    Identity(Command, Reply<Value>),
    Reader(Command, Reply<SqliteCursor>),
}

/// Handle to a SQLite connection owned by a dedicated worker thread.
///
/// The worker lets a read cursor keep its statement open between pulls while the
/// handle itself stays movable. Dropping the handle closes the connection and waits
/// for the worker, unless a cursor is still alive, in which case the worker exits
/// once that cursor is dropped.
pub struct SqliteConnection {
    requests: Option<Sender<Request>>,
    worker: Option<JoinHandle<()>>,
    reader_open: Arc<AtomicBool>,
}

fn worker_stopped() -> ConduitError {
    ConduitError::connection("sqlite connection worker stopped")
}

impl SqliteConnection {
    fn call<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let requests = self.requests.as_ref().ok_or_else(worker_stopped)?;
        let (reply, response) = mpsc::channel();
        requests
            .send(request(reply))
            .map_err(|_| worker_stopped())?;
        response.recv().map_err(|_| worker_stopped())?
    }
}

impl DriverConnection for SqliteConnection {
    type Cursor = SqliteCursor;

    fn execute_reader(&mut self, command: &Command) -> Result<SqliteCursor> {
        self.call(|reply| Request::Reader(command.clone(), reply))
    }

    fn execute_scalar(&mut self, command: &Command) -> Result<Value> {
        self.call(|reply| Request::Scalar(command.clone(), reply))
    }

    fn execute_non_query(&mut self, command: &Command) -> Result<u64> {
        self.call(|reply| Request::NonQuery(command.clone(), reply))
    }

    fn execute_identity(&mut self, command: &Command) -> Result<Value> {
        self.call(|reply| Request::Identity(command.clone(), reply))
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        drop(self.requests.take());
        if let Some(worker) = self.worker.take() {
            if !self.reader_open.load(Ordering::SeqCst) {
                let _ = worker.join();
            }
        }
    }
}

/// Forward-only cursor over an open SQLite statement; fetches one row per request
pub struct SqliteCursor {
    fetch: Option<Sender<()>>,
    rows: Receiver<Result<Option<Vec<Value>>>>,
    columns: Arc<[String]>,
    reader_open: Arc<AtomicBool>,
}

impl RowCursor for SqliteCursor {
    fn next_row(&mut self) -> Result<Option<ResultRow>> {
        let Some(fetch) = &self.fetch else {
            return Ok(None);
        };
        // The worker hangs up once the statement is exhausted or failed
        if fetch.send(()).is_err() {
            return Ok(None);
        }

        let row = self.rows.recv().map_err(|_| worker_stopped())??;
        Ok(row.map(|values| ResultRow::new(self.columns.clone(), values)))
    }
}

impl Drop for SqliteCursor {
    fn drop(&mut self) {
        drop(self.fetch.take());
        self.reader_open.store(false, Ordering::SeqCst);
    }
}

fn serve(conn: Connection, inbox: Receiver<Request>, reader_open: Arc<AtomicBool>) {
    while let Ok(request) = inbox.recv() {
        match request {
            Request::Scalar(command, reply) => {
                let _ = reply.send(execute_scalar(&conn, &command));
            }
            Request::NonQuery(command, reply) => {
                let _ = reply.send(execute_non_query(&conn, &command));
            }
            Request::Identity(command, reply) => {
                let _ = reply.send(execute_identity(&conn, &command));
            }
            Request::Reader(command, reply) => {
                stream_rows(&conn, &command, reply, &reader_open);
            }
        }
    }
}

fn prepare<'c>(conn: &'c Connection, command: &Command) -> Result<rusqlite::Statement<'c>> {
    let mut stmt = conn
        .prepare(command.sql())
        .map_err(ConduitError::backend)?;
    bind(&mut stmt, command.parameters())?;
    Ok(stmt)
}

fn bind(stmt: &mut rusqlite::Statement<'_>, parameters: &[BoundParameter]) -> Result<()> {
    for (position, parameter) in parameters.iter().enumerate() {
        let index = parameter_index(stmt, &parameter.name, position)?;
        stmt.raw_bind_parameter(index, &parameter.value)
            .map_err(ConduitError::backend)?;
    }
    Ok(())
}

/// Resolve the 1-based placeholder index for a parameter.
/// Empty names bind positionally; bare names are tried with each SQLite prefix.
fn parameter_index(stmt: &rusqlite::Statement<'_>, name: &str, position: usize) -> Result<usize> {
    if name.is_empty() {
        return Ok(position + 1);
    }

    let candidates = if name.starts_with(['@', ':', '$', '?']) {
        vec![name.to_string()]
    } else {
        ['@', ':', '$']
            .iter()
            .map(|prefix| format!("{prefix}{name}"))
            .collect()
    };

    for candidate in &candidates {
        if let Some(index) = stmt
            .parameter_index(candidate)
            .map_err(ConduitError::backend)?
        {
            return Ok(index);
        }
    }

    Err(ConduitError::backend(rusqlite::Error::InvalidParameterName(
        name.to_string(),
    )))
}

fn execute_scalar(conn: &Connection, command: &Command) -> Result<Value> {
    let mut stmt = prepare(conn, command)?;
    let has_columns = stmt.column_count() > 0;
    let mut rows = stmt.raw_query();
    match rows.next().map_err(ConduitError::backend)? {
        Some(row) if has_columns => Ok(value_from_sqlite(
            row.get_ref(0).map_err(ConduitError::backend)?,
        )),
        _ => Ok(Value::Null),
    }
}

fn execute_non_query(conn: &Connection, command: &Command) -> Result<u64> {
    let mut stmt = prepare(conn, command)?;
    let changed = stmt.raw_execute().map_err(ConduitError::backend)?;
    Ok(changed as u64)
}

/// The connection is fresh, so a zero rowid means no rowid table received a row
fn execute_identity(conn: &Connection, command: &Command) -> Result<Value> {
    let changed = {
        let mut stmt = prepare(conn, command)?;
        stmt.raw_execute().map_err(ConduitError::backend)?
    };

    let rowid = conn.last_insert_rowid();
    if changed == 0 || rowid == 0 {
        Ok(Value::Null)
    } else {
        Ok(Value::Integer(rowid))
    }
}

fn row_values(row: &rusqlite::Row<'_>, width: usize) -> Result<Vec<Value>> {
    (0..width)
        .map(|idx| {
            row.get_ref(idx)
                .map(value_from_sqlite)
                .map_err(ConduitError::backend)
        })
        .collect()
}

fn stream_rows(
    conn: &Connection,
    command: &Command,
    reply: Reply<SqliteCursor>,
    reader_open: &Arc<AtomicBool>,
) {
    let mut stmt = match prepare(conn, command) {
        Ok(stmt) => stmt,
        Err(err) => {
            let _ = reply.send(Err(err));
            return;
        }
    };

    let columns: Arc<[String]> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();
    let width = columns.len();

    let (fetch, fetch_requests) = mpsc::channel::<()>();
    let (row_sender, rows) = mpsc::channel();
    reader_open.store(true, Ordering::SeqCst);
    let cursor = SqliteCursor {
        fetch: Some(fetch),
        rows,
        columns,
        reader_open: reader_open.clone(),
    };
    if reply.send(Ok(cursor)).is_err() {
        return;
    }

    let mut result_rows = stmt.raw_query();
    while fetch_requests.recv().is_ok() {
        let fetched = match result_rows.next() {
            Ok(Some(row)) => row_values(row, width).map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(ConduitError::backend(err)),
        };
        let finished = !matches!(fetched, Ok(Some(_)));
        if row_sender.send(fetched).is_err() || finished {
            break;
        }
    }
}
