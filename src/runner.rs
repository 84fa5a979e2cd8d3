use crate::{
    cancel::CancellationToken,
    driver::{Command, Driver, DriverConnection, ResultRow, RowCursor},
    parameters::{Statement, bind_parameters},
    result::{ConduitError, Result},
    scope::ConnectionScope,
    value::Value,
};
use log::{debug, trace};
use std::iter::FusedIterator;
use std::marker::PhantomData;

/// Executes parameterized statements against one backend.
///
/// Every call opens its own connection through the driver and releases it when
/// the call's execution context ends. Nothing is shared between calls except the
/// driver itself, so a layer can be used from several threads at once.
pub struct ExecutionLayer<D: Driver> {
    driver: D,
    connection_string: String,
    caller_id: Option<String>,
    cancel: CancellationToken,
}

impl<D: Driver> ExecutionLayer<D> {
    pub fn new(driver: D, connection_string: impl Into<String>) -> Self {
        ExecutionLayer {
            driver,
            connection_string: connection_string.into(),
            caller_id: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach the identity of the caller. Carried as context only.
    pub fn with_caller_id(mut self, caller_id: impl Into<String>) -> Self {
        self.caller_id = Some(caller_id.into());
        self
    }

    /// Use a layer-wide token, checked before every connection open and row fetch
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn caller_id(&self) -> Option<&str> {
        self.caller_id.as_deref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Lazily project each result row through `project`.
    ///
    /// The returned sequence owns the connection and cursor. It releases them when
    /// it is exhausted, when it yields an error, or when it is closed or dropped;
    /// a partially consumed sequence must still be closed or dropped.
    pub fn read<T, F>(&self, statement: &Statement, project: F) -> Result<Rows<D::Connection, T, F>>
    where
        F: FnMut(&ResultRow) -> Result<T>,
    {
        self.read_with_cancel(statement, project, &self.cancel)
    }

    /// `read` with a per-call cancellation token
    pub fn read_with_cancel<T, F>(
        &self,
        statement: &Statement,
        project: F,
        cancel: &CancellationToken,
    ) -> Result<Rows<D::Connection, T, F>>
    where
        F: FnMut(&ResultRow) -> Result<T>,
    {
        let mut scope = self.acquire(cancel)?;
        let command = build_command(scope.connection(), statement);
        let cursor = scope.connection_mut().execute_reader(&command)?;

        Ok(Rows {
            active: Some(ActiveRead { cursor, scope }),
            project,
            cancel: cancel.clone(),
            layer_cancel: self.cancel.clone(),
            rows_read: 0,
            _marker: PhantomData,
        })
    }

    /// Row 0, column 0 of the result, or `Value::Null` when the result is empty
    pub fn scalar(&self, statement: &Statement) -> Result<Value> {
        let mut scope = self.acquire(&self.cancel)?;
        let command = build_command(scope.connection(), statement);
        scope.connection_mut().execute_scalar(&command)
    }

    /// Run an insert and return the identity assigned to the new row
    pub fn insert(&self, statement: &Statement) -> Result<i64> {
        let mut scope = self.acquire(&self.cancel)?;
        let command = build_command(scope.connection(), statement);
        let identity = scope.connection_mut().execute_identity(&command)?;
        parse_identity(&identity)
    }

    /// Run a non-query and return the affected-row count
    pub fn update(&self, statement: &Statement) -> Result<u64> {
        let mut scope = self.acquire(&self.cancel)?;
        let command = build_command(scope.connection(), statement);
        scope.connection_mut().execute_non_query(&command)
    }

    /// Same as `update`; kept separate so call sites read naturally
    pub fn delete(&self, statement: &Statement) -> Result<u64> {
        self.update(statement)
    }

    fn acquire(&self, cancel: &CancellationToken) -> Result<ConnectionScope<D::Connection>> {
        // The layer-wide token applies even when a per-call token is used
        if self.cancel.is_cancelled() {
            return Err(ConduitError::Cancelled);
        }
        ConnectionScope::acquire(&self.driver, &self.connection_string, cancel)
    }
}

/// Allocate a command on the connection and attach the statement's parameters
fn build_command<C: DriverConnection>(connection: &C, statement: &Statement) -> Command {
    let mut command = connection.create_command(statement.sql());
    bind_parameters(&mut command, statement.parameters());
    trace!(
        "built command with {} parameters: {}",
        command.parameters().len(),
        command.sql()
    );
    command
}

/// Interpret a backend identity value as an integer id
pub fn parse_identity(identity: &Value) -> Result<i64> {
    let parsed = match identity {
        Value::Integer(i) => Some(*i),
        // i64::MAX as f64 rounds up to 2^63, which is already out of range
        Value::Real(r)
            if r.fract() == 0.0 && *r >= i64::MIN as f64 && *r < i64::MAX as f64 =>
        {
            Some(*r as i64)
        }
        Value::Text(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| ConduitError::IdentityParse {
        got: identity.to_string(),
    })
}

struct ActiveRead<C: DriverConnection> {
    // Declared first: the cursor is dropped before the connection it reads from
    cursor: C::Cursor,
    scope: ConnectionScope<C>,
}

/// Lazy, forward-only, single-pass sequence of projected rows
pub struct Rows<C, T, F>
where
    C: DriverConnection,
{
    active: Option<ActiveRead<C>>,
    project: F,
    cancel: CancellationToken,
    layer_cancel: CancellationToken,
    rows_read: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<C, T, F> Rows<C, T, F>
where
    C: DriverConnection,
    F: FnMut(&ResultRow) -> Result<T>,
{
    /// Number of rows handed to the projection so far
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// True while the cursor and its connection are still held
    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    /// Release the cursor and connection without consuming the remaining rows
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(
                "{} read released after {} rows",
                active.scope.provider(),
                self.rows_read
            );
            drop(active);
        }
    }
}

impl<C, T, F> Iterator for Rows<C, T, F>
where
    C: DriverConnection,
    F: FnMut(&ResultRow) -> Result<T>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.active.is_none() {
            return None;
        }

        if self.cancel.is_cancelled() || self.layer_cancel.is_cancelled() {
            self.release();
            return Some(Err(ConduitError::Cancelled));
        }

        let fetched = self.active.as_mut()?.cursor.next_row();
        match fetched {
            Ok(Some(row)) => {
                self.rows_read += 1;
                let item = (self.project)(&row);
                if item.is_err() {
                    self.release();
                }
                Some(item)
            }
            Ok(None) => {
                self.release();
                None
            }
            Err(err) => {
                self.release();
                Some(Err(err))
            }
        }
    }
}

impl<C, T, F> FusedIterator for Rows<C, T, F>
where
    C: DriverConnection,
    F: FnMut(&ResultRow) -> Result<T>,
{
}

impl<C, T, F> Drop for Rows<C, T, F>
where
    C: DriverConnection,
{
    fn drop(&mut self) {
        if self.active.take().is_some() {
            debug!("read abandoned after {} rows", self.rows_read);
        }
    }
}
