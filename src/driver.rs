use crate::{
    parameters::BoundParameter,
    result::{ConduitError, Result},
    value::{FromValue, Value},
};
use std::sync::Arc;

/// Backend provider: the only process-wide collaborator of an execution layer.
///
/// Implementations must be safe to call concurrently; every `open` produces an
/// independent connection.
pub trait Driver: Send + Sync {
    type Connection: DriverConnection;

    /// Provider label used in log output
    fn name(&self) -> &'static str;

    fn open(&self, connection_string: &str) -> Result<Self::Connection>;
}

/// An open connection, owned by exactly one statement execution
pub trait DriverConnection: Send {
    type Cursor: RowCursor;

    /// Allocate a command for this connection
    fn create_command(&self, sql: &str) -> Command {
        Command::new(sql)
    }

    /// Start a forward-only read. The cursor must not fetch rows before they are requested.
    fn execute_reader(&mut self, command: &Command) -> Result<Self::Cursor>;

    /// Row 0, column 0 of the result, or `Value::Null` when there is none
    fn execute_scalar(&mut self, command: &Command) -> Result<Value>;

    /// Affected-row count
    fn execute_non_query(&mut self, command: &Command) -> Result<u64>;

    /// Run an insert and report the identity the backend assigned,
    /// or `Value::Null` when it assigned none.
    fn execute_identity(&mut self, command: &Command) -> Result<Value>;
}

/// Pull-based row source
pub trait RowCursor: Send {
    /// Fetch exactly one row; `None` once the result set is exhausted
    fn next_row(&mut self) -> Result<Option<ResultRow>>;
}

/// SQL text with its bound parameters, scoped to one connection
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    sql: String,
    parameters: Vec<BoundParameter>,
}

impl Command {
    pub fn new(sql: impl Into<String>) -> Self {
        Command {
            sql: sql.into(),
            parameters: Vec::new(),
        }
    }

    pub fn add_parameter(&mut self, parameter: BoundParameter) {
        self.parameters.push(parameter);
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> &[BoundParameter] {
        &self.parameters
    }
}

/// Field accessor for a single result row, handed to the projection function
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl ResultRow {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        ResultRow { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.column_index(name).and_then(|idx| self.values.get(idx))
    }

    pub fn try_get<T: FromValue>(&self, idx: usize) -> Result<T> {
        let value = self
            .values
            .get(idx)
            .ok_or_else(|| ConduitError::ColumnNotFound(format!("#{idx}")))?;
        convert(value, &self.column_label(idx))
    }

    pub fn try_get_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .get_by_name(name)
            .ok_or_else(|| ConduitError::ColumnNotFound(name.to_string()))?;
        convert(value, name)
    }

    fn column_label(&self, idx: usize) -> String {
        self.columns
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("#{idx}"))
    }
}

fn convert<T: FromValue>(value: &Value, column: &str) -> Result<T> {
    T::from_value(value).ok_or_else(|| ConduitError::ColumnTypeMismatch {
        column: column.to_string(),
        expected: T::expected().to_string(),
        got: value.type_name().to_string(),
    })
}
