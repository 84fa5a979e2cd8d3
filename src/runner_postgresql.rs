use crate::{
    driver::{Command, Driver, DriverConnection, ResultRow, RowCursor},
    result::{ConduitError, Result},
    str_utils::rewrite_named_placeholders,
    value::Value,
};
use bytes::BytesMut;
use futures::StreamExt;
use log::debug;
use std::pin::Pin;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio_postgres::{
    Client, NoTls, RowStream,
    error::SqlState,
    types::{FromSql, IsNull, ToSql, Type},
};

// PostgreSQL type OIDs for all column types
const POSTGRES_TYPE_OID_BOOL: u32 = 16;
const POSTGRES_TYPE_OID_BYTEA: u32 = 17;
const POSTGRES_TYPE_OID_INT2: u32 = 21;
const POSTGRES_TYPE_OID_INT4: u32 = 23;
const POSTGRES_TYPE_OID_INT8: u32 = 20;
const POSTGRES_TYPE_OID_FLOAT4: u32 = 700;
const POSTGRES_TYPE_OID_FLOAT8: u32 = 701;
const POSTGRES_TYPE_OID_TEXT: u32 = 25;
const POSTGRES_TYPE_OID_VARCHAR: u32 = 1043;
const POSTGRES_TYPE_OID_BPCHAR: u32 = 1042;
const POSTGRES_TYPE_OID_UNKNOWN: u32 = 705;
const POSTGRES_TYPE_OID_JSON: u32 = 114;
const POSTGRES_TYPE_OID_JSONB: u32 = 3802;
const POSTGRES_TYPE_OID_NUMERIC: u32 = 1700;
const POSTGRES_TYPE_OID_DATE: u32 = 1082;
const POSTGRES_TYPE_OID_TIME: u32 = 1083;
const POSTGRES_TYPE_OID_TIMESTAMP: u32 = 1114;
const POSTGRES_TYPE_OID_TIMESTAMPTZ: u32 = 1184;
const POSTGRES_TYPE_OID_UUID: u32 = 2950;

type BoxError = Box<dyn std::error::Error + Sync + Send>;
type SqlResult = std::result::Result<IsNull, BoxError>;

/// Binds a `Value` to whatever type the server inferred for the placeholder.
/// The absence-marker is sent as NULL for every type.
#[derive(Debug)]
struct PgParam<'a>(&'a Value);

fn is_text_type(ty: &Type) -> bool {
    matches!(
        ty.oid(),
        POSTGRES_TYPE_OID_TEXT
            | POSTGRES_TYPE_OID_VARCHAR
            | POSTGRES_TYPE_OID_BPCHAR
            | POSTGRES_TYPE_OID_UNKNOWN
    )
}

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> SqlResult {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Integer(_) | Value::Real(_) | Value::Boolean(_) if is_text_type(ty) => {
                self.0.to_string().as_str().to_sql_checked(ty, out)
            }
            Value::Integer(i) => match ty.oid() {
                POSTGRES_TYPE_OID_INT2 => i16::try_from(*i)?.to_sql_checked(ty, out),
                POSTGRES_TYPE_OID_INT4 => i32::try_from(*i)?.to_sql_checked(ty, out),
                POSTGRES_TYPE_OID_FLOAT4 => (*i as f32).to_sql_checked(ty, out),
                POSTGRES_TYPE_OID_FLOAT8 => (*i as f64).to_sql_checked(ty, out),
                POSTGRES_TYPE_OID_BOOL => (*i != 0).to_sql_checked(ty, out),
                _ => i.to_sql_checked(ty, out),
            },
            Value::Real(r) => match ty.oid() {
                POSTGRES_TYPE_OID_FLOAT4 => (*r as f32).to_sql_checked(ty, out),
                _ => r.to_sql_checked(ty, out),
            },
            Value::Text(s) => s.as_str().to_sql_checked(ty, out),
            Value::Blob(b) => b.as_slice().to_sql_checked(ty, out),
            Value::Boolean(b) => b.to_sql_checked(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn to_sql_checked(&self, ty: &Type, out: &mut BytesMut) -> SqlResult {
        self.to_sql(ty, out)
    }
}

/// Rewrite `@name` placeholders to `$n` in binding order and pair them with their values
fn prepare_command(command: &Command) -> (String, Vec<PgParam<'_>>) {
    let names: Vec<&str> = command
        .parameters()
        .iter()
        .map(|parameter| parameter.name.as_str())
        .collect();
    let sql = rewrite_named_placeholders(command.sql(), &names, &|idx| format!("${idx}"));
    let params = command
        .parameters()
        .iter()
        .map(|parameter| PgParam(&parameter.value))
        .collect();
    (sql, params)
}

fn as_sql_refs<'a>(params: &'a [PgParam<'a>]) -> Vec<&'a (dyn ToSql + Sync)> {
    params
        .iter()
        .map(|param| param as &(dyn ToSql + Sync))
        .collect()
}

// NUMERIC wire format: digit count, weight and sign headers, then base-10000 digits
const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;
const NUMERIC_DIGIT_WIDTH: usize = 4;

/// Render a binary NUMERIC value as its exact decimal text
fn numeric_to_string(raw: &[u8]) -> std::result::Result<String, BoxError> {
    let header = |at: usize| u16::from_be_bytes([raw[at], raw[at + 1]]);
    if raw.len() < 8 {
        return Err("numeric value shorter than its header".into());
    }
    let ndigits = usize::from(header(0));
    let weight = i32::from(header(2) as i16);
    let sign = header(4);
    let dscale = usize::from(header(6));

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        NUMERIC_POS | NUMERIC_NEG => {}
        other => return Err(format!("invalid numeric sign 0x{other:04X}").into()),
    }
    if raw.len() != 8 + ndigits * 2 {
        return Err("numeric digit count does not match its length".into());
    }

    let digits: Vec<i32> = raw[8..]
        .chunks_exact(2)
        .map(|pair| i32::from(i16::from_be_bytes([pair[0], pair[1]])))
        .collect();
    let digit = |idx: i32| {
        usize::try_from(idx)
            .ok()
            .and_then(|idx| digits.get(idx).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&digit(0).to_string());
        for idx in 1..=weight {
            text.push_str(&format!("{:04}", digit(idx)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + NUMERIC_DIGIT_WIDTH);
        let mut idx = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit(idx)));
            idx += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }
    Ok(text)
}

/// NUMERIC decoded to text, so no precision is lost
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        numeric_to_string(raw).map(PgNumeric)
    }

    fn accepts(ty: &Type) -> bool {
        ty.oid() == POSTGRES_TYPE_OID_NUMERIC
    }
}

/// The undecoded wire bytes of a column of any type
struct PgRaw(Vec<u8>);

impl<'a> FromSql<'a> for PgRaw {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        Ok(PgRaw(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Convert a PostgreSQL column value using OID-based detection for stability.
///
/// Numeric, date/time and uuid columns come back as text. Types the driver can read
/// as a string (enums, citext, name, ...) come back as text; any other type is returned
/// as its binary wire bytes rather than failing the row.
pub fn column_value(row: &tokio_postgres::Row, idx: usize) -> Result<Value> {
    let column = &row.columns()[idx];
    let value = match column.type_().oid() {
        POSTGRES_TYPE_OID_BOOL => row.try_get::<_, Option<bool>>(idx).map(Value::from),
        POSTGRES_TYPE_OID_INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map(|v| Value::from(v.map(i64::from))),
        POSTGRES_TYPE_OID_INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map(|v| Value::from(v.map(i64::from))),
        POSTGRES_TYPE_OID_INT8 => row.try_get::<_, Option<i64>>(idx).map(Value::from),
        POSTGRES_TYPE_OID_FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map(|v| Value::from(v.map(f64::from))),
        POSTGRES_TYPE_OID_FLOAT8 => row.try_get::<_, Option<f64>>(idx).map(Value::from),
        POSTGRES_TYPE_OID_BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx).map(Value::from),
        POSTGRES_TYPE_OID_JSON | POSTGRES_TYPE_OID_JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .map(|v| Value::from(v.map(|json| json.to_string()))),
        POSTGRES_TYPE_OID_NUMERIC => row
            .try_get::<_, Option<PgNumeric>>(idx)
            .map(|v| Value::from(v.map(|numeric| numeric.0))),
        POSTGRES_TYPE_OID_DATE => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .map(|v| Value::from(v.map(|date| date.to_string()))),
        POSTGRES_TYPE_OID_TIME => row
            .try_get::<_, Option<chrono::NaiveTime>>(idx)
            .map(|v| Value::from(v.map(|time| time.to_string()))),
        POSTGRES_TYPE_OID_TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .map(|v| Value::from(v.map(|ts| ts.to_string()))),
        POSTGRES_TYPE_OID_TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .map(|v| Value::from(v.map(|ts| ts.to_rfc3339()))),
        POSTGRES_TYPE_OID_UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .map(|v| Value::from(v.map(|id| id.to_string()))),
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(text) => Ok(Value::from(text)),
            Err(_) => row
                .try_get::<_, Option<PgRaw>>(idx)
                .map(|v| Value::from(v.map(|raw| raw.0))),
        },
    };

    value.map_err(|err| ConduitError::ColumnTypeMismatch {
        column: column.name().to_string(),
        expected: format!("decodable PostgreSQL value ({err})"),
        got: column.type_().name().to_string(),
    })
}

fn row_values(row: &tokio_postgres::Row) -> Result<Vec<Value>> {
    (0..row.len()).map(|idx| column_value(row, idx)).collect()
}

/// PostgreSQL provider.
///
/// tokio-postgres is asynchronous; every call is driven to completion on the
/// driver's runtime, so the layer must not be used from inside an async task.
///
/// Reads run as a single unbounded portal: the server streams the whole result
/// while rows are pulled one at a time from the driver's buffer. Closing a read
/// early releases the connection only after the remaining rows have arrived and
/// been discarded, so abandoning a very large result is not instant. Bound large
/// reads with `LIMIT` when partial consumption is expected.
#[derive(Clone)]
pub struct PostgresDriver {
    runtime: Arc<Runtime>,
}

impl PostgresDriver {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("sqlconduit-postgres")
            .build()?;
        Ok(Self::with_runtime(Arc::new(runtime)))
    }

    /// Share an existing runtime instead of starting a dedicated one
    pub fn with_runtime(runtime: Arc<Runtime>) -> Self {
        PostgresDriver { runtime }
    }
}

impl Driver for PostgresDriver {
    type Connection = PostgresConnection;

    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn open(&self, connection_string: &str) -> Result<PostgresConnection> {
        let (client, connection) = self
            .runtime
            .block_on(tokio_postgres::connect(connection_string, NoTls))
            .map_err(ConduitError::connection)?;

        let driver_task = self.runtime.spawn(async move {
            if let Err(err) = connection.await {
                debug!("postgresql connection task ended: {err}");
            }
        });

        Ok(PostgresConnection {
            runtime: self.runtime.clone(),
            client: Some(client),
            driver_task: Some(driver_task),
        })
    }
}

pub struct PostgresConnection {
    runtime: Arc<Runtime>,
    client: Option<Client>,
    driver_task: Option<JoinHandle<()>>,
}

impl PostgresConnection {
    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| ConduitError::connection("postgresql connection closed"))
    }
}

impl DriverConnection for PostgresConnection {
    type Cursor = PostgresCursor;

    fn execute_reader(&mut self, command: &Command) -> Result<PostgresCursor> {
        let (sql, params) = prepare_command(command);
        let client = self.client()?;
        let stream = self
            .runtime
            .block_on(client.query_raw(sql.as_str(), as_sql_refs(&params)))
            .map_err(ConduitError::backend)?;

        Ok(PostgresCursor {
            runtime: self.runtime.clone(),
            stream: Box::pin(stream),
            columns: None,
        })
    }

    fn execute_scalar(&mut self, command: &Command) -> Result<Value> {
        let (sql, params) = prepare_command(command);
        let client = self.client()?;
        let rows = self
            .runtime
            .block_on(client.query(sql.as_str(), &as_sql_refs(&params)))
            .map_err(ConduitError::backend)?;

        match rows.first() {
            Some(row) if !row.is_empty() => column_value(row, 0),
            _ => Ok(Value::Null),
        }
    }

    fn execute_non_query(&mut self, command: &Command) -> Result<u64> {
        let (sql, params) = prepare_command(command);
        let client = self.client()?;
        self.runtime
            .block_on(client.execute(sql.as_str(), &as_sql_refs(&params)))
            .map_err(ConduitError::backend)
    }

    /// `lastval()` reports the sequence value most recently used by this session
    fn execute_identity(&mut self, command: &Command) -> Result<Value> {
        let changed = self.execute_non_query(command)?;
        if changed == 0 {
            return Ok(Value::Null);
        }

        let client = self.client()?;
        match self
            .runtime
            .block_on(client.query_one("SELECT lastval()", &[]))
        {
            Ok(row) => column_value(&row, 0),
            Err(err) if err.code() == Some(&SqlState::OBJECT_NOT_IN_PREREQUISITE_STATE) => {
                Ok(Value::Null)
            }
            Err(err) => Err(ConduitError::backend(err)),
        }
    }
}

impl Drop for PostgresConnection {
    fn drop(&mut self) {
        // Dropping the client ends the session; wait for the socket to close
        drop(self.client.take());
        if let Some(driver_task) = self.driver_task.take() {
            let _ = self.runtime.block_on(driver_task);
        }
    }
}

/// Forward-only cursor over a PostgreSQL row stream
pub struct PostgresCursor {
    runtime: Arc<Runtime>,
    stream: Pin<Box<RowStream>>,
    columns: Option<Arc<[String]>>,
}

impl RowCursor for PostgresCursor {
    fn next_row(&mut self) -> Result<Option<ResultRow>> {
        let row = match self.runtime.block_on(self.stream.next()) {
            None => return Ok(None),
            Some(row) => row.map_err(ConduitError::backend)?,
        };

        let columns = self
            .columns
            .get_or_insert_with(|| {
                row.columns()
                    .iter()
                    .map(|column| column.name().to_string())
                    .collect()
            })
            .clone();
        Ok(Some(ResultRow::new(columns, row_values(&row)?)))
    }
}
