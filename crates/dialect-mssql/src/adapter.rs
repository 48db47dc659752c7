//! Live SQL Server driver over tiberius.
//!
//! Core-generated placeholders (`@p0`, `@p1`, …) are renumbered to the
//! TDS convention (`@P1`, `@P2`, …) before binding. A failed or cancelled
//! mid-flight operation leaves the TDS stream in an unknown state, so the
//! connection is flagged broken and the pool closes it instead of reusing
//! it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::TryStreamExt;
use futures_util::stream::try_unfold;
use tiberius::{AuthMethod, Client, ColumnType, Config, EncryptionLevel, QueryItem};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use quarry_core::{
    ConfigError, Connection, ConnectionConfig, ConnectionError, ConnectionFactory, Error, Result,
    Row, RowStream, Value, wire_primitive,
};

const DEFAULT_MSSQL_PORT: u16 = 1433;
const PING_SQL: &str = "SELECT 1";

type TdsClient = Client<Compat<TcpStream>>;

/// Connection factory for the pool, built from the shared configuration.
pub struct MssqlConnectionFactory {
    config: ConnectionConfig,
}

impl MssqlConnectionFactory {
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    fn tds_config(&self) -> Result<Config> {
        let username = self
            .config
            .username
            .clone()
            .ok_or(ConfigError::MissingKey { key: "username" })?;
        let password = self.config.password.clone().unwrap_or_default();

        let mut tds = Config::new();
        tds.host(&self.config.hostname);
        tds.port(self.config.port.unwrap_or(DEFAULT_MSSQL_PORT));
        tds.database(&self.config.database);
        tds.authentication(AuthMethod::sql_server(username, password));
        if self.config.encrypt {
            tds.encryption(EncryptionLevel::Required);
        } else {
            tds.encryption(EncryptionLevel::NotSupported);
        }
        if self.config.trust_server_certificate {
            tds.trust_cert();
        }

        Ok(tds)
    }
}

#[async_trait]
impl ConnectionFactory for MssqlConnectionFactory {
    async fn connect(&self, cancel: &CancellationToken) -> Result<Box<dyn Connection>> {
        let tds = self.tds_config()?;

        let connecting = async {
            let tcp = TcpStream::connect(tds.get_addr())
                .await
                .map_err(connect_error)?;
            tcp.set_nodelay(true).map_err(connect_error)?;
            Client::connect(tds, tcp.compat_write())
                .await
                .map_err(connect_error)
        };

        let timed = async {
            match self.config.connection_timeout {
                Some(timeout) => tokio::time::timeout(timeout, connecting)
                    .await
                    .map_err(|_| Error::Timeout { after: timeout })?,
                None => connecting.await,
            }
        };

        let client = tokio::select! {
            result = timed => result?,
            () = cancel.cancelled() => return Err(Error::Cancelled),
        };

        debug!(
            host = %self.config.hostname,
            database = %self.config.database,
            "mssql connection established"
        );
        Ok(Box::new(MssqlConnection {
            client,
            broken: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct MssqlConnection {
    client: TdsClient,
    broken: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MssqlConnection {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let query = build_query(sql, params)?;
        let broken = Arc::clone(&self.broken);

        let result = tokio::select! {
            result = query.execute(&mut self.client) => result,
            () = cancel.cancelled() => {
                broken.store(true, Ordering::SeqCst);
                return Err(Error::Cancelled);
            }
        };

        match result {
            Ok(done) => Ok(done.total()),
            Err(error) => {
                note_failure(&broken, &error);
                Err(Error::execution(sql, error))
            }
        }
    }

    async fn query(
        &mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>> {
        let query = build_query(sql, params)?;
        let broken = Arc::clone(&self.broken);

        let collecting = async {
            let mut stream = query.query(&mut self.client).await?;
            let mut columns: Option<Arc<[String]>> = None;
            let mut rows = Vec::new();
            while let Some(item) = stream.try_next().await? {
                match item {
                    QueryItem::Metadata(meta) => {
                        columns = Some(column_labels(meta.columns()));
                    }
                    QueryItem::Row(row) => {
                        let labels = columns
                            .clone()
                            .unwrap_or_else(|| column_labels(row.columns()));
                        rows.push(Row::new(labels, row_values(&row)?));
                    }
                }
            }
            Ok::<_, tiberius::error::Error>(rows)
        };

        let result = tokio::select! {
            result = collecting => result,
            () = cancel.cancelled() => {
                broken.store(true, Ordering::SeqCst);
                return Err(Error::Cancelled);
            }
        };

        result.map_err(|error| {
            note_failure(&broken, &error);
            Error::execution(sql, error)
        })
    }

    async fn query_stream<'a>(
        &'a mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<RowStream<'a>> {
        let query = build_query(sql, params)?;
        let broken = Arc::clone(&self.broken);
        let cancel = cancel.clone();
        let sql_owned = sql.to_string();

        let stream = query
            .query(&mut self.client)
            .await
            .map_err(|error| {
                note_failure(&broken, &error);
                Error::execution(&sql_owned, error)
            })?;

        let state = (stream, None::<Arc<[String]>>);
        Ok(Box::pin(try_unfold(state, move |(mut stream, mut columns)| {
            let broken = Arc::clone(&broken);
            let cancel = cancel.clone();
            let sql = sql_owned.clone();
            async move {
                loop {
                    let item = tokio::select! {
                        item = stream.try_next() => item.map_err(|error| {
                            note_failure(&broken, &error);
                            Error::execution(&sql, error)
                        })?,
                        () = cancel.cancelled() => {
                            broken.store(true, Ordering::SeqCst);
                            return Err(Error::Cancelled);
                        }
                    };
                    match item {
                        Some(QueryItem::Metadata(meta)) => {
                            columns = Some(column_labels(meta.columns()));
                        }
                        Some(QueryItem::Row(row)) => {
                            let labels = columns
                                .clone()
                                .unwrap_or_else(|| column_labels(row.columns()));
                            let values = row_values(&row)
                                .map_err(|error| Error::execution(&sql, error))?;
                            return Ok(Some((Row::new(labels, values), (stream, columns))));
                        }
                        None => return Ok(None),
                    }
                }
            }
        })))
    }

    async fn ping(&mut self) -> Result<()> {
        self.client
            .simple_query(PING_SQL)
            .await
            .map_err(|error| Error::execution(PING_SQL, error))?
            .into_results()
            .await
            .map_err(|error| Error::execution(PING_SQL, error))?;
        Ok(())
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }
}

/// Renumbers core placeholders `@p0…` to TDS `@P1…` and binds the
/// parameters, rich variants narrowed to primitives first.
fn build_query(sql: &str, params: &[Value]) -> Result<tiberius::Query<'static>> {
    let mut query = tiberius::Query::new(renumber_placeholders(sql, params.len()));
    for param in params {
        match wire_primitive(param, false)? {
            Value::Null => query.bind(Option::<i32>::None),
            Value::Bool(value) => query.bind(value),
            Value::Int16(value) => query.bind(value),
            Value::Int32(value) => query.bind(value),
            Value::Int64(value) => query.bind(value),
            Value::Float32(value) => query.bind(value),
            Value::Float64(value) => query.bind(value),
            Value::String(value) => query.bind(value),
            Value::Bytes(value) => query.bind(value),
            Value::Uuid(value) => query.bind(value),
            Value::Date(value) => query.bind(value),
            Value::Time(value) => query.bind(value),
            Value::DateTime(value) => query.bind(value),
            Value::DateTimeOffset(value) => query.bind(value),
            other => {
                // wire_primitive narrows Duration/Enum/Json to primitives.
                unreachable!("unexpected wire value {other:?}")
            }
        }
    }
    Ok(query)
}

fn renumber_placeholders(sql: &str, param_count: usize) -> String {
    let mut renumbered = sql.to_string();
    for index in (0..param_count).rev() {
        renumbered = renumbered.replace(&format!("@p{index}"), &format!("@P{}", index + 1));
    }
    renumbered
}

fn column_labels(columns: &[tiberius::Column]) -> Arc<[String]> {
    columns
        .iter()
        .map(|column| column.name().to_string())
        .collect()
}

fn row_values(row: &tiberius::Row) -> std::result::Result<Vec<Value>, tiberius::error::Error> {
    let mut values = Vec::with_capacity(row.columns().len());
    let column_types: Vec<ColumnType> = row
        .columns()
        .iter()
        .map(tiberius::Column::column_type)
        .collect();

    for (index, column_type) in column_types.into_iter().enumerate() {
        values.push(cell_value(row, index, column_type)?);
    }
    Ok(values)
}

fn cell_value(
    row: &tiberius::Row,
    index: usize,
    column_type: ColumnType,
) -> std::result::Result<Value, tiberius::error::Error> {
    let value = match column_type {
        ColumnType::Null => Value::Null,
        ColumnType::Bit | ColumnType::Bitn => opt(row.try_get::<bool, _>(index)?, Value::Bool),
        ColumnType::Int1 => opt(row.try_get::<u8, _>(index)?, |value| {
            Value::Int16(i16::from(value))
        }),
        ColumnType::Int2 => opt(row.try_get::<i16, _>(index)?, Value::Int16),
        ColumnType::Int4 => opt(row.try_get::<i32, _>(index)?, Value::Int32),
        ColumnType::Int8 => opt(row.try_get::<i64, _>(index)?, Value::Int64),
        ColumnType::Intn => integer_value(row, index)?,
        ColumnType::Float4 => opt(row.try_get::<f32, _>(index)?, Value::Float32),
        ColumnType::Float8 => opt(row.try_get::<f64, _>(index)?, Value::Float64),
        ColumnType::Floatn => match row.try_get::<f64, _>(index) {
            Ok(value) => opt(value, Value::Float64),
            Err(_) => opt(row.try_get::<f32, _>(index)?, Value::Float32),
        },
        ColumnType::Guid => opt(row.try_get::<uuid::Uuid, _>(index)?, Value::Uuid),
        ColumnType::Daten => opt(row.try_get::<chrono::NaiveDate, _>(index)?, Value::Date),
        ColumnType::Timen => opt(row.try_get::<chrono::NaiveTime, _>(index)?, Value::Time),
        ColumnType::Datetime
        | ColumnType::Datetime4
        | ColumnType::Datetimen
        | ColumnType::Datetime2 => opt(
            row.try_get::<chrono::NaiveDateTime, _>(index)?,
            Value::DateTime,
        ),
        ColumnType::DatetimeOffsetn => opt(
            row.try_get::<chrono::DateTime<chrono::FixedOffset>, _>(index)?,
            Value::DateTimeOffset,
        ),
        ColumnType::BigBinary | ColumnType::BigVarBin | ColumnType::Image => opt(
            row.try_get::<&[u8], _>(index)?,
            |value: &[u8]| Value::Bytes(value.to_vec()),
        ),
        ColumnType::BigChar
        | ColumnType::BigVarChar
        | ColumnType::NChar
        | ColumnType::NVarchar
        | ColumnType::Text
        | ColumnType::NText
        | ColumnType::Xml => opt(row.try_get::<&str, _>(index)?, |value: &str| {
            Value::String(value.to_string())
        }),
        // Decimals and variants outside the mapped type system surface as
        // floats when the driver can narrow them, null otherwise.
        _ => match row.try_get::<f64, _>(index) {
            Ok(value) => opt(value, Value::Float64),
            Err(_) => Value::Null,
        },
    };
    Ok(value)
}

fn integer_value(row: &tiberius::Row, index: usize) -> std::result::Result<Value, tiberius::error::Error> {
    if let Ok(value) = row.try_get::<i64, _>(index) {
        return Ok(opt(value, Value::Int64));
    }
    if let Ok(value) = row.try_get::<i32, _>(index) {
        return Ok(opt(value, Value::Int32));
    }
    if let Ok(value) = row.try_get::<i16, _>(index) {
        return Ok(opt(value, Value::Int16));
    }
    let value = row.try_get::<u8, _>(index)?;
    Ok(opt(value, |value| Value::Int16(i16::from(value))))
}

fn opt<T>(value: Option<T>, wrap: impl FnOnce(T) -> Value) -> Value {
    value.map_or(Value::Null, wrap)
}

fn note_failure(broken: &AtomicBool, error: &tiberius::error::Error) {
    // Protocol and transport failures poison the TDS stream; plain server
    // errors (constraint violations, bad SQL) leave it usable.
    if matches!(
        error,
        tiberius::error::Error::Io { .. }
            | tiberius::error::Error::Tls(_)
            | tiberius::error::Error::Protocol(_)
    ) {
        broken.store(true, Ordering::SeqCst);
    }
}

fn connect_error(source: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::Connection(ConnectionError::Connect {
        source: Box::new(source),
    })
}

#[cfg(test)]
mod tests {
    use super::renumber_placeholders;

    #[test]
    fn renumbering_shifts_to_one_based_uppercase() {
        assert_eq!(
            renumber_placeholders("SELECT * FROM t WHERE a = @p0 AND b = @p1", 2),
            "SELECT * FROM t WHERE a = @P1 AND b = @P2"
        );
    }

    #[test]
    fn renumbering_handles_double_digit_indexes() {
        let sql = (0..12)
            .map(|index| format!("@p{index}"))
            .collect::<Vec<_>>()
            .join(",");
        let renumbered = renumber_placeholders(&sql, 12);
        assert!(renumbered.starts_with("@P1,@P2"));
        assert!(renumbered.ends_with("@P11,@P12"));
    }

    #[test]
    fn renumbering_without_params_is_identity() {
        assert_eq!(renumber_placeholders("SELECT 1", 0), "SELECT 1");
    }
}
