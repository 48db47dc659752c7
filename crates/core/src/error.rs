use std::time::Duration;

use thiserror::Error;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Malformed or insufficient connection configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("connection string fragment `{fragment}` is not a key=value pair")]
    MalformedPair { fragment: String },
    #[error("missing required connection key `{key}`")]
    MissingKey { key: &'static str },
    #[error("value `{value}` for connection key `{key}` is invalid: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Invalid or missing declarations on a domain type.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("type `{type_name}` declares no table mapping")]
    MissingTable { type_name: &'static str },
    #[error("type `{type_name}` declares no primary key column")]
    MissingPrimaryKey { type_name: &'static str },
    #[error("type `{type_name}` declares more than one primary key (`{first}` and `{second}`)")]
    DuplicatePrimaryKey {
        type_name: &'static str,
        first: String,
        second: String,
    },
    #[error("duplicate column `{column}` on type `{type_name}`")]
    DuplicateColumn {
        type_name: &'static str,
        column: String,
    },
    #[error("navigation `{navigation}` on type `{type_name}` cannot be resolved: {reason}")]
    UnresolvedNavigation {
        type_name: &'static str,
        navigation: String,
        reason: String,
    },
}

/// Expression tree contains a construct the translator does not support.
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("method `{method}` is not translatable")]
    UnsupportedMethod { method: String },
    #[error("method `{method}` used outside its expected shape: {reason}")]
    MethodShape { method: String, reason: String },
    #[error("column `{column}` is not mapped on table `{table}`")]
    UnknownColumn { column: String, table: String },
    #[error("member path `{path}` does not follow a planned join")]
    NavigationNotJoined { path: String },
    #[error("expression node `{node}` is not allowed here")]
    UnsupportedNode { node: &'static str },
}

/// API called with an inconsistent combination of operations.
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("HAVING requires at least one GROUP BY key")]
    HavingWithoutGroupBy,
    #[error("SKIP {skip} requires an explicit ORDER BY")]
    SkipWithoutOrderBy { skip: u64 },
    #[error("transaction already completed; commit and rollback are terminal")]
    TransactionCompleted,
    #[error("savepoint `{name}` already exists in this transaction")]
    DuplicateSavepoint { name: String },
    #[error("savepoint `{name}` does not exist in this transaction")]
    UnknownSavepoint { name: String },
    #[error("dialect `{dialect}` does not support the {op} set operation")]
    SetOperationUnsupported { op: &'static str, dialect: String },
}

/// A value cannot be safely serialised or converted.
#[derive(Debug, Error)]
pub enum ValueError {
    #[error("string contains an embedded NUL byte")]
    EmbeddedNul,
    #[error("cannot convert {from} to {to}")]
    Unconvertible {
        from: &'static str,
        to: &'static str,
    },
    #[error("value `{value}` is out of range for {target}")]
    OutOfRange {
        value: String,
        target: &'static str,
    },
    #[error("JSON serialisation failed: {source}")]
    JsonEncode {
        #[source]
        source: serde_json::Error,
    },
    #[error("JSON payload is not parseable: {source}")]
    JsonDecode {
        #[source]
        source: serde_json::Error,
    },
    #[error("timestamp `{value}` is not representable on the wire")]
    UnrepresentableTimestamp { value: String },
}

/// Schema generation referenced an unknown type or field.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("table `{table}` references `{reference}` which is not registered")]
    UnknownReference { table: String, reference: String },
    #[error("index `{index}` on table `{table}` references unknown column `{column}`")]
    UnknownIndexColumn {
        table: String,
        index: String,
        column: String,
    },
    #[error("table `{table}` has no persisted columns")]
    NoColumns { table: String },
}

/// A row could not be folded back into an entity.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("row is missing required column `{column}` for type `{type_name}`")]
    MissingColumn {
        column: String,
        type_name: &'static str,
    },
    #[error("column `{column}` holds an unconvertible value: {source}")]
    Conversion {
        column: String,
        #[source]
        source: ValueError,
    },
    #[error("instance is not of the expected type `{expected}`")]
    TypeMismatch { expected: &'static str },
    #[error("query returned no rows")]
    NoRows,
    #[error("joined row stream is not grouped by base primary key (key `{key}` reappeared)")]
    NonContiguousRun { key: String },
}

/// Driver-level failure to connect, read, or write.
///
/// The failing SQL text is carried for context; bound parameter values are
/// deliberately omitted.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect: {source}")]
    Connect {
        #[source]
        source: BoxedError,
    },
    #[error("execution failed for `{sql}`: {source}")]
    Execution {
        sql: String,
        #[source]
        source: BoxedError,
    },
    #[error("connection is in a broken state")]
    Broken,
}

/// Navigation path invalid or nested too deep.
#[derive(Debug, Error)]
pub enum IncludeError {
    #[error("include path `{path}`: `{segment}` is not a navigation on `{type_name}`")]
    UnknownNavigation {
        path: String,
        segment: String,
        type_name: String,
    },
    #[error("include path `{path}` exceeds the maximum nesting depth of {limit}")]
    DepthExceeded { path: String, limit: usize },
    #[error("include path `{path}` is empty or contains an empty segment")]
    MalformedPath { path: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("translation error: {0}")]
    Translation(#[from] TranslationError),
    #[error("usage error: {0}")]
    Usage(#[from] UsageError),
    #[error("value error: {0}")]
    Value(#[from] ValueError),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("materialize error: {0}")]
    Materialize(#[from] MaterializeError),
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("include error: {0}")]
    Include(#[from] IncludeError),
    #[error("operation timed out after {after:?}")]
    Timeout { after: Duration },
    #[error("operation was cancelled")]
    Cancelled,
    #[error("{resource} was used after disposal")]
    Disposed { resource: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wraps a driver error with the SQL text that failed.
    pub fn execution(sql: impl Into<String>, source: impl Into<BoxedError>) -> Self {
        Self::Connection(ConnectionError::Execution {
            sql: sql.into(),
            source: source.into(),
        })
    }
}
