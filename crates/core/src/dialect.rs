use uuid::Uuid;

use crate::convert;
use crate::value::ValueType;

/// Transaction isolation levels a dialect can name in its begin statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
    Snapshot,
}

impl IsolationLevel {
    #[must_use]
    pub fn sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Snapshot => "SNAPSHOT",
        }
    }
}

/// Set operations a query can combine siblings with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    UnionAll,
    Intersect,
    Except,
}

impl SetOp {
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Union => "UNION",
            Self::UnionAll => "UNION ALL",
            Self::Intersect => "INTERSECT",
            Self::Except => "EXCEPT",
        }
    }
}

/// Calendar units for date arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateUnit {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl DateUnit {
    #[must_use]
    pub fn sql(self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Second => "second",
        }
    }
}

/// Components extractable from a temporal expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl DatePart {
    #[must_use]
    pub fn sql(self) -> &'static str {
        match self {
            Self::Year => "YEAR",
            Self::Month => "MONTH",
            Self::Day => "DAY",
            Self::Hour => "HOUR",
            Self::Minute => "MINUTE",
            Self::Second => "SECOND",
        }
    }
}

const ANSI_RESERVED_WORDS: &[&str] = &[
    "ALL", "AND", "ANY", "AS", "ASC", "BETWEEN", "BY", "CASE", "CHECK", "COLUMN", "CONSTRAINT",
    "CREATE", "CROSS", "CURRENT", "DEFAULT", "DELETE", "DESC", "DISTINCT", "DROP", "ELSE", "END",
    "EXCEPT", "EXISTS", "FOREIGN", "FROM", "FULL", "GROUP", "HAVING", "IN", "INDEX", "INNER",
    "INSERT", "INTERSECT", "INTO", "IS", "JOIN", "KEY", "LEFT", "LIKE", "NOT", "NULL", "ON", "OR",
    "ORDER", "OUTER", "PRIMARY", "REFERENCES", "RIGHT", "SELECT", "SET", "TABLE", "THEN", "TO",
    "UNION", "UNIQUE", "UPDATE", "VALUES", "WHEN", "WHERE", "WITH",
];

/// Capability set supplied by one SQL dialect.
///
/// The query builder, translator, sanitiser, schema builder, and transaction
/// layer are written against this trait only; a new dialect is one cohesive
/// implementation. Defaults are ANSI-flavoured so a binding overrides just
/// the points where its engine diverges.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &str;

    /// Placeholder text for the parameter at `index` (zero-based).
    fn placeholder(&self, index: usize) -> String {
        format!("${}", index + 1)
    }

    /// Quotes an identifier unconditionally, doubling embedded quote
    /// characters. Bare emission for simple identifiers is decided by the
    /// sanitiser, not here.
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn reserved_words(&self) -> &'static [&'static str] {
        ANSI_RESERVED_WORDS
    }

    /// Whether string literals must escape backspace, LF, CR, and TAB to
    /// `\x`-style notations.
    fn escape_control_chars(&self) -> bool {
        false
    }

    fn like_metacharacters(&self) -> &'static [char] {
        &['%', '_']
    }

    /// Escapes LIKE metacharacters inside an already string-escaped
    /// fragment.
    fn escape_like_fragment(&self, raw: &str) -> String {
        let mut escaped = String::with_capacity(raw.len());
        for ch in raw.chars() {
            if self.like_metacharacters().contains(&ch) {
                escaped.push('\\');
            }
            escaped.push(ch);
        }
        escaped
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "TRUE" } else { "FALSE" }
    }

    fn binary_literal(&self, bytes: &[u8]) -> String {
        let mut hex = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            hex.push_str(&format!("{byte:02x}"));
        }
        format!("X'{hex}'")
    }

    fn uuid_literal(&self, value: Uuid) -> String {
        format!("'{value}'")
    }

    fn timestamp_literal(&self, value: chrono::NaiveDateTime) -> String {
        format!("'{}'", convert::format_timestamp(value).replacen('T', " ", 1))
    }

    fn timestamp_offset_literal(&self, value: chrono::DateTime<chrono::FixedOffset>) -> String {
        format!(
            "'{}'",
            convert::format_timestamp_offset(value).replacen('T', " ", 1)
        )
    }

    fn date_literal(&self, value: chrono::NaiveDate) -> String {
        format!("'{}'", convert::format_date(value))
    }

    fn time_literal(&self, value: chrono::NaiveTime) -> String {
        format!("'{}'", convert::format_time(value))
    }

    fn duration_literal(&self, value: chrono::TimeDelta) -> String {
        format!("'{}'", convert::format_duration(value))
    }

    fn concat_operator(&self) -> &'static str {
        "||"
    }

    fn length_function(&self) -> &'static str {
        "CHAR_LENGTH"
    }

    fn current_timestamp(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    fn current_utc_timestamp(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    fn current_date(&self) -> &'static str {
        "CURRENT_DATE"
    }

    fn date_add(&self, unit: DateUnit, amount: &str, operand: &str) -> String {
        format!("DATEADD({}, {amount}, {operand})", unit.sql())
    }

    fn date_part(&self, part: DatePart, operand: &str) -> String {
        format!("EXTRACT({} FROM {operand})", part.sql())
    }

    /// Pagination clause appended after ORDER BY.
    fn pagination_clause(&self, skip: u64, take: Option<u64>) -> String {
        match take {
            Some(take) => format!("OFFSET {skip} ROWS FETCH NEXT {take} ROWS ONLY"),
            None => format!("OFFSET {skip} ROWS"),
        }
    }

    fn supports_set_op(&self, _op: SetOp) -> bool {
        true
    }

    fn recursive_cte_requires_keyword(&self) -> bool {
        true
    }

    fn begin_transaction_sql(&self, isolation: Option<IsolationLevel>) -> Vec<String> {
        let mut statements = Vec::with_capacity(2);
        if let Some(level) = isolation {
            statements.push(format!("SET TRANSACTION ISOLATION LEVEL {}", level.sql()));
        }
        statements.push("BEGIN TRANSACTION".to_string());
        statements
    }

    fn commit_sql(&self) -> &'static str {
        "COMMIT"
    }

    fn rollback_sql(&self) -> &'static str {
        "ROLLBACK"
    }

    fn savepoint_sql(&self, name: &str) -> String {
        format!("SAVEPOINT {name}")
    }

    fn rollback_savepoint_sql(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {name}")
    }

    /// `None` when the dialect has no explicit release; release is then a
    /// no-op on the transaction handle.
    fn release_savepoint_sql(&self, name: &str) -> Option<String> {
        Some(format!("RELEASE SAVEPOINT {name}"))
    }

    fn auto_increment_clause(&self) -> &'static str {
        "GENERATED BY DEFAULT AS IDENTITY"
    }

    /// DDL column type for a declared value type, used when the column does
    /// not carry an explicit wire-type override.
    fn column_type(&self, declared: ValueType) -> String {
        match declared {
            ValueType::Bool => "BOOLEAN".to_string(),
            ValueType::Int16 => "SMALLINT".to_string(),
            ValueType::Int32 => "INTEGER".to_string(),
            ValueType::Int64 => "BIGINT".to_string(),
            ValueType::Float32 => "REAL".to_string(),
            ValueType::Float64 => "DOUBLE PRECISION".to_string(),
            ValueType::String => "VARCHAR(255)".to_string(),
            ValueType::Bytes => "BLOB".to_string(),
            ValueType::Uuid => "UUID".to_string(),
            ValueType::Date => "DATE".to_string(),
            ValueType::Time => "TIME".to_string(),
            ValueType::DateTime => "TIMESTAMP".to_string(),
            ValueType::DateTimeOffset => "TIMESTAMP WITH TIME ZONE".to_string(),
            ValueType::Duration => "TIME".to_string(),
            ValueType::Enum => "INTEGER".to_string(),
            ValueType::Json => "TEXT".to_string(),
        }
    }

    /// Wraps a CREATE TABLE statement in the dialect's existence guard.
    fn guard_create_table(&self, _table: &str, create_sql: &str) -> String {
        create_sql.replacen("CREATE TABLE", "CREATE TABLE IF NOT EXISTS", 1)
    }

    /// Wraps a CREATE INDEX statement in the dialect's existence guard.
    fn guard_create_index(&self, _table: &str, _index: &str, create_sql: &str) -> String {
        if create_sql.starts_with("CREATE UNIQUE INDEX") {
            create_sql.replacen("CREATE UNIQUE INDEX", "CREATE UNIQUE INDEX IF NOT EXISTS", 1)
        } else {
            create_sql.replacen("CREATE INDEX", "CREATE INDEX IF NOT EXISTS", 1)
        }
    }

    /// Scalar query returning the identity generated by the last insert on
    /// this connection, when the dialect offers one.
    fn last_insert_id_sql(&self) -> Option<&'static str> {
        None
    }
}
