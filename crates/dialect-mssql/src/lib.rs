//! SQL Server dialect binding: T-SQL identifier and literal forms,
//! OFFSET/FETCH pagination, SAVE TRANSACTION savepoints, temporal
//! intrinsics, and a live driver over tiberius.

mod adapter;

use quarry_core::{DatePart, Dialect, ValueType};

pub use adapter::MssqlConnectionFactory;

const DIALECT_NAME: &str = "mssql";

/// T-SQL reserved words that force identifier quoting.
const MSSQL_RESERVED_WORDS: &[&str] = &[
    "ADD", "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "AUTHORIZATION", "BACKUP", "BEGIN",
    "BETWEEN", "BREAK", "BROWSE", "BULK", "BY", "CASCADE", "CASE", "CHECK", "CHECKPOINT", "CLOSE",
    "CLUSTERED", "COLUMN", "COMMIT", "COMPUTE", "CONSTRAINT", "CONTAINS", "CONTINUE", "CONVERT",
    "CREATE", "CROSS", "CURRENT", "CURSOR", "DATABASE", "DBCC", "DEALLOCATE", "DECLARE",
    "DEFAULT", "DELETE", "DENY", "DESC", "DISTINCT", "DOUBLE", "DROP", "ELSE", "END", "ESCAPE",
    "EXCEPT", "EXEC", "EXECUTE", "EXISTS", "EXIT", "EXTERNAL", "FETCH", "FILE", "FOR", "FOREIGN",
    "FROM", "FULL", "FUNCTION", "GOTO", "GRANT", "GROUP", "HAVING", "HOLDLOCK", "IDENTITY", "IF",
    "IN", "INDEX", "INNER", "INSERT", "INTERSECT", "INTO", "IS", "JOIN", "KEY", "KILL", "LEFT",
    "LIKE", "LINENO", "MERGE", "NATIONAL", "NOCHECK", "NONCLUSTERED", "NOT", "NULL", "OF", "OFF",
    "OFFSETS", "ON", "OPEN", "OPTION", "OR", "ORDER", "OUTER", "OVER", "PERCENT", "PIVOT", "PLAN",
    "PRIMARY", "PRINT", "PROC", "PROCEDURE", "PUBLIC", "RAISERROR", "READ", "RECONFIGURE",
    "REFERENCES", "REPLICATION", "RESTORE", "RESTRICT", "RETURN", "REVERT", "REVOKE", "RIGHT",
    "ROLLBACK", "ROWCOUNT", "RULE", "SAVE", "SCHEMA", "SELECT", "SET", "SETUSER", "SHUTDOWN",
    "SOME", "STATISTICS", "TABLE", "TABLESAMPLE", "THEN", "TO", "TOP", "TRAN", "TRANSACTION",
    "TRIGGER", "TRUNCATE", "UNION", "UNIQUE", "UNPIVOT", "UPDATE", "USE", "USER", "VALUES",
    "VARYING", "VIEW", "WAITFOR", "WHEN", "WHERE", "WHILE", "WITH",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct MssqlDialect;

impl Dialect for MssqlDialect {
    fn name(&self) -> &str {
        DIALECT_NAME
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@p{index}")
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn reserved_words(&self) -> &'static [&'static str] {
        MSSQL_RESERVED_WORDS
    }

    fn like_metacharacters(&self) -> &'static [char] {
        &['%', '_', '[']
    }

    /// T-SQL escapes LIKE metacharacters by bracket-wrapping them.
    fn escape_like_fragment(&self, raw: &str) -> String {
        let mut escaped = String::with_capacity(raw.len());
        for ch in raw.chars() {
            match ch {
                '%' => escaped.push_str("[%]"),
                '_' => escaped.push_str("[_]"),
                '[' => escaped.push_str("[[]"),
                other => escaped.push(other),
            }
        }
        escaped
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    fn binary_literal(&self, bytes: &[u8]) -> String {
        let mut literal = String::with_capacity(bytes.len() * 2 + 2);
        literal.push_str("0x");
        for byte in bytes {
            literal.push_str(&format!("{byte:02x}"));
        }
        literal
    }

    fn concat_operator(&self) -> &'static str {
        "+"
    }

    fn length_function(&self) -> &'static str {
        "LEN"
    }

    fn current_timestamp(&self) -> &'static str {
        "GETDATE()"
    }

    fn current_utc_timestamp(&self) -> &'static str {
        "GETUTCDATE()"
    }

    fn current_date(&self) -> &'static str {
        "CONVERT(date, GETDATE())"
    }

    fn date_part(&self, part: DatePart, operand: &str) -> String {
        match part {
            DatePart::Year => format!("YEAR({operand})"),
            DatePart::Month => format!("MONTH({operand})"),
            DatePart::Day => format!("DAY({operand})"),
            DatePart::Hour => format!("DATEPART(hour, {operand})"),
            DatePart::Minute => format!("DATEPART(minute, {operand})"),
            DatePart::Second => format!("DATEPART(second, {operand})"),
        }
    }

    fn recursive_cte_requires_keyword(&self) -> bool {
        false
    }

    fn commit_sql(&self) -> &'static str {
        "COMMIT TRANSACTION"
    }

    fn rollback_sql(&self) -> &'static str {
        "ROLLBACK TRANSACTION"
    }

    fn savepoint_sql(&self, name: &str) -> String {
        format!("SAVE TRANSACTION {name}")
    }

    fn rollback_savepoint_sql(&self, name: &str) -> String {
        format!("ROLLBACK TRANSACTION {name}")
    }

    /// T-SQL has no RELEASE SAVEPOINT; release is a stack-only no-op.
    fn release_savepoint_sql(&self, _name: &str) -> Option<String> {
        None
    }

    fn auto_increment_clause(&self) -> &'static str {
        "IDENTITY(1,1)"
    }

    fn column_type(&self, declared: ValueType) -> String {
        match declared {
            ValueType::Bool => "BIT".to_string(),
            ValueType::Int16 => "SMALLINT".to_string(),
            ValueType::Int32 => "INT".to_string(),
            ValueType::Int64 => "BIGINT".to_string(),
            ValueType::Float32 => "REAL".to_string(),
            ValueType::Float64 => "FLOAT".to_string(),
            ValueType::String => "NVARCHAR(255)".to_string(),
            ValueType::Bytes => "VARBINARY(MAX)".to_string(),
            ValueType::Uuid => "UNIQUEIDENTIFIER".to_string(),
            ValueType::Date => "DATE".to_string(),
            ValueType::Time => "TIME".to_string(),
            ValueType::DateTime => "DATETIME2".to_string(),
            ValueType::DateTimeOffset => "DATETIMEOFFSET".to_string(),
            ValueType::Duration => "TIME".to_string(),
            ValueType::Enum => "INT".to_string(),
            ValueType::Json => "NVARCHAR(MAX)".to_string(),
        }
    }

    fn guard_create_table(&self, table: &str, create_sql: &str) -> String {
        format!(
            "IF OBJECT_ID(N'{}', N'U') IS NULL BEGIN {create_sql} END",
            table.replace('\'', "''")
        )
    }

    fn guard_create_index(&self, table: &str, index: &str, create_sql: &str) -> String {
        format!(
            "IF NOT EXISTS (SELECT 1 FROM sys.indexes WHERE name = N'{}' AND object_id = OBJECT_ID(N'{}')) BEGIN {create_sql} END",
            index.replace('\'', "''"),
            table.replace('\'', "''")
        )
    }

    fn last_insert_id_sql(&self) -> Option<&'static str> {
        Some("SELECT CAST(SCOPE_IDENTITY() AS BIGINT)")
    }
}
