mod config;
mod convert;
mod dialect;
mod driver;
mod entity;
mod error;
mod executor;
mod expr;
mod include;
mod materialize;
mod pool;
mod query;
mod row;
mod sanitize;
mod schema;
mod transaction;
mod translate;
mod value;

pub use config::{ConnectionConfig, ConnectionConfigBuilder};
pub use convert::{
    format_date, format_duration, format_time, format_timestamp, format_timestamp_offset,
    from_wire, parse_date, parse_duration, parse_time, parse_timestamp, parse_timestamp_offset,
    to_wire, truncate_datetime, truncate_datetime_offset, truncate_time, wire_primitive,
    zero_value,
};
pub use dialect::{DatePart, DateUnit, Dialect, IsolationLevel, SetOp};
pub use driver::{Connection, ConnectionFactory};
pub use entity::{
    ColumnDef, ColumnDescriptor, ColumnFlags, CompositeIndex, Entity, EntityBuilder,
    EntityDescriptor, IndexSpec, NavigationDescriptor, RelationshipEdge, column_map,
    descriptor_for,
};
pub use error::{
    BoxedError, ConfigError, ConnectionError, Error, IncludeError, MaterializeError,
    MetadataError, Result, SchemaError, TranslationError, UsageError, ValueError,
};
pub use executor::Executor;
pub use expr::{
    BinaryOp, Expr, Thunk, UnaryOp, avg_of, between, col, count_all, deferred, lit, max_of,
    min_of, now, path, raw, sum_of, today, utc_now, when,
};
pub use include::{BASE_ALIAS, DEFAULT_MAX_INCLUDE_DEPTH, IncludeNode, JoinPlan, plan_includes};
pub use materialize::{
    EntityStream, GraphShape, materialize_graph, materialize_graph_stream, materialize_rows,
    materialize_stream,
};
pub use pool::{Pool, PoolConfig, PoolStatus, PooledConnection};
pub use query::{
    CteDefinition, OrderKey, Query, SortDirection, SqlQuery, UpdateSet, WindowArg,
    WindowFunction, insert, insert_many, insert_many_sql, insert_sql,
};
pub use row::{Row, RowStream};
pub use sanitize::{format_value, sanitize_identifier, sanitize_like_value, sanitize_string};
pub use schema::{
    create_index_sql, create_table_sql, index_statements, schema_statements, table_statement,
};
pub use transaction::Transaction;
pub use translate::{SqlFragment, TranslateMode, Translator};
pub use value::{EnumValue, Value, ValueKey, ValueType, float_total_cmp, value_total_eq};
