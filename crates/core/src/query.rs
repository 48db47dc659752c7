//! Immutable query descriptions and final SQL assembly.
//!
//! A [`Query`] accumulates predicates, ordering, grouping, paging,
//! includes, window functions, CTEs, and set-operation siblings, then
//! renders one dialect statement plus its parameter list. Assembly order is
//! fixed: WITH, SELECT, FROM, JOINs, WHERE, GROUP BY, HAVING, ORDER BY,
//! pagination, with set operations combined around the whole SELECT.

use std::fmt::Write as _;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::TimeDelta;
use tokio_util::sync::CancellationToken;

use crate::convert::to_wire;
use crate::dialect::{Dialect, SetOp};
use crate::entity::{Entity, EntityDescriptor, descriptor_for};
use crate::error::{Error, MaterializeError, Result, UsageError};
use crate::executor::Executor;
use crate::expr::Expr;
use crate::include::{DEFAULT_MAX_INCLUDE_DEPTH, JoinPlan, plan_includes};
use crate::materialize::{
    EntityStream, GraphShape, materialize_graph, materialize_graph_stream, materialize_rows,
    materialize_stream,
};
use crate::translate::Translator;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    #[must_use]
    pub fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub column: String,
    pub direction: SortDirection,
}

/// Argument shape of a window function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowArg {
    NoArg,
    Star,
    Column(String),
}

/// One window-function projection, emitted as
/// `FN(arg) OVER (PARTITION BY … ORDER BY … frame) AS alias`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowFunction {
    pub function: String,
    pub arg: WindowArg,
    pub partition_by: Vec<String>,
    pub order_by: Vec<OrderKey>,
    /// Frame specification emitted literally (`ROWS BETWEEN … AND …`).
    pub frame: Option<String>,
    pub alias: String,
}

impl WindowFunction {
    #[must_use]
    pub fn new(function: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            arg: WindowArg::NoArg,
            partition_by: Vec::new(),
            order_by: Vec::new(),
            frame: None,
            alias: alias.into(),
        }
    }

    #[must_use]
    pub fn over_column(mut self, column: impl Into<String>) -> Self {
        self.arg = WindowArg::Column(column.into());
        self
    }

    #[must_use]
    pub fn over_star(mut self) -> Self {
        self.arg = WindowArg::Star;
        self
    }

    #[must_use]
    pub fn partition_by(mut self, column: impl Into<String>) -> Self {
        self.partition_by.push(column.into());
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(OrderKey {
            column: column.into(),
            direction,
        });
        self
    }

    #[must_use]
    pub fn frame(mut self, frame: impl Into<String>) -> Self {
        self.frame = Some(frame.into());
        self
    }
}

/// One common table expression. The recursive form concatenates anchor and
/// recursive members with UNION ALL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CteDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub anchor: String,
    pub recursive: Option<String>,
}

impl CteDefinition {
    #[must_use]
    pub fn plain(name: impl Into<String>, columns: Vec<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            anchor: body.into(),
            recursive: None,
        }
    }

    #[must_use]
    pub fn recursive(
        name: impl Into<String>,
        columns: Vec<String>,
        anchor: impl Into<String>,
        recursive: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            anchor: anchor.into(),
            recursive: Some(recursive.into()),
        }
    }
}

/// A rendered statement: SQL text, parameters in placeholder order, and the
/// join plan the materialiser follows.
#[derive(Debug)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<Value>,
    pub plan: Option<JoinPlan>,
}

/// Column assignments for `update_many`, translated into a SET fragment.
#[derive(Debug, Clone, Default)]
pub struct UpdateSet {
    assignments: Vec<(String, Expr)>,
}

impl UpdateSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    #[must_use]
    pub fn assignments(&self) -> &[(String, Expr)] {
        &self.assignments
    }
}

struct SiblingParts {
    sql: String,
    params: Vec<Value>,
    ctes: Vec<CteDefinition>,
}

type SiblingBuilder = Box<dyn Fn(&dyn Dialect, usize) -> Result<SiblingParts> + Send + Sync>;

struct SetSibling {
    op: SetOp,
    build: SiblingBuilder,
}

struct Rendered {
    sql: String,
    params: Vec<Value>,
    plan: Option<JoinPlan>,
    ctes: Vec<CteDefinition>,
}

/// An immutable, composable query over `T`. Built incrementally, never
/// mutated once execution begins, and re-executable.
pub struct Query<T: Entity> {
    predicates: Vec<Expr>,
    raw_where: Vec<String>,
    order_by: Vec<OrderKey>,
    group_by: Vec<String>,
    having: Vec<Expr>,
    skip: Option<u64>,
    take: Option<u64>,
    distinct: bool,
    includes: Vec<String>,
    max_include_depth: usize,
    windows: Vec<WindowFunction>,
    cases: Vec<(Expr, String)>,
    ctes: Vec<CteDefinition>,
    set_ops: Vec<SetSibling>,
    raw_select: Option<String>,
    raw_from: Option<String>,
    raw_joins: Vec<String>,
    promote_now: Option<TimeDelta>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Default for Query<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> std::fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("predicates", &self.predicates)
            .field("raw_where", &self.raw_where)
            .field("order_by", &self.order_by)
            .field("group_by", &self.group_by)
            .field("having", &self.having)
            .field("skip", &self.skip)
            .field("take", &self.take)
            .field("distinct", &self.distinct)
            .field("includes", &self.includes)
            .field("max_include_depth", &self.max_include_depth)
            .field("windows", &self.windows)
            .field("cases", &self.cases)
            .field("ctes", &self.ctes)
            .field("set_ops_count", &self.set_ops.len())
            .field("raw_select", &self.raw_select)
            .field("raw_from", &self.raw_from)
            .field("raw_joins", &self.raw_joins)
            .field("promote_now", &self.promote_now)
            .finish()
    }
}

impl<T: Entity> Query<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            predicates: Vec::new(),
            raw_where: Vec::new(),
            order_by: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            skip: None,
            take: None,
            distinct: false,
            includes: Vec::new(),
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
            windows: Vec::new(),
            cases: Vec::new(),
            ctes: Vec::new(),
            set_ops: Vec::new(),
            raw_select: None,
            raw_from: None,
            raw_joins: Vec::new(),
            promote_now: None,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Appends a raw WHERE fragment, AND-joined with translated
    /// predicates.
    #[must_use]
    pub fn filter_raw(mut self, fragment: impl Into<String>) -> Self {
        self.raw_where.push(fragment.into());
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(OrderKey {
            column: column.into(),
            direction,
        });
        self
    }

    #[must_use]
    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    /// HAVING is only valid once at least one GROUP BY key exists.
    pub fn having(mut self, predicate: Expr) -> Result<Self> {
        if self.group_by.is_empty() {
            return Err(UsageError::HavingWithoutGroupBy.into());
        }
        self.having.push(predicate);
        Ok(self)
    }

    #[must_use]
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    #[must_use]
    pub fn take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }

    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Requests a navigation include by dotted path (`"Author.Company"`).
    #[must_use]
    pub fn include(mut self, path: impl Into<String>) -> Self {
        self.includes.push(path.into());
        self
    }

    #[must_use]
    pub fn max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    #[must_use]
    pub fn window(mut self, window: WindowFunction) -> Self {
        self.windows.push(window);
        self
    }

    /// Adds a CASE projection with the given alias.
    #[must_use]
    pub fn case_projection(mut self, expr: Expr, alias: impl Into<String>) -> Self {
        self.cases.push((expr, alias.into()));
        self
    }

    #[must_use]
    pub fn with_cte(mut self, cte: CteDefinition) -> Self {
        self.ctes.push(cte);
        self
    }

    #[must_use]
    pub fn union<U: Entity>(self, other: Query<U>) -> Self {
        self.set_op(SetOp::Union, other)
    }

    #[must_use]
    pub fn union_all<U: Entity>(self, other: Query<U>) -> Self {
        self.set_op(SetOp::UnionAll, other)
    }

    #[must_use]
    pub fn intersect<U: Entity>(self, other: Query<U>) -> Self {
        self.set_op(SetOp::Intersect, other)
    }

    #[must_use]
    pub fn except<U: Entity>(self, other: Query<U>) -> Self {
        self.set_op(SetOp::Except, other)
    }

    #[must_use]
    pub fn select_raw(mut self, select: impl Into<String>) -> Self {
        self.raw_select = Some(select.into());
        self
    }

    #[must_use]
    pub fn from_raw(mut self, from: impl Into<String>) -> Self {
        self.raw_from = Some(from.into());
        self
    }

    #[must_use]
    pub fn join_raw(mut self, join: impl Into<String>) -> Self {
        self.raw_joins.push(join.into());
        self
    }

    /// Opt-in: constants within `epsilon` of now translate to the
    /// dialect's current-timestamp intrinsic instead of a parameter.
    #[must_use]
    pub fn promote_now(mut self, epsilon: TimeDelta) -> Self {
        self.promote_now = Some(epsilon);
        self
    }

    fn set_op<U: Entity>(mut self, op: SetOp, other: Query<U>) -> Self {
        // Siblings contribute a single SELECT; their CTEs are lifted into
        // the outermost WITH clause.
        let build: SiblingBuilder = Box::new(move |dialect, offset| {
            let rendered = other.render(dialect, offset)?;
            Ok(SiblingParts {
                sql: rendered.sql,
                params: rendered.params,
                ctes: rendered.ctes,
            })
        });
        self.set_ops.push(SetSibling { op, build });
        self
    }

    /// Renders the final SQL text and parameter list.
    pub fn to_sql(&self, dialect: &dyn Dialect) -> Result<SqlQuery> {
        let rendered = self.render(dialect, 0)?;
        let mut ctes = rendered.ctes;
        let mut params = rendered.params;

        let body = if self.set_ops.is_empty() {
            rendered.sql
        } else {
            let mut combined = format!("({})", rendered.sql);
            for sibling in &self.set_ops {
                if !dialect.supports_set_op(sibling.op) {
                    return Err(UsageError::SetOperationUnsupported {
                        op: sibling.op.keyword(),
                        dialect: dialect.name().to_string(),
                    }
                    .into());
                }
                let parts = (sibling.build)(dialect, params.len())?;
                ctes.extend(parts.ctes);
                write!(combined, " {} ({})", sibling.op.keyword(), parts.sql)
                    .expect("writing to String should not fail");
                params.extend(parts.params);
            }
            combined
        };

        let sql = if ctes.is_empty() {
            body
        } else {
            format!("{} {body}", render_with_clause(dialect, &ctes))
        };

        Ok(SqlQuery {
            sql,
            params,
            plan: rendered.plan,
        })
    }

    fn render(&self, dialect: &dyn Dialect, param_offset: usize) -> Result<Rendered> {
        let descriptor = descriptor_for::<T>()?;
        let plan = if self.includes.is_empty() {
            None
        } else {
            Some(plan_includes(
                Arc::clone(&descriptor),
                &self.includes,
                dialect,
                self.max_include_depth,
            )?)
        };

        if !self.having.is_empty() && self.group_by.is_empty() {
            return Err(UsageError::HavingWithoutGroupBy.into());
        }

        let has_projections = !self.windows.is_empty() || !self.cases.is_empty();
        let aliased = plan.is_some() || has_projections;

        let mut translator = Translator::new(dialect, &descriptor).with_param_offset(param_offset);
        if let Some(plan) = &plan {
            translator = translator.with_plan(plan);
        } else if aliased {
            translator = translator.with_base_alias();
        }
        if let Some(epsilon) = self.promote_now {
            translator = translator.promote_now(epsilon);
        }

        // SELECT section first: CASE projection parameters precede WHERE
        // parameters in placeholder order.
        let select_list = self.select_list(dialect, &plan, &mut translator)?;

        let from = match &self.raw_from {
            Some(raw) => raw.clone(),
            None => {
                let table = dialect.quote_ident(&descriptor.table);
                if aliased {
                    format!("{table} {}", crate::include::BASE_ALIAS)
                } else {
                    table
                }
            }
        };

        let mut joins = plan
            .as_ref()
            .map(|plan| plan.join_clauses.clone())
            .unwrap_or_default();
        for raw_join in &self.raw_joins {
            if !joins.is_empty() {
                joins.push(' ');
            }
            joins.push_str(raw_join);
        }

        let mut where_parts = Vec::new();
        if !self.predicates.is_empty() {
            where_parts.push(translator.conjunction(&self.predicates)?);
        }
        where_parts.extend(self.raw_where.iter().cloned());

        let group_by = self
            .group_by
            .iter()
            .map(|column| self.resolve_key(dialect, &descriptor, column, aliased))
            .collect::<Result<Vec<_>>>()?;

        let having = if self.having.is_empty() {
            None
        } else {
            Some(translator.conjunction(&self.having)?)
        };

        // A collection include demands run-length grouping by base key for
        // the streaming materialiser; inject it when the caller ordered
        // nothing.
        let mut order_keys = self.order_by.clone();
        if order_keys.is_empty()
            && plan.as_ref().is_some_and(|plan| plan.has_collection)
        {
            order_keys.push(OrderKey {
                column: descriptor.primary_key().name.clone(),
                direction: SortDirection::Asc,
            });
        }

        let mut order_by = order_keys
            .iter()
            .map(|key| {
                Ok(format!(
                    "{} {}",
                    self.resolve_key(dialect, &descriptor, &key.column, aliased)?,
                    key.direction.sql()
                ))
            })
            .collect::<Result<Vec<_>>>()?
            .join(", ");

        let pagination = if self.skip.is_some() || self.take.is_some() {
            let skip = self.skip.unwrap_or(0);
            if order_by.is_empty() {
                if skip == 0 && self.take.is_some() {
                    // Take-only TOP-equivalent: placeholder ordering.
                    order_by = "(SELECT NULL)".to_string();
                    Some(dialect.pagination_clause(0, self.take))
                } else {
                    return Err(UsageError::SkipWithoutOrderBy { skip }.into());
                }
            } else {
                Some(dialect.pagination_clause(skip, self.take))
            }
        } else {
            None
        };

        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&select_list);
        write!(sql, " FROM {from}").expect("writing to String should not fail");
        if !joins.is_empty() {
            write!(sql, " {joins}").expect("writing to String should not fail");
        }
        if !where_parts.is_empty() {
            write!(sql, " WHERE {}", where_parts.join(" AND "))
                .expect("writing to String should not fail");
        }
        if !group_by.is_empty() {
            write!(sql, " GROUP BY {}", group_by.join(", "))
                .expect("writing to String should not fail");
        }
        if let Some(having) = having {
            write!(sql, " HAVING {having}").expect("writing to String should not fail");
        }
        if !order_by.is_empty() {
            write!(sql, " ORDER BY {order_by}").expect("writing to String should not fail");
        }
        if let Some(pagination) = pagination {
            write!(sql, " {pagination}").expect("writing to String should not fail");
        }

        Ok(Rendered {
            sql,
            params: translator.into_params(),
            plan,
            ctes: self.ctes.clone(),
        })
    }

    fn select_list(
        &self,
        dialect: &dyn Dialect,
        plan: &Option<JoinPlan>,
        translator: &mut Translator<'_>,
    ) -> Result<String> {
        if let Some(raw) = &self.raw_select {
            return Ok(raw.clone());
        }
        if let Some(plan) = plan {
            return Ok(plan.select_list.clone());
        }
        if !self.windows.is_empty() || !self.cases.is_empty() {
            let mut list = format!("{}.*", crate::include::BASE_ALIAS);
            for window in &self.windows {
                write!(list, ", {}", render_window(dialect, window))
                    .expect("writing to String should not fail");
            }
            for (expr, alias) in &self.cases {
                let rendered = translator.predicate(expr)?;
                write!(list, ", {rendered} AS {}", dialect.quote_ident(alias))
                    .expect("writing to String should not fail");
            }
            return Ok(list);
        }
        if !self.group_by.is_empty() {
            let keys = self
                .group_by
                .iter()
                .map(|column| dialect.quote_ident(column))
                .collect::<Vec<_>>();
            return Ok(keys.join(", "));
        }
        Ok("*".to_string())
    }

    /// Resolves an ORDER BY / GROUP BY key: a mapped base column, or the
    /// alias of a window/CASE projection.
    fn resolve_key(
        &self,
        dialect: &dyn Dialect,
        descriptor: &EntityDescriptor,
        column: &str,
        aliased: bool,
    ) -> Result<String> {
        if descriptor.column(column).is_some() {
            let quoted = dialect.quote_ident(column);
            return Ok(if aliased {
                format!("{}.{quoted}", crate::include::BASE_ALIAS)
            } else {
                quoted
            });
        }
        let is_projection = self.windows.iter().any(|window| window.alias == column)
            || self.cases.iter().any(|(_, alias)| alias.as_str() == column);
        if is_projection {
            return Ok(dialect.quote_ident(column));
        }
        Err(crate::error::TranslationError::UnknownColumn {
            column: column.to_string(),
            table: descriptor.table.clone(),
        }
        .into())
    }

    /// `SELECT COUNT(*)` over the same WHERE fragments.
    pub fn count_sql(&self, dialect: &dyn Dialect) -> Result<SqlQuery> {
        self.aggregate_sql(dialect, "COUNT(*)".to_string())
    }

    pub fn sum_sql(&self, dialect: &dyn Dialect, column: &str) -> Result<SqlQuery> {
        self.scalar_aggregate(dialect, "SUM", column)
    }

    pub fn avg_sql(&self, dialect: &dyn Dialect, column: &str) -> Result<SqlQuery> {
        self.scalar_aggregate(dialect, "AVG", column)
    }

    pub fn min_sql(&self, dialect: &dyn Dialect, column: &str) -> Result<SqlQuery> {
        self.scalar_aggregate(dialect, "MIN", column)
    }

    pub fn max_sql(&self, dialect: &dyn Dialect, column: &str) -> Result<SqlQuery> {
        self.scalar_aggregate(dialect, "MAX", column)
    }

    fn scalar_aggregate(
        &self,
        dialect: &dyn Dialect,
        function: &str,
        column: &str,
    ) -> Result<SqlQuery> {
        let descriptor = descriptor_for::<T>()?;
        let aliased = !self.includes.is_empty();
        let key = self.resolve_key(dialect, &descriptor, column, aliased)?;
        self.aggregate_sql(dialect, format!("{function}({key})"))
    }

    /// Scalar query sharing this query's WHERE fragments, with grouping,
    /// ordering, paging, and projections suppressed.
    fn aggregate_sql(&self, dialect: &dyn Dialect, select: String) -> Result<SqlQuery> {
        let descriptor = descriptor_for::<T>()?;
        let plan = if self.includes.is_empty() {
            None
        } else {
            Some(plan_includes(
                Arc::clone(&descriptor),
                &self.includes,
                dialect,
                self.max_include_depth,
            )?)
        };

        let mut translator = Translator::new(dialect, &descriptor);
        if let Some(plan) = &plan {
            translator = translator.with_plan(plan);
        }
        if let Some(epsilon) = self.promote_now {
            translator = translator.promote_now(epsilon);
        }

        let table = dialect.quote_ident(&descriptor.table);
        let mut sql = match &plan {
            Some(plan) => format!(
                "SELECT {select} FROM {table} {} {}",
                crate::include::BASE_ALIAS,
                plan.join_clauses
            ),
            None => format!("SELECT {select} FROM {table}"),
        };

        let mut where_parts = Vec::new();
        if !self.predicates.is_empty() {
            where_parts.push(translator.conjunction(&self.predicates)?);
        }
        where_parts.extend(self.raw_where.iter().cloned());
        if !where_parts.is_empty() {
            write!(sql, " WHERE {}", where_parts.join(" AND "))
                .expect("writing to String should not fail");
        }

        Ok(SqlQuery {
            sql,
            params: translator.into_params(),
            plan: None,
        })
    }

    /// `DELETE FROM base WHERE …` sharing this query's WHERE fragments.
    pub fn delete_sql(&self, dialect: &dyn Dialect) -> Result<SqlQuery> {
        let descriptor = descriptor_for::<T>()?;
        let mut translator = Translator::new(dialect, &descriptor);
        let table = dialect.quote_ident(&descriptor.table);

        let mut sql = format!("DELETE FROM {table}");
        self.append_where(&mut translator, &mut sql)?;

        Ok(SqlQuery {
            sql,
            params: translator.into_params(),
            plan: None,
        })
    }

    /// `UPDATE base SET … WHERE …` from an update-expression translation.
    pub fn update_sql(&self, dialect: &dyn Dialect, set: &UpdateSet) -> Result<SqlQuery> {
        let descriptor = descriptor_for::<T>()?;
        let mut translator = Translator::new(dialect, &descriptor);
        let table = dialect.quote_ident(&descriptor.table);

        let assignments = translator.update_set(set.assignments())?;
        let mut sql = format!("UPDATE {table} SET {assignments}");
        self.append_where(&mut translator, &mut sql)?;

        Ok(SqlQuery {
            sql,
            params: translator.into_params(),
            plan: None,
        })
    }

    fn append_where(&self, translator: &mut Translator<'_>, sql: &mut String) -> Result<()> {
        let mut where_parts = Vec::new();
        if !self.predicates.is_empty() {
            where_parts.push(translator.conjunction(&self.predicates)?);
        }
        where_parts.extend(self.raw_where.iter().cloned());
        if !where_parts.is_empty() {
            write!(sql, " WHERE {}", where_parts.join(" AND "))
                .expect("writing to String should not fail");
        }
        Ok(())
    }

    pub async fn fetch_all(
        &self,
        exec: &mut dyn Executor,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>> {
        let dialect = exec.dialect();
        let query = self.to_sql(dialect.as_ref())?;
        let rows = exec.query_rows(&query.sql, &query.params, cancel).await?;
        match &query.plan {
            Some(plan) => materialize_graph::<T>(&rows, plan),
            None => materialize_rows::<T>(&rows),
        }
    }

    pub async fn fetch_optional(
        &self,
        exec: &mut dyn Executor,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        let mut entities = self.fetch_all(exec, cancel).await?;
        Ok(if entities.is_empty() {
            None
        } else {
            Some(entities.remove(0))
        })
    }

    pub async fn fetch_one(
        &self,
        exec: &mut dyn Executor,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.fetch_optional(exec, cancel)
            .await?
            .ok_or(Error::Materialize(MaterializeError::NoRows))
    }

    /// Streaming fetch. With a collection include the row stream must be
    /// grouped by base key; the injected ordering guarantees it.
    pub async fn fetch_stream<'e>(
        &self,
        exec: &'e mut dyn Executor,
        cancel: &CancellationToken,
    ) -> Result<EntityStream<'e, T>> {
        let dialect = exec.dialect();
        let query = self.to_sql(dialect.as_ref())?;
        let shape = query.plan.as_ref().map(GraphShape::from_plan);
        let rows = exec.query_stream(&query.sql, &query.params, cancel).await?;
        Ok(match shape {
            Some(shape) => materialize_graph_stream::<T>(rows, shape),
            None => materialize_stream::<T>(rows),
        })
    }

    pub async fn count(&self, exec: &mut dyn Executor, cancel: &CancellationToken) -> Result<i64> {
        let value = self.scalar(exec, cancel, |dialect| self.count_sql(dialect)).await?;
        Ok(value.to_i64().unwrap_or(0))
    }

    pub async fn sum(
        &self,
        exec: &mut dyn Executor,
        column: &str,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.scalar(exec, cancel, |dialect| self.sum_sql(dialect, column))
            .await
    }

    pub async fn avg(
        &self,
        exec: &mut dyn Executor,
        column: &str,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.scalar(exec, cancel, |dialect| self.avg_sql(dialect, column))
            .await
    }

    pub async fn min(
        &self,
        exec: &mut dyn Executor,
        column: &str,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.scalar(exec, cancel, |dialect| self.min_sql(dialect, column))
            .await
    }

    pub async fn max(
        &self,
        exec: &mut dyn Executor,
        column: &str,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.scalar(exec, cancel, |dialect| self.max_sql(dialect, column))
            .await
    }

    async fn scalar<F>(
        &self,
        exec: &mut dyn Executor,
        cancel: &CancellationToken,
        build: F,
    ) -> Result<Value>
    where
        F: Fn(&dyn Dialect) -> Result<SqlQuery>,
    {
        let dialect = exec.dialect();
        let query = build(dialect.as_ref())?;
        let rows = exec.query_rows(&query.sql, &query.params, cancel).await?;
        Ok(rows
            .first()
            .and_then(|row| row.values().first().cloned())
            .unwrap_or(Value::Null))
    }

    pub async fn delete(&self, exec: &mut dyn Executor, cancel: &CancellationToken) -> Result<u64> {
        let dialect = exec.dialect();
        let query = self.delete_sql(dialect.as_ref())?;
        exec.execute(&query.sql, &query.params, cancel).await
    }

    pub async fn update_many(
        &self,
        exec: &mut dyn Executor,
        set: &UpdateSet,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let dialect = exec.dialect();
        let query = self.update_sql(dialect.as_ref(), set)?;
        exec.execute(&query.sql, &query.params, cancel).await
    }
}

fn render_with_clause(dialect: &dyn Dialect, ctes: &[CteDefinition]) -> String {
    let recursive = ctes.iter().any(|cte| cte.recursive.is_some());
    let mut clause = String::from("WITH ");
    if recursive && dialect.recursive_cte_requires_keyword() {
        clause.push_str("RECURSIVE ");
    }

    let definitions = ctes
        .iter()
        .map(|cte| {
            let name = dialect.quote_ident(&cte.name);
            let columns = if cte.columns.is_empty() {
                String::new()
            } else {
                let quoted = cte
                    .columns
                    .iter()
                    .map(|column| dialect.quote_ident(column))
                    .collect::<Vec<_>>();
                format!(" ({})", quoted.join(", "))
            };
            let body = match &cte.recursive {
                Some(recursive) => format!("{} UNION ALL {}", cte.anchor, recursive),
                None => cte.anchor.clone(),
            };
            format!("{name}{columns} AS ({body})")
        })
        .collect::<Vec<_>>();
    clause.push_str(&definitions.join(", "));
    clause
}

fn render_window(dialect: &dyn Dialect, window: &WindowFunction) -> String {
    let arg = match &window.arg {
        WindowArg::NoArg => String::new(),
        WindowArg::Star => "*".to_string(),
        WindowArg::Column(column) => dialect.quote_ident(column),
    };

    let mut over = Vec::new();
    if !window.partition_by.is_empty() {
        let columns = window
            .partition_by
            .iter()
            .map(|column| dialect.quote_ident(column))
            .collect::<Vec<_>>();
        over.push(format!("PARTITION BY {}", columns.join(", ")));
    }
    if !window.order_by.is_empty() {
        let keys = window
            .order_by
            .iter()
            .map(|key| {
                format!(
                    "{} {}",
                    dialect.quote_ident(&key.column),
                    key.direction.sql()
                )
            })
            .collect::<Vec<_>>();
        over.push(format!("ORDER BY {}", keys.join(", ")));
    }
    if let Some(frame) = &window.frame {
        over.push(frame.clone());
    }

    format!(
        "{}({arg}) OVER ({}) AS {}",
        window.function,
        over.join(" "),
        dialect.quote_ident(&window.alias)
    )
}

/// `INSERT` for one entity; auto-increment columns are skipped.
pub fn insert_sql<T: Entity>(dialect: &dyn Dialect, entity: &T) -> Result<SqlQuery> {
    let descriptor = descriptor_for::<T>()?;
    let mut columns = Vec::new();
    let mut placeholders = Vec::new();
    let mut params = Vec::new();

    for column in &descriptor.columns {
        if column.flags.auto_increment {
            continue;
        }
        let value = column.get(entity)?;
        let wire = to_wire(&value, column.value_type, column.flags.string_preferred)?;
        columns.push(dialect.quote_ident(&column.name));
        placeholders.push(dialect.placeholder(params.len()));
        params.push(wire);
    }

    let table = dialect.quote_ident(&descriptor.table);
    Ok(SqlQuery {
        sql: format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        ),
        params,
        plan: None,
    })
}

/// Multi-row `INSERT` for a homogeneous batch.
pub fn insert_many_sql<T: Entity>(dialect: &dyn Dialect, entities: &[T]) -> Result<SqlQuery> {
    let descriptor = descriptor_for::<T>()?;
    let insertable: Vec<_> = descriptor
        .columns
        .iter()
        .filter(|column| !column.flags.auto_increment)
        .collect();

    let mut params = Vec::new();
    let mut rows = Vec::with_capacity(entities.len());
    for entity in entities {
        let mut placeholders = Vec::with_capacity(insertable.len());
        for column in &insertable {
            let value = column.get(entity)?;
            let wire = to_wire(&value, column.value_type, column.flags.string_preferred)?;
            placeholders.push(dialect.placeholder(params.len()));
            params.push(wire);
        }
        rows.push(format!("({})", placeholders.join(", ")));
    }

    let columns = insertable
        .iter()
        .map(|column| dialect.quote_ident(&column.name))
        .collect::<Vec<_>>();
    let table = dialect.quote_ident(&descriptor.table);
    Ok(SqlQuery {
        sql: format!(
            "INSERT INTO {table} ({}) VALUES {}",
            columns.join(", "),
            rows.join(", ")
        ),
        params,
        plan: None,
    })
}

pub async fn insert<T: Entity>(
    exec: &mut dyn Executor,
    entity: &T,
    cancel: &CancellationToken,
) -> Result<u64> {
    let dialect = exec.dialect();
    let query = insert_sql(dialect.as_ref(), entity)?;
    exec.execute(&query.sql, &query.params, cancel).await
}

pub async fn insert_many<T: Entity>(
    exec: &mut dyn Executor,
    entities: &[T],
    cancel: &CancellationToken,
) -> Result<u64> {
    if entities.is_empty() {
        return Ok(0);
    }
    let dialect = exec.dialect();
    let query = insert_many_sql(dialect.as_ref(), entities)?;
    exec.execute(&query.sql, &query.params, cancel).await
}
