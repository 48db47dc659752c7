//! Expression translation: predicate trees become dialect SQL fragments
//! plus an ordered parameter list.
//!
//! Two modes exist. Parameterised mode (the default for execution) collects
//! every constant into the parameter list and emits placeholders; embed
//! mode inlines formatted literals and is kept for diagnostics and raw SQL
//! composition.

use std::collections::HashMap;

use chrono::{TimeDelta, Utc};

use crate::dialect::{DatePart, DateUnit, Dialect};
use crate::entity::EntityDescriptor;
use crate::error::{Error, Result, TranslationError};
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::include::{BASE_ALIAS, JoinPlan};
use crate::sanitize::{format_value, sanitize_string};
use crate::value::{Value, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateMode {
    Parameterize,
    Embed,
}

/// A rendered SQL fragment with its parameters in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Clone, Copy)]
struct ParentOp {
    precedence: u8,
    associative: bool,
    child_is_right: bool,
}

pub struct Translator<'a> {
    dialect: &'a dyn Dialect,
    descriptor: &'a EntityDescriptor,
    plan: Option<&'a JoinPlan>,
    base_alias: Option<&'a str>,
    mode: TranslateMode,
    promote_now: Option<TimeDelta>,
    qualify_members: bool,
    param_offset: usize,
    params: Vec<Value>,
    folded: HashMap<usize, Value>,
}

impl<'a> Translator<'a> {
    #[must_use]
    pub fn new(dialect: &'a dyn Dialect, descriptor: &'a EntityDescriptor) -> Self {
        Self {
            dialect,
            descriptor,
            plan: None,
            base_alias: None,
            mode: TranslateMode::Parameterize,
            promote_now: None,
            qualify_members: true,
            param_offset: 0,
            params: Vec::new(),
            folded: HashMap::new(),
        }
    }

    /// Starts placeholder numbering at `offset`; used when fragments from
    /// several translations combine into one statement (set operations).
    #[must_use]
    pub fn with_param_offset(mut self, offset: usize) -> Self {
        self.param_offset = offset;
        self
    }

    /// Routes multi-hop members through the join plan and qualifies base
    /// columns with the base alias.
    #[must_use]
    pub fn with_plan(mut self, plan: &'a JoinPlan) -> Self {
        self.plan = Some(plan);
        self.base_alias = Some(BASE_ALIAS);
        self
    }

    /// Qualifies base columns even without includes (used when the query is
    /// aliased for window or CASE projections).
    #[must_use]
    pub fn with_base_alias(mut self) -> Self {
        self.base_alias = Some(BASE_ALIAS);
        self
    }

    #[must_use]
    pub fn embed(mut self) -> Self {
        self.mode = TranslateMode::Embed;
        self
    }

    /// Opt-in promotion of constants within `epsilon` of the current time
    /// to the dialect's current-timestamp intrinsic.
    #[must_use]
    pub fn promote_now(mut self, epsilon: TimeDelta) -> Self {
        self.promote_now = Some(epsilon);
        self
    }

    #[must_use]
    pub fn into_params(self) -> Vec<Value> {
        self.params
    }

    /// Translates one expression into a finished fragment, consuming the
    /// translator.
    pub fn translate(mut self, expr: &Expr) -> Result<SqlFragment> {
        let sql = self.predicate(expr)?;
        Ok(SqlFragment {
            sql,
            params: self.params,
        })
    }

    /// Translates a single predicate with no surrounding context.
    pub fn predicate(&mut self, expr: &Expr) -> Result<String> {
        self.emit(expr, None)
    }

    /// Joins predicates with AND, parenthesising looser children.
    pub fn conjunction(&mut self, exprs: &[Expr]) -> Result<String> {
        let parent = ParentOp {
            precedence: BinaryOp::And.precedence(),
            associative: true,
            child_is_right: false,
        };
        let fragments = exprs
            .iter()
            .map(|expr| self.emit(expr, Some(parent)))
            .collect::<Result<Vec<_>>>()?;
        Ok(fragments.join(" AND "))
    }

    /// Update sub-mode: renders `SET col = expr, …` with same-table member
    /// references resolving to bare column names.
    pub fn update_set(&mut self, assignments: &[(String, Expr)]) -> Result<String> {
        self.qualify_members = false;
        let result = assignments
            .iter()
            .map(|(column, expr)| {
                let target = self.resolve_base_column(column)?;
                let value = self.emit(expr, None)?;
                Ok(format!("{target} = {value}"))
            })
            .collect::<Result<Vec<_>>>()
            .map(|clauses| clauses.join(", "));
        self.qualify_members = true;
        result
    }

    fn emit(&mut self, expr: &Expr, parent: Option<ParentOp>) -> Result<String> {
        match expr {
            Expr::Member { path } => self.member_sql(path),
            Expr::Constant(value) => self.constant_sql(value),
            Expr::Deferred(thunk) => {
                let value = self.fold(thunk);
                self.constant_sql(&value)
            }
            Expr::Binary { op, left, right } => self.binary_sql(*op, left, right, parent),
            Expr::Unary { op, operand } => self.unary_sql(*op, operand),
            Expr::Conditional {
                test,
                then_value,
                else_value,
            } => {
                let test = self.emit(test, None)?;
                let then_value = self.emit(then_value, None)?;
                let else_value = self.emit(else_value, None)?;
                Ok(format!(
                    "CASE WHEN {test} THEN {then_value} ELSE {else_value} END"
                ))
            }
            Expr::NewArray(elements) => {
                let rendered = elements
                    .iter()
                    .map(|element| self.emit(element, None))
                    .collect::<Result<Vec<_>>>()?;
                Ok(rendered.join(", "))
            }
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => self.method_sql(receiver.as_deref(), method, args),
            Expr::Raw(sql) => Ok(sql.clone()),
        }
    }

    fn binary_sql(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        parent: Option<ParentOp>,
    ) -> Result<String> {
        if op == BinaryOp::Coalesce {
            let left = self.emit(left, None)?;
            let right = self.emit(right, None)?;
            return Ok(format!("COALESCE({left}, {right})"));
        }

        // x = NULL and x != NULL rewrite to IS [NOT] NULL.
        if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
            let null_test = if self.is_null_operand(right) {
                Some(left)
            } else if self.is_null_operand(left) {
                Some(right)
            } else {
                None
            };
            if let Some(operand) = null_test {
                let operand = self.emit(operand, None)?;
                let test = if op == BinaryOp::Eq {
                    "IS NULL"
                } else {
                    "IS NOT NULL"
                };
                return Ok(format!("{operand} {test}"));
            }
        }

        let precedence = op.precedence();
        let associative = op.is_associative();
        let left_sql = self.emit(
            left,
            Some(ParentOp {
                precedence,
                associative,
                child_is_right: false,
            }),
        )?;
        let right_sql = self.emit(
            right,
            Some(ParentOp {
                precedence,
                associative,
                child_is_right: true,
            }),
        )?;

        let symbol = if op == BinaryOp::Add && self.is_string_typed(left) {
            self.dialect.concat_operator()
        } else {
            binary_symbol(op)
        };

        let rendered = format!("{left_sql} {symbol} {right_sql}");
        Ok(self.parenthesize(rendered, precedence, parent))
    }

    fn parenthesize(&self, rendered: String, precedence: u8, parent: Option<ParentOp>) -> String {
        let Some(parent) = parent else {
            return rendered;
        };
        let needs_parens = precedence < parent.precedence
            || (precedence == parent.precedence && parent.child_is_right && !parent.associative);
        if needs_parens {
            format!("({rendered})")
        } else {
            rendered
        }
    }

    fn unary_sql(&mut self, op: UnaryOp, operand: &Expr) -> Result<String> {
        let wrapped = matches!(operand, Expr::Binary { .. });
        let inner = self.emit(operand, None)?;
        let inner = if wrapped { format!("({inner})") } else { inner };
        Ok(match op {
            UnaryOp::Not => format!("NOT {inner}"),
            UnaryOp::Neg => format!("-{inner}"),
        })
    }

    fn method_sql(
        &mut self,
        receiver: Option<&Expr>,
        method: &str,
        args: &[Expr],
    ) -> Result<String> {
        match method {
            "Contains" => self.contains_sql(receiver, args),
            "StartsWith" => self.like_sql(receiver, args, method, false, true),
            "EndsWith" => self.like_sql(receiver, args, method, true, false),
            "ToUpper" => {
                let receiver = self.required_receiver(receiver, method)?;
                Ok(format!("UPPER({receiver})"))
            }
            "ToLower" => {
                let receiver = self.required_receiver(receiver, method)?;
                Ok(format!("LOWER({receiver})"))
            }
            "Trim" => {
                let receiver = self.required_receiver(receiver, method)?;
                Ok(format!("LTRIM(RTRIM({receiver}))"))
            }
            "Substring" => self.substring_sql(receiver, args),
            "Replace" => {
                let receiver = self.required_receiver(receiver, method)?;
                let [from, to] = self.exact_args::<2>(args, method)?;
                Ok(format!("REPLACE({receiver}, {from}, {to})"))
            }
            "Concat" => {
                let receiver = self.required_receiver(receiver, method)?;
                let mut parts = vec![receiver];
                for arg in args {
                    parts.push(self.emit(arg, None)?);
                }
                Ok(parts.join(&format!(" {} ", self.dialect.concat_operator())))
            }
            "Length" => {
                let receiver = self.required_receiver(receiver, method)?;
                Ok(format!("{}({receiver})", self.dialect.length_function()))
            }
            "AddYears" => self.date_add_sql(receiver, args, method, DateUnit::Year),
            "AddMonths" => self.date_add_sql(receiver, args, method, DateUnit::Month),
            "AddDays" => self.date_add_sql(receiver, args, method, DateUnit::Day),
            "AddHours" => self.date_add_sql(receiver, args, method, DateUnit::Hour),
            "AddMinutes" => self.date_add_sql(receiver, args, method, DateUnit::Minute),
            "AddSeconds" => self.date_add_sql(receiver, args, method, DateUnit::Second),
            "Year" => self.date_part_sql(receiver, method, DatePart::Year),
            "Month" => self.date_part_sql(receiver, method, DatePart::Month),
            "Day" => self.date_part_sql(receiver, method, DatePart::Day),
            "Hour" => self.date_part_sql(receiver, method, DatePart::Hour),
            "Minute" => self.date_part_sql(receiver, method, DatePart::Minute),
            "Second" => self.date_part_sql(receiver, method, DatePart::Second),
            "Now" => self.intrinsic_sql(receiver, method, self.dialect.current_timestamp()),
            "UtcNow" => self.intrinsic_sql(receiver, method, self.dialect.current_utc_timestamp()),
            "Today" => self.intrinsic_sql(receiver, method, self.dialect.current_date()),
            "Abs" | "Floor" | "Sqrt" | "Sin" | "Cos" | "Tan" => {
                let receiver = self.required_receiver(receiver, method)?;
                Ok(format!("{}({receiver})", method.to_ascii_uppercase()))
            }
            "Ceiling" => {
                let receiver = self.required_receiver(receiver, method)?;
                Ok(format!("CEILING({receiver})"))
            }
            "Round" => {
                let receiver = self.required_receiver(receiver, method)?;
                let digits = match args {
                    [] => "0".to_string(),
                    [digits] => self.emit(digits, None)?,
                    _ => return Err(shape_error(method, "expected at most one argument")),
                };
                Ok(format!("ROUND({receiver}, {digits})"))
            }
            "Between" => {
                let [value, low, high] = self.exact_args::<3>(args, method)?;
                Ok(format!("{value} BETWEEN {low} AND {high}"))
            }
            "Count" => {
                if receiver.is_some() || !args.is_empty() {
                    return Err(shape_error(method, "expected no receiver and no arguments"));
                }
                Ok("COUNT(*)".to_string())
            }
            "Sum" | "Avg" | "Min" | "Max" => {
                let [operand] = self.exact_args::<1>(args, method)?;
                Ok(format!("{}({operand})", method.to_ascii_uppercase()))
            }
            other => Err(TranslationError::UnsupportedMethod {
                method: other.to_string(),
            }
            .into()),
        }
    }

    fn contains_sql(&mut self, receiver: Option<&Expr>, args: &[Expr]) -> Result<String> {
        let Some(receiver) = receiver else {
            return Err(shape_error("Contains", "expected a receiver"));
        };

        // collection.Contains(item) folds the collection to an IN list.
        match receiver {
            Expr::NewArray(elements) => {
                let [item] = self.exact_args::<1>(args, "Contains")?;
                if elements.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                let rendered = elements
                    .iter()
                    .map(|element| self.emit(element, None))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(format!("{item} IN ({})", rendered.join(",")));
            }
            Expr::Deferred(thunk) => {
                if let Value::Json(serde_json::Value::Array(items)) = self.fold(thunk) {
                    let [item] = self.exact_args::<1>(args, "Contains")?;
                    if items.is_empty() {
                        return Ok("1 = 0".to_string());
                    }
                    let rendered = items
                        .iter()
                        .map(|item| self.constant_sql(&json_scalar(item)))
                        .collect::<Result<Vec<_>>>()?;
                    return Ok(format!("{item} IN ({})", rendered.join(",")));
                }
            }
            _ => {}
        }

        self.like_sql(Some(receiver), args, "Contains", true, true)
    }

    fn like_sql(
        &mut self,
        receiver: Option<&Expr>,
        args: &[Expr],
        method: &str,
        leading_wildcard: bool,
        trailing_wildcard: bool,
    ) -> Result<String> {
        let receiver = self.required_receiver(receiver, method)?;
        let needle = match args {
            [arg] => self.fold_to_constant(arg).ok_or_else(|| {
                shape_error(method, "pattern argument must fold to a constant")
            })?,
            _ => return Err(shape_error(method, "expected exactly one argument")),
        };
        let Value::String(raw) = needle else {
            return Err(shape_error(method, "pattern argument must be a string"));
        };
        let escaped = self.dialect.escape_like_fragment(&raw);

        match self.mode {
            TranslateMode::Embed => {
                let mut pattern = String::new();
                if leading_wildcard {
                    pattern.push('%');
                }
                pattern.push_str(&escaped);
                if trailing_wildcard {
                    pattern.push('%');
                }
                let literal = sanitize_string(self.dialect, &pattern)?;
                Ok(format!("{receiver} LIKE {literal}"))
            }
            TranslateMode::Parameterize => {
                let placeholder = self.push_param(Value::String(escaped));
                let concat = self.dialect.concat_operator();
                let mut pattern = String::new();
                if leading_wildcard {
                    pattern.push_str(&format!("'%' {concat} "));
                }
                pattern.push_str(&placeholder);
                if trailing_wildcard {
                    pattern.push_str(&format!(" {concat} '%'"));
                }
                Ok(format!("{receiver} LIKE {pattern}"))
            }
        }
    }

    fn substring_sql(&mut self, receiver: Option<&Expr>, args: &[Expr]) -> Result<String> {
        let receiver = self.required_receiver(receiver, "Substring")?;
        match args {
            [start] => {
                let start = self.emit(start, None)?;
                let length = format!("{}({receiver})", self.dialect.length_function());
                Ok(format!("SUBSTRING({receiver}, {start} + 1, {length})"))
            }
            [start, length] => {
                let start = self.emit(start, None)?;
                let length = self.emit(length, None)?;
                Ok(format!("SUBSTRING({receiver}, {start} + 1, {length})"))
            }
            _ => Err(shape_error("Substring", "expected one or two arguments")),
        }
    }

    fn date_add_sql(
        &mut self,
        receiver: Option<&Expr>,
        args: &[Expr],
        method: &str,
        unit: DateUnit,
    ) -> Result<String> {
        let receiver = self.required_receiver(receiver, method)?;
        let [amount] = self.exact_args::<1>(args, method)?;
        Ok(self.dialect.date_add(unit, &amount, &receiver))
    }

    fn date_part_sql(
        &mut self,
        receiver: Option<&Expr>,
        method: &str,
        part: DatePart,
    ) -> Result<String> {
        let receiver = self.required_receiver(receiver, method)?;
        Ok(self.dialect.date_part(part, &receiver))
    }

    fn intrinsic_sql(
        &mut self,
        receiver: Option<&Expr>,
        method: &str,
        rendered: &str,
    ) -> Result<String> {
        if receiver.is_some() {
            return Err(shape_error(method, "expected no receiver"));
        }
        Ok(rendered.to_string())
    }

    fn required_receiver(&mut self, receiver: Option<&Expr>, method: &str) -> Result<String> {
        let Some(receiver) = receiver else {
            return Err(shape_error(method, "expected a receiver"));
        };
        self.emit(receiver, None)
    }

    fn exact_args<const N: usize>(&mut self, args: &[Expr], method: &str) -> Result<[String; N]> {
        if args.len() != N {
            return Err(shape_error(method, "unexpected argument count"));
        }
        let mut rendered = Vec::with_capacity(N);
        for arg in args {
            rendered.push(self.emit(arg, None)?);
        }
        Ok(rendered
            .try_into()
            .expect("argument count was checked above"))
    }

    fn member_sql(&mut self, path: &[String]) -> Result<String> {
        match path {
            [] => Err(TranslationError::UnsupportedNode { node: "Member" }.into()),
            [column] => self.resolve_member_column(column),
            _ => {
                // A `.Length` terminal maps to the length function over the
                // preceding member.
                if path.last().map(String::as_str) == Some("Length") {
                    let inner = self.member_sql(&path[..path.len() - 1])?;
                    return Ok(format!("{}({inner})", self.dialect.length_function()));
                }

                let (column, navigations) =
                    path.split_last().expect("member path has two segments");
                let Some(plan) = self.plan else {
                    return Err(TranslationError::NavigationNotJoined {
                        path: path.join("."),
                    }
                    .into());
                };
                let Some(node) = plan.node_for_path(navigations) else {
                    return Err(TranslationError::NavigationNotJoined {
                        path: path.join("."),
                    }
                    .into());
                };
                if node.descriptor.column(column).is_none() {
                    return Err(TranslationError::UnknownColumn {
                        column: column.clone(),
                        table: node.descriptor.table.clone(),
                    }
                    .into());
                }
                Ok(format!(
                    "{}.{}",
                    node.alias,
                    self.dialect.quote_ident(column)
                ))
            }
        }
    }

    fn resolve_member_column(&self, column: &str) -> Result<String> {
        let quoted = self.resolve_base_column(column)?;
        match self.base_alias {
            Some(alias) if self.qualify_members => Ok(format!("{alias}.{quoted}")),
            _ => Ok(quoted),
        }
    }

    fn resolve_base_column(&self, column: &str) -> Result<String> {
        if self.descriptor.column(column).is_none() {
            return Err(TranslationError::UnknownColumn {
                column: column.to_string(),
                table: self.descriptor.table.clone(),
            }
            .into());
        }
        Ok(self.dialect.quote_ident(column))
    }

    fn constant_sql(&mut self, value: &Value) -> Result<String> {
        if let Some(promoted) = self.promoted_intrinsic(value) {
            return Ok(promoted.to_string());
        }

        match self.mode {
            TranslateMode::Parameterize => Ok(self.push_param(value.clone())),
            TranslateMode::Embed => Ok(format_value(self.dialect, value)?),
        }
    }

    fn promoted_intrinsic(&self, value: &Value) -> Option<&'static str> {
        let epsilon = self.promote_now?;
        let now = Utc::now().naive_utc();
        let close = match value {
            Value::DateTime(ts) => (*ts - now).abs() <= epsilon,
            Value::DateTimeOffset(ts) => (ts.naive_utc() - now).abs() <= epsilon,
            _ => false,
        };
        close.then(|| self.dialect.current_timestamp())
    }

    fn push_param(&mut self, value: Value) -> String {
        let placeholder = self
            .dialect
            .placeholder(self.param_offset + self.params.len());
        self.params.push(value);
        placeholder
    }

    fn fold(&mut self, thunk: &crate::expr::Thunk) -> Value {
        self.folded
            .entry(thunk.key())
            .or_insert_with(|| thunk.evaluate())
            .clone()
    }

    fn fold_to_constant(&mut self, expr: &Expr) -> Option<Value> {
        match expr {
            Expr::Constant(value) => Some(value.clone()),
            Expr::Deferred(thunk) => Some(self.fold(thunk)),
            _ => None,
        }
    }

    fn is_null_operand(&mut self, expr: &Expr) -> bool {
        matches!(self.fold_to_constant(expr), Some(Value::Null))
    }

    fn is_string_typed(&self, expr: &Expr) -> bool {
        self.infer_type(expr) == Some(ValueType::String)
    }

    fn infer_type(&self, expr: &Expr) -> Option<ValueType> {
        match expr {
            Expr::Member { path } => self.member_type(path),
            Expr::Constant(value) => value.value_type(),
            Expr::Deferred(_) => None,
            Expr::Binary { op, left, right } => match op {
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                    self.infer_type(left).or_else(|| self.infer_type(right))
                }
                BinaryOp::Coalesce => self.infer_type(left),
                _ => Some(ValueType::Bool),
            },
            Expr::Unary { operand, .. } => self.infer_type(operand),
            Expr::Conditional { then_value, .. } => self.infer_type(then_value),
            Expr::MethodCall {
                receiver, method, ..
            } => match method.as_str() {
                "ToUpper" | "ToLower" | "Trim" | "Substring" | "Replace" | "Concat" => {
                    Some(ValueType::String)
                }
                "Length" | "Year" | "Month" | "Day" | "Hour" | "Minute" | "Second" | "Count" => {
                    Some(ValueType::Int32)
                }
                "Now" | "UtcNow" => Some(ValueType::DateTime),
                "Today" => Some(ValueType::Date),
                "Abs" | "Floor" | "Ceiling" | "Round" | "Sqrt" | "Sin" | "Cos" | "Tan" => receiver
                    .as_deref()
                    .and_then(|receiver| self.infer_type(receiver)),
                _ => None,
            },
            Expr::NewArray(_) | Expr::Raw(_) => None,
        }
    }

    fn member_type(&self, path: &[String]) -> Option<ValueType> {
        match path {
            [column] => self
                .descriptor
                .column(column)
                .map(|descriptor| descriptor.value_type),
            [navigations @ .., column] => {
                if column.as_str() == "Length" {
                    return Some(ValueType::Int32);
                }
                let node = self.plan?.node_for_path(navigations)?;
                node.descriptor
                    .column(column)
                    .map(|descriptor| descriptor.value_type)
            }
            [] => None,
        }
    }
}

fn shape_error(method: &str, reason: &str) -> Error {
    TranslationError::MethodShape {
        method: method.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Or => "OR",
        BinaryOp::And => "AND",
        BinaryOp::Eq => "=",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Coalesce => "COALESCE",
    }
}

fn json_scalar(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(value) => Value::Bool(*value),
        serde_json::Value::Number(value) => {
            if let Some(int) = value.as_i64() {
                if let Ok(int32) = i32::try_from(int) {
                    Value::Int32(int32)
                } else {
                    Value::Int64(int)
                }
            } else {
                Value::Float64(value.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(value) => Value::String(value.clone()),
        other => Value::Json(other.clone()),
    }
}
