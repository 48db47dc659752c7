//! Typed predicate/projection trees.
//!
//! [`Expr`] is a sum type: translation dispatches on the tag and a new node
//! kind is a compile-time exhaustiveness failure in the translator. Trees
//! are built with the free functions and combinators below and stay
//! immutable afterwards.

use std::fmt;
use std::sync::Arc;

use crate::value::Value;

/// A deferred value: the Rust-side stand-in for a free variable captured
/// from an outer scope. Evaluated (folded to a constant) at translation
/// time.
#[derive(Clone)]
pub struct Thunk(Arc<dyn Fn() -> Value + Send + Sync>);

impl Thunk {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    #[must_use]
    pub fn evaluate(&self) -> Value {
        (self.0)()
    }

    /// Identity of the underlying closure, for fold memoisation.
    #[must_use]
    pub fn key(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl fmt::Debug for Thunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Thunk(..)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Coalesce,
}

impl BinaryOp {
    /// Binding strength; higher binds tighter. [`BinaryOp::Coalesce`] is
    /// emitted in function form and never participates.
    #[must_use]
    pub fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge => 3,
            Self::Add | Self::Sub => 4,
            Self::Mul | Self::Div | Self::Mod => 5,
            Self::Coalesce => 6,
        }
    }

    /// Whether `a op (b op c)` equals `(a op b) op c`; parenthesisation of
    /// an equal-precedence right operand is skipped only when it does.
    #[must_use]
    pub fn is_associative(self) -> bool {
        matches!(
            self,
            Self::Or | Self::And | Self::Add | Self::Mul | Self::Eq | Self::Ne
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone)]
pub enum Expr {
    /// Field access rooted at the query parameter: one segment per hop,
    /// navigations first, a mapped column last.
    Member { path: Vec<String> },
    Constant(Value),
    /// Folded free variable; becomes a constant or parameter at
    /// translation time.
    Deferred(Thunk),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        then_value: Box<Expr>,
        else_value: Box<Expr>,
    },
    NewArray(Vec<Expr>),
    MethodCall {
        receiver: Option<Box<Expr>>,
        method: String,
        args: Vec<Expr>,
    },
    /// Raw SQL fragment, spliced verbatim.
    Raw(String),
}

/// Single-hop member access on the query's entity parameter.
#[must_use]
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Member {
        path: vec![name.into()],
    }
}

/// Multi-hop member access: navigation names first, a column name last.
#[must_use]
pub fn path<I, S>(segments: I) -> Expr
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Expr::Member {
        path: segments.into_iter().map(Into::into).collect(),
    }
}

#[must_use]
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Constant(value.into())
}

#[must_use]
pub fn deferred<F>(f: F) -> Expr
where
    F: Fn() -> Value + Send + Sync + 'static,
{
    Expr::Deferred(Thunk::new(f))
}

#[must_use]
pub fn raw(sql: impl Into<String>) -> Expr {
    Expr::Raw(sql.into())
}

#[must_use]
pub fn now() -> Expr {
    intrinsic("Now")
}

#[must_use]
pub fn utc_now() -> Expr {
    intrinsic("UtcNow")
}

#[must_use]
pub fn today() -> Expr {
    intrinsic("Today")
}

/// `x BETWEEN lo AND hi`.
#[must_use]
pub fn between(value: Expr, low: impl Into<Expr>, high: impl Into<Expr>) -> Expr {
    Expr::MethodCall {
        receiver: None,
        method: "Between".to_string(),
        args: vec![value, low.into(), high.into()],
    }
}

/// `CASE WHEN test THEN a ELSE b END`.
#[must_use]
pub fn when(test: Expr, then_value: impl Into<Expr>, else_value: impl Into<Expr>) -> Expr {
    Expr::Conditional {
        test: Box::new(test),
        then_value: Box::new(then_value.into()),
        else_value: Box::new(else_value.into()),
    }
}

/// `COUNT(*)`, for HAVING predicates.
#[must_use]
pub fn count_all() -> Expr {
    intrinsic("Count")
}

#[must_use]
pub fn sum_of(operand: Expr) -> Expr {
    aggregate("Sum", operand)
}

#[must_use]
pub fn avg_of(operand: Expr) -> Expr {
    aggregate("Avg", operand)
}

#[must_use]
pub fn min_of(operand: Expr) -> Expr {
    aggregate("Min", operand)
}

#[must_use]
pub fn max_of(operand: Expr) -> Expr {
    aggregate("Max", operand)
}

fn intrinsic(method: &str) -> Expr {
    Expr::MethodCall {
        receiver: None,
        method: method.to_string(),
        args: Vec::new(),
    }
}

fn aggregate(method: &str, operand: Expr) -> Expr {
    Expr::MethodCall {
        receiver: None,
        method: method.to_string(),
        args: vec![operand],
    }
}

impl Expr {
    fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Self {
        Self::Binary {
            op,
            left: Box::new(self),
            right: Box::new(other.into()),
        }
    }

    fn method(self, name: &str, args: Vec<Expr>) -> Self {
        Self::MethodCall {
            receiver: Some(Box::new(self)),
            method: name.to_string(),
            args,
        }
    }

    #[must_use]
    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    #[must_use]
    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, other)
    }

    #[must_use]
    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    #[must_use]
    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    #[must_use]
    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    #[must_use]
    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    #[must_use]
    pub fn and(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::And, other)
    }

    #[must_use]
    pub fn or(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    #[must_use]
    pub fn add(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Add, other)
    }

    #[must_use]
    pub fn sub(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Sub, other)
    }

    #[must_use]
    pub fn mul(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Mul, other)
    }

    #[must_use]
    pub fn div(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Div, other)
    }

    #[must_use]
    pub fn rem(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Mod, other)
    }

    #[must_use]
    pub fn coalesce(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Coalesce, other)
    }

    #[must_use]
    pub fn not(self) -> Self {
        Self::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    #[must_use]
    pub fn neg(self) -> Self {
        Self::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(self),
        }
    }

    #[must_use]
    pub fn contains(self, fragment: impl Into<Expr>) -> Self {
        self.method("Contains", vec![fragment.into()])
    }

    #[must_use]
    pub fn starts_with(self, prefix: impl Into<Expr>) -> Self {
        self.method("StartsWith", vec![prefix.into()])
    }

    #[must_use]
    pub fn ends_with(self, suffix: impl Into<Expr>) -> Self {
        self.method("EndsWith", vec![suffix.into()])
    }

    #[must_use]
    pub fn to_upper(self) -> Self {
        self.method("ToUpper", Vec::new())
    }

    #[must_use]
    pub fn to_lower(self) -> Self {
        self.method("ToLower", Vec::new())
    }

    #[must_use]
    pub fn trim(self) -> Self {
        self.method("Trim", Vec::new())
    }

    /// Zero-based start, like the in-memory API; the translator converts to
    /// the 1-based SQL convention.
    #[must_use]
    pub fn substring(self, start: impl Into<Expr>, length: Option<Expr>) -> Self {
        let mut args = vec![start.into()];
        if let Some(length) = length {
            args.push(length);
        }
        self.method("Substring", args)
    }

    #[must_use]
    pub fn replace(self, from: impl Into<Expr>, to: impl Into<Expr>) -> Self {
        self.method("Replace", vec![from.into(), to.into()])
    }

    #[must_use]
    pub fn concat(self, other: impl Into<Expr>) -> Self {
        self.method("Concat", vec![other.into()])
    }

    #[must_use]
    pub fn length(self) -> Self {
        self.method("Length", Vec::new())
    }

    /// `self IN (values…)`; mirrors `collection.Contains(item)`.
    #[must_use]
    pub fn in_values<I, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let elements = values
            .into_iter()
            .map(|value| Expr::Constant(value.into()))
            .collect();
        Self::MethodCall {
            receiver: Some(Box::new(Expr::NewArray(elements))),
            method: "Contains".to_string(),
            args: vec![self],
        }
    }

    #[must_use]
    pub fn add_years(self, amount: impl Into<Expr>) -> Self {
        self.method("AddYears", vec![amount.into()])
    }

    #[must_use]
    pub fn add_months(self, amount: impl Into<Expr>) -> Self {
        self.method("AddMonths", vec![amount.into()])
    }

    #[must_use]
    pub fn add_days(self, amount: impl Into<Expr>) -> Self {
        self.method("AddDays", vec![amount.into()])
    }

    #[must_use]
    pub fn add_hours(self, amount: impl Into<Expr>) -> Self {
        self.method("AddHours", vec![amount.into()])
    }

    #[must_use]
    pub fn add_minutes(self, amount: impl Into<Expr>) -> Self {
        self.method("AddMinutes", vec![amount.into()])
    }

    #[must_use]
    pub fn add_seconds(self, amount: impl Into<Expr>) -> Self {
        self.method("AddSeconds", vec![amount.into()])
    }

    #[must_use]
    pub fn year(self) -> Self {
        self.method("Year", Vec::new())
    }

    #[must_use]
    pub fn month(self) -> Self {
        self.method("Month", Vec::new())
    }

    #[must_use]
    pub fn day(self) -> Self {
        self.method("Day", Vec::new())
    }

    #[must_use]
    pub fn hour(self) -> Self {
        self.method("Hour", Vec::new())
    }

    #[must_use]
    pub fn minute(self) -> Self {
        self.method("Minute", Vec::new())
    }

    #[must_use]
    pub fn second(self) -> Self {
        self.method("Second", Vec::new())
    }

    #[must_use]
    pub fn abs(self) -> Self {
        self.method("Abs", Vec::new())
    }

    #[must_use]
    pub fn floor(self) -> Self {
        self.method("Floor", Vec::new())
    }

    #[must_use]
    pub fn ceiling(self) -> Self {
        self.method("Ceiling", Vec::new())
    }

    #[must_use]
    pub fn round(self, digits: Option<i32>) -> Self {
        let args = digits.map(|digits| vec![lit(digits)]).unwrap_or_default();
        self.method("Round", args)
    }

    #[must_use]
    pub fn sqrt(self) -> Self {
        self.method("Sqrt", Vec::new())
    }

    #[must_use]
    pub fn sin(self) -> Self {
        self.method("Sin", Vec::new())
    }

    #[must_use]
    pub fn cos(self) -> Self {
        self.method("Cos", Vec::new())
    }

    #[must_use]
    pub fn tan(self) -> Self {
        self.method("Tan", Vec::new())
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Self::Constant(value)
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        lit(value)
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        lit(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        lit(value)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        lit(value)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        lit(value)
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        lit(value)
    }
}
