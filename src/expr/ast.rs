//! Expression tree
//!
//! Expressions are parsed once when a pipeline is validated and evaluated
//! many times. Operators with plain positional arguments share the
//! [`Expression::Op`] node; constructs with named parameters or their own
//! variable scope get a dedicated variant.

use std::fmt;

use super::dates::{DatePart, TimeUnit};
use crate::value::Value;

/// Positional-argument operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Abs,
    Ceil,
    Floor,
    Round,
    Trunc,
    Sqrt,
    Pow,
    Ln,
    Log10,

    // Comparison
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Cmp,

    // Logical
    And,
    Or,
    Not,
    IfNull,

    // String
    Concat,
    Substr,
    ToString,
    ToUpper,
    ToLower,

    // Type
    Type,
    ToDouble,
    IsArray,
    IsNumber,

    // Array
    Size,
    ArrayElemAt,
    Slice,
    In,
    ConcatArrays,
    Range,
    First,
    Last,
    ReverseArray,

    // Set
    SetUnion,
    SetIntersection,
    SetDifference,
    SetIsSubset,

    // Reductions over an array argument or over the argument list
    Sum,
    Avg,
    Min,
    Max,
    StdDevPop,

    // Statistics
    Pearson,

    // Dates
    DatePart(DatePart),
}

/// Accepted argument counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range(usize, usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            Arity::Exact(e) => n == e,
            Arity::Range(lo, hi) => n >= lo && n <= hi,
            Arity::AtLeast(lo) => n >= lo,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::Range(lo, hi) => write!(f, "{} to {}", lo, hi),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
        }
    }
}

impl Operator {
    /// Resolves an operator keyword such as `$add`
    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name {
            "$add" => Operator::Add,
            "$subtract" => Operator::Subtract,
            "$multiply" => Operator::Multiply,
            "$divide" => Operator::Divide,
            "$mod" => Operator::Mod,
            "$abs" => Operator::Abs,
            "$ceil" => Operator::Ceil,
            "$floor" => Operator::Floor,
            "$round" => Operator::Round,
            "$trunc" => Operator::Trunc,
            "$sqrt" => Operator::Sqrt,
            "$pow" => Operator::Pow,
            "$ln" => Operator::Ln,
            "$log10" => Operator::Log10,
            "$eq" => Operator::Eq,
            "$ne" => Operator::Ne,
            "$gt" => Operator::Gt,
            "$gte" => Operator::Gte,
            "$lt" => Operator::Lt,
            "$lte" => Operator::Lte,
            "$cmp" => Operator::Cmp,
            "$and" => Operator::And,
            "$or" => Operator::Or,
            "$not" => Operator::Not,
            "$ifNull" => Operator::IfNull,
            "$concat" => Operator::Concat,
            "$substr" | "$substrCP" | "$substrBytes" => Operator::Substr,
            "$toString" => Operator::ToString,
            "$toUpper" => Operator::ToUpper,
            "$toLower" => Operator::ToLower,
            "$type" => Operator::Type,
            "$toDouble" => Operator::ToDouble,
            "$isArray" => Operator::IsArray,
            "$isNumber" => Operator::IsNumber,
            "$size" => Operator::Size,
            "$arrayElemAt" => Operator::ArrayElemAt,
            "$slice" => Operator::Slice,
            "$in" => Operator::In,
            "$concatArrays" => Operator::ConcatArrays,
            "$range" => Operator::Range,
            "$first" => Operator::First,
            "$last" => Operator::Last,
            "$reverseArray" => Operator::ReverseArray,
            "$setUnion" => Operator::SetUnion,
            "$setIntersection" => Operator::SetIntersection,
            "$setDifference" => Operator::SetDifference,
            "$setIsSubset" => Operator::SetIsSubset,
            "$sum" => Operator::Sum,
            "$avg" => Operator::Avg,
            "$min" => Operator::Min,
            "$max" => Operator::Max,
            "$stdDevPop" => Operator::StdDevPop,
            "$pearson" => Operator::Pearson,
            "$year" => Operator::DatePart(DatePart::Year),
            "$month" => Operator::DatePart(DatePart::Month),
            "$dayOfMonth" => Operator::DatePart(DatePart::DayOfMonth),
            "$dayOfWeek" => Operator::DatePart(DatePart::DayOfWeek),
            "$dayOfYear" => Operator::DatePart(DatePart::DayOfYear),
            "$hour" => Operator::DatePart(DatePart::Hour),
            "$minute" => Operator::DatePart(DatePart::Minute),
            "$second" => Operator::DatePart(DatePart::Second),
            _ => return None,
        };
        Some(op)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Add => "$add",
            Operator::Subtract => "$subtract",
            Operator::Multiply => "$multiply",
            Operator::Divide => "$divide",
            Operator::Mod => "$mod",
            Operator::Abs => "$abs",
            Operator::Ceil => "$ceil",
            Operator::Floor => "$floor",
            Operator::Round => "$round",
            Operator::Trunc => "$trunc",
            Operator::Sqrt => "$sqrt",
            Operator::Pow => "$pow",
            Operator::Ln => "$ln",
            Operator::Log10 => "$log10",
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::Cmp => "$cmp",
            Operator::And => "$and",
            Operator::Or => "$or",
            Operator::Not => "$not",
            Operator::IfNull => "$ifNull",
            Operator::Concat => "$concat",
            Operator::Substr => "$substr",
            Operator::ToString => "$toString",
            Operator::ToUpper => "$toUpper",
            Operator::ToLower => "$toLower",
            Operator::Type => "$type",
            Operator::ToDouble => "$toDouble",
            Operator::IsArray => "$isArray",
            Operator::IsNumber => "$isNumber",
            Operator::Size => "$size",
            Operator::ArrayElemAt => "$arrayElemAt",
            Operator::Slice => "$slice",
            Operator::In => "$in",
            Operator::ConcatArrays => "$concatArrays",
            Operator::Range => "$range",
            Operator::First => "$first",
            Operator::Last => "$last",
            Operator::ReverseArray => "$reverseArray",
            Operator::SetUnion => "$setUnion",
            Operator::SetIntersection => "$setIntersection",
            Operator::SetDifference => "$setDifference",
            Operator::SetIsSubset => "$setIsSubset",
            Operator::Sum => "$sum",
            Operator::Avg => "$avg",
            Operator::Min => "$min",
            Operator::Max => "$max",
            Operator::StdDevPop => "$stdDevPop",
            Operator::Pearson => "$pearson",
            Operator::DatePart(part) => match part {
                DatePart::Year => "$year",
                DatePart::Month => "$month",
                DatePart::DayOfMonth => "$dayOfMonth",
                DatePart::DayOfWeek => "$dayOfWeek",
                DatePart::DayOfYear => "$dayOfYear",
                DatePart::Hour => "$hour",
                DatePart::Minute => "$minute",
                DatePart::Second => "$second",
            },
        }
    }

    pub fn arity(&self) -> Arity {
        use Operator::*;
        match self {
            Add | Multiply | Concat | Sum | Avg | Min | Max | StdDevPop | SetIntersection => {
                Arity::AtLeast(1)
            }
            And | Or | ConcatArrays | SetUnion => Arity::AtLeast(0),
            IfNull => Arity::AtLeast(2),
            Subtract | Divide | Mod | Pow | Eq | Ne | Gt | Gte | Lt | Lte | Cmp | ArrayElemAt
            | In | SetDifference | SetIsSubset | Pearson => Arity::Exact(2),
            Round | Trunc => Arity::Range(1, 2),
            Slice | Range => Arity::Range(2, 3),
            Substr => Arity::Exact(3),
            Abs | Ceil | Floor | Sqrt | Ln | Log10 | Not | ToString | ToUpper | ToLower | Type
            | ToDouble | IsArray | IsNumber | Size | First | Last | ReverseArray | DatePart(_) => {
                Arity::Exact(1)
            }
        }
    }
}

/// A parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    /// `$a.b`, stored without the leading `$`
    Field(String),
    /// `$$name.path`
    Variable {
        name: String,
        path: Option<String>,
    },
    /// Object literal whose values are expressions
    Object(Vec<(String, Expression)>),
    Array(Vec<Expression>),
    Op {
        op: Operator,
        args: Vec<Expression>,
    },
    /// `$cond` and `$switch`: first truthy branch wins, in declared order
    Switch {
        branches: Vec<(Expression, Expression)>,
        default: Option<Box<Expression>>,
    },
    Let {
        vars: Vec<(String, Expression)>,
        body: Box<Expression>,
    },
    Filter {
        input: Box<Expression>,
        alias: String,
        cond: Box<Expression>,
        limit: Option<Box<Expression>>,
    },
    Map {
        input: Box<Expression>,
        alias: String,
        body: Box<Expression>,
    },
    Reduce {
        input: Box<Expression>,
        initial: Box<Expression>,
        body: Box<Expression>,
    },
    DateFromString {
        input: Box<Expression>,
        format: Option<Box<Expression>>,
        on_error: Option<Box<Expression>>,
        on_null: Option<Box<Expression>>,
    },
    DateToString {
        date: Box<Expression>,
        format: Option<Box<Expression>>,
        on_null: Option<Box<Expression>>,
    },
    /// `$dateAdd` and `$dateSubtract` (with `negate` set)
    DateAdd {
        start: Box<Expression>,
        unit: TimeUnit,
        amount: Box<Expression>,
        negate: bool,
    },
    DateDiff {
        start: Box<Expression>,
        end: Box<Expression>,
        unit: TimeUnit,
    },
    /// Exponential smoothing of a numeric array
    Smoothing {
        input: Box<Expression>,
        alpha: f64,
    },
    /// Threshold anomaly flag
    Anomaly {
        value: Box<Expression>,
        mean: Box<Expression>,
        stddev: Box<Expression>,
        k: f64,
    },
}

impl Expression {
    /// Field path referenced directly by this expression, if any
    pub fn as_field(&self) -> Option<&str> {
        match self {
            Expression::Field(path) => Some(path),
            _ => None,
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expression]) -> fmt::Result {
    write!(f, "[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, "]")
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(v) => write!(f, "{}", v),
            Expression::Field(path) => write!(f, "\"${}\"", path),
            Expression::Variable { name, path } => match path {
                Some(p) => write!(f, "\"$${}.{}\"", name, p),
                None => write!(f, "\"$${}\"", name),
            },
            Expression::Object(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\": {}", k, v)?;
                }
                write!(f, "}}")
            }
            Expression::Array(items) => write_list(f, items),
            Expression::Op { op, args } => {
                write!(f, "{{\"{}\": ", op.name())?;
                write_list(f, args)?;
                write!(f, "}}")
            }
            Expression::Switch { branches, default } => {
                write!(f, "{{\"$switch\": {{\"branches\": [")?;
                for (i, (case, then)) in branches.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{{\"case\": {}, \"then\": {}}}", case, then)?;
                }
                write!(f, "]")?;
                if let Some(d) = default {
                    write!(f, ", \"default\": {}", d)?;
                }
                write!(f, "}}}}")
            }
            Expression::Let { body, .. } => write!(f, "{{\"$let\": {{\"in\": {}}}}}", body),
            Expression::Filter { input, alias, cond, .. } => write!(
                f,
                "{{\"$filter\": {{\"input\": {}, \"as\": \"{}\", \"cond\": {}}}}}",
                input, alias, cond
            ),
            Expression::Map { input, alias, body } => write!(
                f,
                "{{\"$map\": {{\"input\": {}, \"as\": \"{}\", \"in\": {}}}}}",
                input, alias, body
            ),
            Expression::Reduce { input, initial, body } => write!(
                f,
                "{{\"$reduce\": {{\"input\": {}, \"initialValue\": {}, \"in\": {}}}}}",
                input, initial, body
            ),
            Expression::DateFromString { input, .. } => {
                write!(f, "{{\"$dateFromString\": {{\"dateString\": {}}}}}", input)
            }
            Expression::DateToString { date, .. } => {
                write!(f, "{{\"$dateToString\": {{\"date\": {}}}}}", date)
            }
            Expression::DateAdd { start, unit, amount, negate } => write!(
                f,
                "{{\"{}\": {{\"startDate\": {}, \"unit\": \"{}\", \"amount\": {}}}}}",
                if *negate { "$dateSubtract" } else { "$dateAdd" },
                start,
                unit.as_str(),
                amount
            ),
            Expression::DateDiff { start, end, unit } => write!(
                f,
                "{{\"$dateDiff\": {{\"startDate\": {}, \"endDate\": {}, \"unit\": \"{}\"}}}}",
                start,
                end,
                unit.as_str()
            ),
            Expression::Smoothing { input, alpha } => write!(
                f,
                "{{\"$expSmoothing\": {{\"input\": {}, \"alpha\": {}}}}}",
                input, alpha
            ),
            Expression::Anomaly { value, mean, stddev, k } => write!(
                f,
                "{{\"$isAnomaly\": {{\"value\": {}, \"mean\": {}, \"stddev\": {}, \"k\": {}}}}}",
                value, mean, stddev, k
            ),
        }
    }
}
