//! `$match` filtering
//!
//! Query-language semantics over untyped documents:
//! - a missing field behaves as null for equality
//! - an array field matches when the array itself or any element matches
//! - range operators only compare values of the same type class

use std::cmp::Ordering;

use super::context::eval;
use super::errors::ExecutorResult;
use crate::expr::Variables;
use crate::planner::{FilterOp, MatchExpr};
use crate::value::{compare_values, type_rank, Document, Value};

/// Evaluates match expressions against documents
pub struct PredicateFilter;

impl PredicateFilter {
    /// Checks if a document satisfies the filter tree.
    ///
    /// Only `$expr` clauses can fail; field predicates never error.
    pub fn matches(document: &Document, expr: &MatchExpr, vars: &Variables<'_>) -> ExecutorResult<bool> {
        match expr {
            MatchExpr::And(items) => {
                for item in items {
                    if !Self::matches(document, item, vars)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            MatchExpr::Or(items) => {
                for item in items {
                    if Self::matches(document, item, vars)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            MatchExpr::Nor(items) => {
                for item in items {
                    if Self::matches(document, item, vars)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            MatchExpr::Field { path, ops } => {
                let value = document.get_path(path);
                Ok(ops.iter().all(|op| Self::matches_op(value.as_ref(), op)))
            }
            MatchExpr::Expr(e) => Ok(eval("$match", e, document, vars)?.is_truthy()),
        }
    }

    /// Checks one operator against a field value (`None` when missing)
    fn matches_op(value: Option<&Value>, op: &FilterOp) -> bool {
        match op {
            FilterOp::Eq(expected) => Self::eq_match(value, expected),
            FilterOp::Ne(expected) => !Self::eq_match(value, expected),
            FilterOp::Gt(bound) => Self::range_match(value, bound, |o| o == Ordering::Greater),
            FilterOp::Gte(bound) => Self::range_match(value, bound, |o| o != Ordering::Less),
            FilterOp::Lt(bound) => Self::range_match(value, bound, |o| o == Ordering::Less),
            FilterOp::Lte(bound) => Self::range_match(value, bound, |o| o != Ordering::Greater),
            FilterOp::In(options) => options.iter().any(|o| Self::eq_match(value, o)),
            FilterOp::Nin(options) => !options.iter().any(|o| Self::eq_match(value, o)),
            FilterOp::Exists(should_exist) => value.is_some() == *should_exist,
            FilterOp::Regex(re) => Self::candidates(value)
                .iter()
                .any(|c| c.as_str().map_or(false, |s| re.is_match(s))),
            FilterOp::Size(n) => matches!(value, Some(Value::Array(items)) if items.len() == *n),
            FilterOp::Not(ops) => !ops.iter().all(|inner| Self::matches_op(value, inner)),
        }
    }

    /// The value itself plus, for arrays, each element; missing reads as null
    fn candidates(value: Option<&Value>) -> Vec<&Value> {
        const NULL: &Value = &Value::Null;
        match value {
            None => vec![NULL],
            Some(v @ Value::Array(items)) => std::iter::once(v).chain(items.iter()).collect(),
            Some(v) => vec![v],
        }
    }

    fn eq_match(value: Option<&Value>, expected: &Value) -> bool {
        Self::candidates(value).into_iter().any(|c| c == expected)
    }

    fn range_match(value: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
        Self::candidates(value)
            .into_iter()
            .filter(|c| type_rank(c) == type_rank(bound))
            .any(|c| accept(compare_values(c, bound)))
    }
}
