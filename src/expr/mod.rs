//! Expression language
//!
//! Parses the JSON expression grammar into an [`Expression`] tree and
//! evaluates it against a document plus bound variables.
//!
//! ```ignore
//! use stratus::expr::{parse_expression, Variables};
//!
//! let expr = parse_expression(&json!({"$divide": ["$precipitation_mm", 10]}))?;
//! let value = expr.evaluate(&doc, &Variables::new())?;
//! ```

mod ast;
pub mod dates;
mod errors;
mod evaluator;
mod parser;
mod variables;

pub use ast::{Arity, Expression, Operator};
pub use dates::TimeUnit;
pub use errors::{ExprResult, ExpressionError};
pub use evaluator::evaluate;
pub use parser::parse_expression;
pub use variables::Variables;
