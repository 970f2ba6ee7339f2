#![forbid(unsafe_code)]
//! sieve-eval: folds an expression against a row where only some columns
//! have known values.
//!
//! The result is a concrete value (NULL included) or `Indeterminate` when
//! the outcome depends on an unbound column. Expressions are type-checked
//! once against a `RowResolver` in `ExprEvaluator::prepare` and can then be
//! evaluated against any number of binding sets.

pub mod error;
pub mod evaluator;

pub use error::{EvalError, Result};
pub use evaluator::{evaluate, Bindings, EvalResult, ExprEvaluator};
