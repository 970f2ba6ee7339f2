//! Convenient re-exports for downstream crates.

pub use crate::config::PushdownConfig;
pub use crate::dag::{GeneratorOp, JoinOp, JoinType, Op, OpKind, PlanGraph, PlanNode, ScanOp};
pub use crate::error::{Error, Result};
pub use crate::expr::{ColumnKey, Expr, Func};
pub use crate::hash::Hash256;
pub use crate::id::OpId;
pub use crate::resolver::RowResolver;
pub use crate::schema::{DataType, Field, Schema};
pub use crate::types::Scalar;
